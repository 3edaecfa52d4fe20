//! Storage key constants.

/// Storage keys used by Healthdash
pub struct StorageKeys;

impl StorageKeys {
    /// Serialized snapshot of the authenticated user's profile
    pub const CURRENT_USER: &'static str = "current_user";
}
