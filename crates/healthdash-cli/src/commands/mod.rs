//! CLI command implementations.

mod cache;
mod control;
mod live;

pub use cache::cached_user;
pub use control::{notify, push_profile, status};
pub use live::listen;

use crate::output::OutputFormat;
use anyhow::{Context as _, Result};
use healthdash_config::{Config, Paths};
use realtime_client::{BackoffPolicy, ControlClient, RealtimeConfig};
use std::sync::Arc;
use std::time::Duration;
use user_state_store::{FileStateStorage, SnapshotCache};

/// Everything a command needs from the command line and config file.
pub struct Context {
    pub config: Config,
    pub paths: Paths,
    pub token: Option<String>,
    pub format: OutputFormat,
}

impl Context {
    /// The session token, or an error telling the user how to supply one.
    pub fn require_token(&self) -> Result<&str> {
        match self.token.as_deref().map(str::trim) {
            Some(token) if !token.is_empty() => Ok(token),
            _ => anyhow::bail!("No session token. Pass --token or set HEALTHDASH_TOKEN"),
        }
    }

    pub fn realtime_config(&self) -> RealtimeConfig {
        let settings = &self.config.realtime;
        RealtimeConfig {
            api_url: self.config.api_url.clone(),
            backoff: BackoffPolicy {
                base_delay: Duration::from_millis(settings.reconnect_base_delay_ms),
                max_delay: Duration::from_millis(settings.reconnect_max_delay_ms),
                max_attempts: settings.max_reconnect_attempts,
            },
            request_timeout: Duration::from_secs(settings.request_timeout_secs),
            ..RealtimeConfig::default()
        }
    }

    pub fn control_client(&self) -> Result<ControlClient> {
        let timeout = Duration::from_secs(self.config.realtime.request_timeout_secs);
        Ok(ControlClient::new(self.config.api_url()?, timeout)?)
    }

    /// Writer over the on-disk user snapshot.
    pub fn snapshot_cache(&self) -> Result<SnapshotCache> {
        let dir = self.paths.state_dir();
        let storage = FileStateStorage::open(&dir)
            .with_context(|| format!("Failed to open state directory {}", dir.display()))?;
        Ok(SnapshotCache::new(Arc::new(storage)))
    }
}
