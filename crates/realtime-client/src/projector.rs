//! Applies pushed profile and settings events to local state.

use crate::bus::{PlatformBus, PlatformEvent};
use crate::envelope::{EnvelopeOrigin, EventEnvelope, EventKind, EventPayload, TimestampSource};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, error};
use user_state_store::{SnapshotCache, SnapshotReader};

/// What the projector did with an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    /// Local state was updated and the bus notified.
    Applied,
    /// Passed through to the bus without touching local state.
    Forwarded,
    /// Older than the last applied envelope of the same kind; skipped.
    Stale,
    /// Not a kind the projector handles.
    NotOwned,
}

/// Sole writer of the cached user snapshot.
///
/// Each `profile_updated` replaces the snapshot wholesale; each
/// `settings_updated` publishes the display preferences on the bus.
pub struct LocalStateProjector {
    cache: SnapshotCache,
    bus: PlatformBus,
    last_applied: Mutex<HashMap<EventKind, DateTime<Utc>>>,
}

impl LocalStateProjector {
    pub fn new(cache: SnapshotCache, bus: PlatformBus) -> Self {
        Self {
            cache,
            bus,
            last_applied: Mutex::new(HashMap::new()),
        }
    }

    /// Read handle over the snapshot this projector writes.
    pub fn reader(&self) -> SnapshotReader {
        self.cache.reader()
    }

    pub fn bus(&self) -> &PlatformBus {
        &self.bus
    }

    /// Forget applied timestamps (new session).
    pub fn reset(&self) {
        self.last_applied.lock().clear();
    }

    pub fn apply(&self, envelope: &EventEnvelope) -> Projection {
        match &envelope.payload {
            EventPayload::User(user) => {
                if self.is_stale(envelope) {
                    return Projection::Stale;
                }
                if let Err(e) = self.cache.write(user) {
                    error!(error = %e, user_id = %user.id(), "Failed to persist user snapshot");
                }
                self.bus.publish(PlatformEvent::UserDataUpdated(user.clone()));
                Projection::Applied
            }
            EventPayload::DisplaySettings(display) => {
                if self.is_stale(envelope) {
                    return Projection::Stale;
                }
                self.bus
                    .publish(PlatformEvent::DisplaySettingsUpdated(display.clone()));
                Projection::Applied
            }
            EventPayload::Notification(notification) => {
                self.bus
                    .publish(PlatformEvent::RealtimeNotification(notification.clone()));
                Projection::Forwarded
            }
            EventPayload::None => Projection::NotOwned,
        }
    }

    /// Check the envelope against the last applied one of its kind, and
    /// record it if it is not older.
    ///
    /// Only server timestamps are compared. An envelope stamped on receipt
    /// always applies and clears the mark for its kind.
    fn is_stale(&self, envelope: &EventEnvelope) -> bool {
        if envelope.origin == EnvelopeOrigin::Synthetic {
            return false;
        }
        let mut last_applied = self.last_applied.lock();
        if envelope.timestamp_source == TimestampSource::Client {
            last_applied.remove(&envelope.kind);
            return false;
        }
        match last_applied.get(&envelope.kind) {
            Some(last) if envelope.timestamp < *last => {
                debug!(
                    kind = %envelope.kind,
                    timestamp = %envelope.timestamp,
                    last_applied = %last,
                    "Skipping stale event"
                );
                true
            }
            _ => {
                last_applied.insert(envelope.kind, envelope.timestamp);
                false
            }
        }
    }
}

impl std::fmt::Debug for LocalStateProjector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStateProjector")
            .field("bus", &self.bus)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Topic;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use user_state_store::MemoryStateStorage;

    fn projector() -> (LocalStateProjector, PlatformBus) {
        let bus = PlatformBus::default();
        let cache = SnapshotCache::new(Arc::new(MemoryStateStorage::new()));
        (LocalStateProjector::new(cache, bus.clone()), bus)
    }

    fn profile(data: Value, timestamp: &str) -> EventEnvelope {
        let raw = json!({"type": "profile_updated", "data": data, "timestamp": timestamp});
        EventEnvelope::parse(&raw.to_string()).unwrap()
    }

    #[test]
    fn test_profile_update_overwrites_snapshot_and_publishes() {
        let (projector, bus) = projector();
        let mut updates = bus.subscribe_topic(Topic::UserDataUpdated);

        projector.apply(&profile(json!({"id": "42", "weight": 70}), "2024-05-01T08:00:00Z"));
        let result =
            projector.apply(&profile(json!({"id": "42", "nom": "Dupont"}), "2024-05-01T09:00:00Z"));

        assert_eq!(result, Projection::Applied);
        let stored: Value = projector.reader().read().unwrap().unwrap();
        assert_eq!(stored, json!({"id": "42", "nom": "Dupont"}));

        assert!(updates.try_recv().is_some());
        match updates.try_recv() {
            Some(PlatformEvent::UserDataUpdated(user)) => assert_eq!(user.get("nom"), Some(&json!("Dupont"))),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(updates.try_recv().is_none());
    }

    #[test]
    fn test_stale_profile_is_skipped() {
        let (projector, bus) = projector();
        let mut updates = bus.subscribe_topic(Topic::UserDataUpdated);

        projector.apply(&profile(json!({"id": "42", "v": 2}), "2024-05-01T09:00:00Z"));
        let result = projector.apply(&profile(json!({"id": "42", "v": 1}), "2024-05-01T08:00:00Z"));

        assert_eq!(result, Projection::Stale);
        let stored: Value = projector.reader().read().unwrap().unwrap();
        assert_eq!(stored["v"], 2);
        assert!(updates.try_recv().is_some());
        assert!(updates.try_recv().is_none());
    }

    #[test]
    fn test_equal_timestamp_overwrites() {
        let (projector, _bus) = projector();
        projector.apply(&profile(json!({"id": "1", "v": 1}), "2024-05-01T09:00:00Z"));
        let result = projector.apply(&profile(json!({"id": "1", "v": 2}), "2024-05-01T09:00:00Z"));
        assert_eq!(result, Projection::Applied);
    }

    #[test]
    fn test_reset_forgets_timestamps() {
        let (projector, _bus) = projector();
        projector.apply(&profile(json!({"id": "1"}), "2024-05-01T09:00:00Z"));
        projector.reset();
        let result = projector.apply(&profile(json!({"id": "1"}), "2024-01-01T00:00:00Z"));
        assert_eq!(result, Projection::Applied);
    }

    #[test]
    fn test_unstamped_profile_clears_the_mark() {
        let (projector, _bus) = projector();
        let unstamped = EventEnvelope::parse(r#"{"type":"profile_updated","data":{"id":"1","v":1}}"#)
            .unwrap();

        projector.apply(&profile(json!({"id": "1", "v": 0}), "2999-01-01T00:00:00Z"));
        assert_eq!(projector.apply(&unstamped), Projection::Applied);

        let result = projector.apply(&profile(json!({"id": "1", "v": 2}), "2024-05-01T09:00:00Z"));
        assert_eq!(result, Projection::Applied);
        let stored: Value = projector.reader().read().unwrap().unwrap();
        assert_eq!(stored["v"], 2);
    }

    #[test]
    fn test_settings_publish_display_only() {
        let (projector, bus) = projector();
        let mut settings = bus.subscribe_topic(Topic::DisplaySettingsUpdated);

        let envelope = EventEnvelope::parse(
            r#"{"type":"settings_updated","data":{"displayPreferences":{"units":"imperial"},"email":true}}"#,
        )
        .unwrap();
        assert_eq!(projector.apply(&envelope), Projection::Applied);
        assert_eq!(projector.reader().read_raw().unwrap(), None);

        match settings.try_recv() {
            Some(PlatformEvent::DisplaySettingsUpdated(display)) => {
                assert_eq!(display.as_map().len(), 1);
                assert_eq!(display.get("units"), Some(&json!("imperial")));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_notifications_forwarded_and_heartbeats_ignored() {
        let (projector, bus) = projector();
        let mut notifications = bus.subscribe_topic(Topic::RealtimeNotification);

        let note = EventEnvelope::parse(r#"{"type":"notification","data":{"message":"Drink water"}}"#)
            .unwrap();
        let heartbeat = EventEnvelope::parse(r#"{"type":"heartbeat"}"#).unwrap();

        assert_eq!(projector.apply(&note), Projection::Forwarded);
        assert_eq!(projector.apply(&heartbeat), Projection::NotOwned);
        assert!(notifications.try_recv().is_some());
        assert!(notifications.try_recv().is_none());
    }
}
