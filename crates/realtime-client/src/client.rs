//! Realtime client facade.

use crate::backoff::BackoffPolicy;
use crate::bus::PlatformBus;
use crate::connection::{ConnectionState, ConnectionStateMachine};
use crate::control::{ConnectionStatus, ControlClient};
use crate::envelope::{NotificationDescriptor, UserSnapshot};
use crate::error::{RealtimeError, RealtimeResult};
use crate::projector::LocalStateProjector;
use crate::registry::{Listener, ListenerKey, ListenerRegistry};
use crate::transport::{PushTransport, SseTransport};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;
use user_state_store::{SnapshotCache, SnapshotReader};

/// Realtime client configuration.
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Base URL of the API (e.g. `https://api.healthdash.app/api`).
    pub api_url: String,
    /// Path of the push channel, relative to `api_url`.
    pub events_path: String,
    /// Reconnect timing.
    pub backoff: BackoffPolicy,
    /// Timeout for control requests.
    pub request_timeout: Duration,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:3000/api".to_string(),
            events_path: "realtime/events".to_string(),
            backoff: BackoffPolicy::default(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl RealtimeConfig {
    pub fn api_url(&self) -> RealtimeResult<Url> {
        let url = Url::parse(&self.api_url)?;
        if url.cannot_be_a_base() {
            return Err(RealtimeError::Config(format!(
                "api url must be a base URL: {}",
                self.api_url
            )));
        }
        Ok(url)
    }

    /// Full URL of the push channel (without the token).
    pub fn events_url(&self) -> RealtimeResult<Url> {
        let mut url = self.api_url()?;
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(self.events_path.split('/').filter(|s| !s.is_empty()));
        }
        Ok(url)
    }
}

/// Single entry point for realtime features in a session.
///
/// Construct one per session and pass it to whatever needs it.
pub struct RealtimeClient {
    machine: ConnectionStateMachine,
    registry: Arc<ListenerRegistry>,
    control: ControlClient,
    snapshot: SnapshotReader,
    session: Mutex<Option<String>>,
}

impl RealtimeClient {
    /// Create a client using the streaming HTTP transport.
    ///
    /// `cache` makes this client the only writer of the user snapshot;
    /// projected events are published on `bus`.
    pub fn new(config: RealtimeConfig, cache: SnapshotCache, bus: PlatformBus) -> RealtimeResult<Self> {
        let transport = Arc::new(SseTransport::new()?);
        Self::with_transport(config, cache, bus, transport)
    }

    /// Create a client over a custom transport.
    pub fn with_transport(
        config: RealtimeConfig,
        cache: SnapshotCache,
        bus: PlatformBus,
        transport: Arc<dyn PushTransport>,
    ) -> RealtimeResult<Self> {
        let events_url = config.events_url()?;
        let control = ControlClient::new(config.api_url()?, config.request_timeout)?;
        let registry = Arc::new(ListenerRegistry::new());
        let projector = LocalStateProjector::new(cache, bus);
        let snapshot = projector.reader();
        let machine = ConnectionStateMachine::new(
            events_url,
            config.backoff,
            transport,
            Arc::clone(&registry),
            projector,
        );

        Ok(Self {
            machine,
            registry,
            control,
            snapshot,
            session: Mutex::new(None),
        })
    }

    /// Start receiving live updates for the session authenticated by `token`.
    ///
    /// Does nothing if already connected for this session. An empty token
    /// puts the channel in `ClosedError` and leaves the client unconnected.
    pub fn connect(&self, token: &str) {
        let mut session = self.session.lock();
        if session.is_some() {
            debug!("Realtime client already connected");
            return;
        }

        self.machine.open(token);
        if !token.trim().is_empty() {
            *session = Some(token.to_string());
            info!("Realtime client connected");
        }
    }

    /// Tear down the channel, drop all listeners and forget the session.
    pub fn disconnect(&self) {
        let had_session = self.session.lock().take().is_some();
        self.machine.close();
        if had_session {
            info!("Realtime client disconnected");
        }
    }

    /// Close and reopen the channel with the last session token and a fresh
    /// reconnect budget. Listeners are dropped, as on `disconnect`.
    pub fn reconnect(&self) {
        let mut session = self.session.lock();
        self.machine.reconnect();
        if session.is_none() && self.machine.state().is_active() {
            *session = self.machine.last_token();
        }
    }

    pub fn add_event_listener(&self, key: ListenerKey, listener: Listener) {
        self.registry.add(key, listener);
    }

    /// Remove one registration of `listener`; false if it was not registered.
    pub fn remove_event_listener(&self, key: ListenerKey, listener: &Listener) -> bool {
        self.registry.remove(key, listener)
    }

    pub fn listener_count(&self, key: ListenerKey) -> usize {
        self.registry.count(key)
    }

    /// Ask the server to push `user` to this user's sessions.
    pub async fn trigger_profile_update(&self, user: &UserSnapshot) -> RealtimeResult<()> {
        let token = self.token()?;
        self.control.trigger_profile_update(&token, user).await
    }

    /// Ask the server to push a notification to this user's sessions.
    pub async fn send_notification(&self, notification: &NotificationDescriptor) -> RealtimeResult<()> {
        let token = self.token()?;
        self.control.send_notification(&token, notification).await
    }

    /// Server-side connection counters.
    pub async fn get_connection_status(&self) -> RealtimeResult<ConnectionStatus> {
        let token = self.token()?;
        self.control.connection_status(&token).await
    }

    /// Whether the channel is open right now. No I/O.
    pub fn is_connected(&self) -> bool {
        self.machine.is_open()
    }

    pub fn state(&self) -> ConnectionState {
        self.machine.state()
    }

    pub fn reconnect_attempt(&self) -> u32 {
        self.machine.reconnect_attempt()
    }

    /// The persisted user snapshot, if one is stored and readable.
    pub fn cached_user(&self) -> Option<Value> {
        self.snapshot.read_lossy()
    }

    pub fn snapshot_reader(&self) -> SnapshotReader {
        self.snapshot.clone()
    }

    fn token(&self) -> RealtimeResult<String> {
        self.session.lock().clone().ok_or(RealtimeError::NoToken)
    }
}

impl std::fmt::Debug for RealtimeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeClient")
            .field("machine", &self.machine)
            .field("connected", &self.session.lock().is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_url() {
        let config = RealtimeConfig {
            api_url: "https://health.example.com/api/".to_string(),
            ..RealtimeConfig::default()
        };
        assert_eq!(
            config.events_url().unwrap().as_str(),
            "https://health.example.com/api/realtime/events"
        );
    }

    #[test]
    fn test_default_config() {
        let config = RealtimeConfig::default();
        assert_eq!(config.backoff.max_attempts, 5);
        assert_eq!(config.backoff.base_delay, Duration::from_secs(1));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_invalid_api_url() {
        let config = RealtimeConfig {
            api_url: "not a url".to_string(),
            ..RealtimeConfig::default()
        };
        assert!(matches!(config.events_url(), Err(RealtimeError::InvalidUrl(_))));
    }
}
