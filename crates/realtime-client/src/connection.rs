//! Push channel lifecycle.
//!
//! ## State Diagram
//!
//! ```text
//!  Idle / ClosedClean / Failed
//!          │ Connect                      Reject (empty token)
//!          ▼                            ─────────────────────► ClosedError
//!     Connecting ── Ready ──► Open
//!          │                   │
//!          │ TransportClosed   │ TransportClosed
//!          ▼                   ▼
//!     ClosedError ── ScheduleRetry ──► ReconnectScheduled ── RetryFired ──► Connecting
//!          │
//!          │ GiveUp (failure budget spent)
//!          ▼
//!        Failed
//!
//!  Close from any state ──► ClosedClean
//! ```
//!
//! Every channel and retry timer is stamped with a generation number. Tearing
//! down bumps the generation, so signals from an old channel and timers that
//! fire after a close are ignored.

use crate::backoff::{BackoffDecision, BackoffPolicy, BackoffState};
use crate::envelope::{EventEnvelope, NotificationDescriptor, Severity};
use crate::projector::LocalStateProjector;
use crate::registry::ListenerRegistry;
use crate::transport::{redact_token, PushTransport, TransportSignal};
use parking_lot::Mutex;
use rust_fsm::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

/// Message of the synthetic `connection` event sent when the channel opens.
pub const CONNECTED_MESSAGE: &str = "Connected to live updates";

/// Message of the notification sent when reconnection is given up.
pub const UNAVAILABLE_MESSAGE: &str =
    "Live updates are unavailable. Reconnect to try again.";

state_machine! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub channel_machine(Idle)

    Idle => {
        Connect => Connecting,
        Reject => ClosedError,
        Close => ClosedClean
    },
    Connecting => {
        Ready => Open,
        TransportClosed => ClosedError,
        Close => ClosedClean
    },
    Open => {
        TransportClosed => ClosedError,
        Close => ClosedClean
    },
    ClosedError => {
        ScheduleRetry => ReconnectScheduled,
        GiveUp => Failed,
        Connect => Connecting,
        Reject => ClosedError,
        Close => ClosedClean
    },
    ReconnectScheduled => {
        RetryFired => Connecting,
        Close => ClosedClean
    },
    Failed => {
        Connect => Connecting,
        Reject => ClosedError,
        Close => ClosedClean
    },
    ClosedClean => {
        Connect => Connecting,
        Reject => ClosedError,
        Close => ClosedClean
    }
}

use channel_machine::Input as ChannelInput;
use channel_machine::State as ChannelState;
use channel_machine::StateMachine as ChannelMachine;

/// Channel state, as seen from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Never connected.
    Idle,
    /// Waiting for the transport to become ready.
    Connecting,
    /// Receiving events.
    Open,
    /// Closed by the client.
    ClosedClean,
    /// Closed by a failure or a rejected open.
    ClosedError,
    /// A retry timer is pending.
    ReconnectScheduled,
    /// Retries exhausted; waits for an explicit reconnect.
    Failed,
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    /// True while a channel exists or is about to be reopened.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Open | ConnectionState::ReconnectScheduled
        )
    }
}

impl From<&ChannelState> for ConnectionState {
    fn from(state: &ChannelState) -> Self {
        match state {
            ChannelState::Idle => ConnectionState::Idle,
            ChannelState::Connecting => ConnectionState::Connecting,
            ChannelState::Open => ConnectionState::Open,
            ChannelState::ClosedClean => ConnectionState::ClosedClean,
            ChannelState::ClosedError => ConnectionState::ClosedError,
            ChannelState::ReconnectScheduled => ConnectionState::ReconnectScheduled,
            ChannelState::Failed => ConnectionState::Failed,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::ClosedClean => "closed-clean",
            ConnectionState::ClosedError => "closed-error",
            ConnectionState::ReconnectScheduled => "reconnect-scheduled",
            ConnectionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Mutable channel state, guarded by one lock.
struct Core {
    machine: ChannelMachine,
    backoff: BackoffState,
    token: Option<String>,
    /// Last token accepted by `open`; survives `close` for `reconnect`.
    last_token: Option<String>,
    generation: u64,
    channel_task: Option<JoinHandle<()>>,
    retry_task: Option<JoinHandle<()>>,
}

impl Core {
    fn state(&self) -> ConnectionState {
        ConnectionState::from(self.machine.state())
    }

    /// Apply an input; false (and a debug log) if the current state does not
    /// accept it.
    fn transition(&mut self, input: ChannelInput) -> bool {
        let from = *self.machine.state();
        match self.machine.consume(&input) {
            Ok(_) => {
                debug!(?from, to = ?self.machine.state(), ?input, "Channel transition");
                true
            }
            Err(_) => {
                debug!(state = ?from, ?input, "Ignored channel input");
                false
            }
        }
    }

    /// Invalidate the current channel and timer.
    fn teardown(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if let Some(task) = self.channel_task.take() {
            task.abort();
        }
        if let Some(task) = self.retry_task.take() {
            task.abort();
        }
    }

    fn close_if_active(&mut self) {
        if self.state().is_active() {
            self.transition(ChannelInput::Close);
        }
    }
}

struct Shared {
    events_url: Url,
    policy: BackoffPolicy,
    transport: Arc<dyn PushTransport>,
    registry: Arc<ListenerRegistry>,
    projector: LocalStateProjector,
    core: Mutex<Core>,
}

/// Owns the single push channel of a session.
///
/// Must be used from within a Tokio runtime: opening the channel spawns the
/// task that drives it.
pub struct ConnectionStateMachine {
    shared: Arc<Shared>,
}

impl ConnectionStateMachine {
    pub fn new(
        events_url: Url,
        policy: BackoffPolicy,
        transport: Arc<dyn PushTransport>,
        registry: Arc<ListenerRegistry>,
        projector: LocalStateProjector,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                events_url,
                policy,
                transport,
                registry,
                projector,
                core: Mutex::new(Core {
                    machine: ChannelMachine::new(),
                    backoff: BackoffState::default(),
                    token: None,
                    last_token: None,
                    generation: 0,
                    channel_task: None,
                    retry_task: None,
                }),
            }),
        }
    }

    /// Open the channel with `token`, replacing any existing one.
    ///
    /// An empty token leaves the machine in `ClosedError` without creating a
    /// channel. Never fails.
    pub fn open(&self, token: &str) {
        let mut core = self.shared.core.lock();
        core.teardown();
        core.close_if_active();

        if token.trim().is_empty() {
            warn!("Refusing to open push channel without a session token");
            core.token = None;
            core.transition(ChannelInput::Reject);
            return;
        }

        core.token = Some(token.to_string());
        core.last_token = Some(token.to_string());
        core.backoff.reset();
        core.transition(ChannelInput::Connect);
        self.shared.spawn_channel(&mut core, token);
    }

    /// Close the channel, cancel any pending retry, and drop every listener.
    /// Safe to call repeatedly.
    pub fn close(&self) {
        {
            let mut core = self.shared.core.lock();
            core.teardown();
            core.transition(ChannelInput::Close);
            core.backoff.reset();
            core.token = None;
        }
        self.shared.projector.reset();
        self.shared.registry.clear();
        info!("Push channel closed");
    }

    /// `close()` followed by `open()` with the last accepted token.
    ///
    /// Listeners are dropped like on `close()`. Works after a close or a
    /// give-up; does nothing if no token was ever accepted.
    pub fn reconnect(&self) {
        let Some(token) = self.last_token() else {
            warn!("Reconnect requested without a session token");
            return;
        };

        info!("Reconnecting push channel");
        self.close();
        self.open(&token);
    }

    /// Last token accepted by `open`, kept across `close`.
    pub fn last_token(&self) -> Option<String> {
        self.shared.core.lock().last_token.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.core.lock().state()
    }

    pub fn is_open(&self) -> bool {
        self.state().is_open()
    }

    /// Consecutive failures since the last successful open.
    pub fn reconnect_attempt(&self) -> u32 {
        self.shared.core.lock().backoff.attempt()
    }
}

impl Drop for ConnectionStateMachine {
    fn drop(&mut self) {
        self.shared.core.lock().teardown();
    }
}

impl std::fmt::Debug for ConnectionStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.shared.core.lock();
        f.debug_struct("ConnectionStateMachine")
            .field("state", &core.state())
            .field("attempt", &core.backoff.attempt())
            .field("generation", &core.generation)
            .finish()
    }
}

impl Shared {
    /// Open a new channel under a fresh generation.
    fn spawn_channel(self: &Arc<Self>, core: &mut Core, token: &str) {
        core.generation = core.generation.wrapping_add(1);
        let generation = core.generation;

        let mut url = self.events_url.clone();
        url.query_pairs_mut().append_pair("token", token);
        info!(
            url = %redact_token(&url),
            generation,
            attempt = core.backoff.attempt(),
            "Opening push channel"
        );

        let rx = self.transport.open(url);
        let shared = Arc::clone(self);
        core.channel_task = Some(tokio::spawn(async move {
            shared.drive_channel(generation, rx).await;
        }));
    }

    async fn drive_channel(self: Arc<Self>, generation: u64, mut rx: mpsc::Receiver<TransportSignal>) {
        while let Some(signal) = rx.recv().await {
            match signal {
                TransportSignal::Ready => self.on_ready(generation),
                TransportSignal::Message(raw) => self.on_message(generation, &raw),
                TransportSignal::Error {
                    closed: false,
                    reason,
                } => {
                    warn!(%reason, "Transient push channel error");
                }
                TransportSignal::Error {
                    closed: true,
                    reason,
                } => {
                    self.on_channel_closed(generation, &reason);
                    return;
                }
            }
        }
        self.on_channel_closed(generation, "transport dropped the channel");
    }

    fn is_current(&self, generation: u64) -> bool {
        self.core.lock().generation == generation
    }

    fn on_ready(&self, generation: u64) {
        let opened = {
            let mut core = self.core.lock();
            if core.generation != generation {
                return;
            }
            let opened = core.transition(ChannelInput::Ready);
            if opened {
                core.backoff.reset();
            }
            opened
        };

        if opened {
            info!(generation, "Push channel open");
            self.deliver(&EventEnvelope::connection(CONNECTED_MESSAGE));
        }
    }

    fn on_message(&self, generation: u64, raw: &str) {
        if !self.is_current(generation) {
            return;
        }

        match EventEnvelope::parse(raw) {
            Ok(envelope) => self.deliver(&envelope),
            Err(e) => warn!(error = %e, "Dropping malformed push event"),
        }
    }

    fn on_channel_closed(self: &Arc<Self>, generation: u64, reason: &str) {
        let gave_up = {
            let mut core = self.core.lock();
            if core.generation != generation {
                return;
            }
            // This is the running channel task; it is finishing on its own.
            core.channel_task.take();
            if !core.transition(ChannelInput::TransportClosed) {
                return;
            }
            warn!(%reason, "Push channel closed");

            match core.backoff.record_failure(&self.policy) {
                BackoffDecision::Retry { attempt, delay } => {
                    core.transition(ChannelInput::ScheduleRetry);
                    info!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Scheduling reconnect"
                    );
                    let shared = Arc::clone(self);
                    core.retry_task = Some(tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        shared.on_retry_due(generation);
                    }));
                    false
                }
                BackoffDecision::GiveUp { attempts } => {
                    core.transition(ChannelInput::GiveUp);
                    error!(attempts, "Max reconnect attempts reached, live updates unavailable");
                    true
                }
            }
        };

        if gave_up {
            let notice = NotificationDescriptor::new(Severity::Error, UNAVAILABLE_MESSAGE)
                .with_title("Connection lost");
            self.deliver(&EventEnvelope::synthetic_notification(notice));
        }
    }

    fn on_retry_due(self: &Arc<Self>, generation: u64) {
        let mut core = self.core.lock();
        if core.generation != generation {
            debug!(generation, "Ignoring stale reconnect timer");
            return;
        }
        core.retry_task.take();
        if !core.transition(ChannelInput::RetryFired) {
            return;
        }
        let Some(token) = core.token.clone() else {
            return;
        };
        self.spawn_channel(&mut core, &token);
    }

    /// Projector first, then listeners. Never called with the core lock held.
    fn deliver(&self, envelope: &EventEnvelope) {
        let projection = self.projector.apply(envelope);
        let report = self.registry.dispatch(envelope);
        debug!(
            kind = %envelope.kind,
            ?projection,
            listeners = report.invoked,
            panicked = report.panicked,
            "Delivered push event"
        );
    }
}
