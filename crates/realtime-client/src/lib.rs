//! Real-time event client for Healthdash.
//!
//! This crate provides:
//! - A single long-lived server-push channel per authenticated session
//! - Automatic reconnection with capped exponential backoff
//! - Fan-out of pushed events to independently registered listeners
//! - Projection of profile and settings events into the persisted user snapshot
//! - One-shot authenticated control requests
//!
//! ```text
//! RealtimeClient::connect(token)
//!   -> ConnectionStateMachine opens the channel (PushTransport)
//!   -> raw lines parsed into EventEnvelope
//!   -> LocalStateProjector (profile/settings/notification) -> PlatformBus
//!   -> ListenerRegistry (kind listeners, then wildcard listeners)
//! ```

mod backoff;
mod bus;
mod client;
mod connection;
mod control;
mod envelope;
mod error;
mod projector;
mod registry;
pub mod transport;

pub use backoff::{BackoffDecision, BackoffPolicy, BackoffState};
pub use bus::{PlatformBus, PlatformEvent, Topic, TopicSubscription};
pub use client::{RealtimeClient, RealtimeConfig};
pub use connection::{ConnectionState, ConnectionStateMachine};
pub use control::{ConnectionStatus, ControlClient};
pub use envelope::{
    DisplaySettings, EnvelopeError, EnvelopeOrigin, EventEnvelope, EventKind, EventPayload,
    NotificationDescriptor, Severity, TimestampSource, UserSnapshot,
};
pub use error::{RealtimeError, RealtimeResult};
pub use projector::{LocalStateProjector, Projection};
pub use registry::{listener, DispatchReport, Listener, ListenerKey, ListenerRegistry};
pub use transport::{PushTransport, SseTransport, TransportSignal};
