//! Listener registry and event fan-out.

use crate::envelope::{EnvelopeError, EventEnvelope, EventKind};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error};

/// A registered event callback.
///
/// Identity is the `Arc` allocation: keep a clone of the handle you registered
/// to remove it later.
pub type Listener = Arc<dyn Fn(&EventEnvelope) + Send + Sync>;

/// Wrap a closure as a [`Listener`].
pub fn listener<F>(f: F) -> Listener
where
    F: Fn(&EventEnvelope) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// What a listener is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerKey {
    /// One event kind.
    Kind(EventKind),
    /// Every delivered event (`"*"`).
    Wildcard,
}

impl From<EventKind> for ListenerKey {
    fn from(kind: EventKind) -> Self {
        ListenerKey::Kind(kind)
    }
}

impl FromStr for ListenerKey {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "*" {
            Ok(ListenerKey::Wildcard)
        } else {
            s.parse().map(ListenerKey::Kind)
        }
    }
}

/// Outcome of one dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Listeners called.
    pub invoked: usize,
    /// Listeners that panicked.
    pub panicked: usize,
}

/// Listeners keyed by event kind, plus wildcard listeners.
///
/// Within a key, listeners run in registration order. Registering the same
/// handle twice makes it run twice.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<HashMap<ListenerKey, Vec<Listener>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener.
    pub fn add(&self, key: ListenerKey, listener: Listener) {
        self.listeners.write().entry(key).or_default().push(listener);
        debug!(?key, "Listener added");
    }

    /// Remove the first registration of `listener` under `key`.
    ///
    /// The key keeps its (possibly empty) entry until `clear`. Returns false if it was not registered there.
    pub fn remove(&self, key: ListenerKey, listener: &Listener) -> bool {
        let mut listeners = self.listeners.write();
        let Some(entries) = listeners.get_mut(&key) else {
            return false;
        };

        let Some(index) = entries.iter().position(|l| Arc::ptr_eq(l, listener)) else {
            return false;
        };
        entries.remove(index);
        debug!(?key, "Listener removed");
        true
    }

    /// Drop every listener.
    pub fn clear(&self) {
        self.listeners.write().clear();
    }

    /// Number of listeners registered under `key`.
    pub fn count(&self, key: ListenerKey) -> usize {
        self.listeners.read().get(&key).map_or(0, Vec::len)
    }

    /// True if no listener is registered under any key.
    pub fn is_empty(&self) -> bool {
        self.listeners.read().values().all(Vec::is_empty)
    }

    /// Deliver an envelope to its kind listeners, then to wildcard listeners.
    ///
    /// Runs against a snapshot taken before the first call, so listeners may
    /// add or remove registrations; the change applies from the next event.
    /// A panicking listener is logged and skipped.
    pub fn dispatch(&self, envelope: &EventEnvelope) -> DispatchReport {
        let targets: Vec<Listener> = {
            let listeners = self.listeners.read();
            let kind = listeners.get(&ListenerKey::Kind(envelope.kind));
            let wildcard = listeners.get(&ListenerKey::Wildcard);
            kind.into_iter()
                .chain(wildcard)
                .flatten()
                .cloned()
                .collect()
        };

        let mut report = DispatchReport::default();
        for listener in targets {
            report.invoked += 1;
            if catch_unwind(AssertUnwindSafe(|| listener(envelope))).is_err() {
                report.panicked += 1;
                error!(kind = %envelope.kind, "Event listener panicked");
            }
        }
        report
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let listeners = self.listeners.read();
        let counts: HashMap<&ListenerKey, usize> =
            listeners.iter().map(|(k, v)| (k, v.len())).collect();
        f.debug_struct("ListenerRegistry")
            .field("listeners", &counts)
            .finish()
    }
}
