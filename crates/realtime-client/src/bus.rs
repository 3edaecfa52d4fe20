//! Process-wide platform event bus.
//!
//! Other parts of the application subscribe here instead of registering
//! listeners on the realtime client.

use crate::envelope::{DisplaySettings, NotificationDescriptor, UserSnapshot};
use tokio::sync::broadcast;
use tracing::{debug, warn};

const DEFAULT_CAPACITY: usize = 64;

/// Bus topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    UserDataUpdated,
    DisplaySettingsUpdated,
    RealtimeNotification,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::UserDataUpdated => "userDataUpdated",
            Topic::DisplaySettingsUpdated => "displaySettingsUpdated",
            Topic::RealtimeNotification => "realtimeNotification",
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events published on the bus.
#[derive(Debug, Clone, PartialEq)]
pub enum PlatformEvent {
    /// The cached user snapshot was replaced.
    UserDataUpdated(UserSnapshot),
    /// Display preferences changed.
    DisplaySettingsUpdated(DisplaySettings),
    /// A server notification arrived.
    RealtimeNotification(NotificationDescriptor),
}

impl PlatformEvent {
    pub fn topic(&self) -> Topic {
        match self {
            PlatformEvent::UserDataUpdated(_) => Topic::UserDataUpdated,
            PlatformEvent::DisplaySettingsUpdated(_) => Topic::DisplaySettingsUpdated,
            PlatformEvent::RealtimeNotification(_) => Topic::RealtimeNotification,
        }
    }
}

/// Broadcast bus handle. Clones share the same channel.
#[derive(Debug, Clone)]
pub struct PlatformBus {
    tx: broadcast::Sender<PlatformEvent>,
}

impl PlatformBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event; returns the number of subscribers that will see it.
    pub fn publish(&self, event: PlatformEvent) -> usize {
        let topic = event.topic();
        match self.tx.send(event) {
            Ok(receivers) => {
                debug!(%topic, receivers, "Published platform event");
                receivers
            }
            Err(_) => {
                debug!(%topic, "Published platform event with no subscribers");
                0
            }
        }
    }

    /// Subscribe to every topic.
    pub fn subscribe(&self) -> broadcast::Receiver<PlatformEvent> {
        self.tx.subscribe()
    }

    /// Subscribe to a single topic.
    pub fn subscribe_topic(&self, topic: Topic) -> TopicSubscription {
        TopicSubscription {
            topic,
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for PlatformBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Receiver filtered to one topic.
#[derive(Debug)]
pub struct TopicSubscription {
    topic: Topic,
    rx: broadcast::Receiver<PlatformEvent>,
}

impl TopicSubscription {
    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Next event on this topic; `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<PlatformEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.topic() == self.topic => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(topic = %self.topic, skipped, "Bus subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next already-published event on this topic, without waiting.
    pub fn try_recv(&mut self) -> Option<PlatformEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if event.topic() == self.topic => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(topic = %self.topic, skipped, "Bus subscriber lagged");
                }
                Err(_) => return None,
            }
        }
    }
}
