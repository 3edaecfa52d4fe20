//! Push channel transports.
//!
//! A transport opens one long-lived channel and reports what happens on it as
//! [`TransportSignal`]s. It never retries; reconnect policy lives in the
//! connection state machine.

mod sse;

pub use sse::SseTransport;

use tokio::sync::mpsc;
use url::Url;

/// Buffered signals per channel.
pub(crate) const SIGNAL_BUFFER: usize = 64;

/// Something that happened on an open channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSignal {
    /// The server accepted the channel.
    Ready,
    /// One raw pushed message.
    Message(String),
    /// The channel hit an error. `closed` is true when the channel is gone
    /// and will produce nothing further.
    Error { closed: bool, reason: String },
}

impl TransportSignal {
    pub fn closed(reason: impl Into<String>) -> Self {
        TransportSignal::Error {
            closed: true,
            reason: reason.into(),
        }
    }

    pub fn transient(reason: impl Into<String>) -> Self {
        TransportSignal::Error {
            closed: false,
            reason: reason.into(),
        }
    }
}

/// Opens server-push channels.
pub trait PushTransport: Send + Sync + 'static {
    /// Start opening a channel to `url`.
    ///
    /// Dropping the returned receiver closes the channel. A sender dropped
    /// without a closing error is treated as a closed channel.
    fn open(&self, url: Url) -> mpsc::Receiver<TransportSignal>;
}

/// Render a channel URL for logs with the session token masked.
pub(crate) fn redact_token(url: &Url) -> String {
    let mut redacted = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if k == "token" { "***".to_string() } else { v.into_owned() };
            (k.into_owned(), v)
        })
        .collect();
    if pairs.is_empty() {
        return redacted.to_string();
    }
    redacted.query_pairs_mut().clear().extend_pairs(pairs);
    redacted.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_token() {
        let url = Url::parse("https://api.example.com/realtime/events?token=secret&v=2").unwrap();
        let redacted = redact_token(&url);
        assert!(!redacted.contains("secret"));
        assert!(redacted.contains("token=***") || redacted.contains("token=%2A%2A%2A"));
        assert!(redacted.contains("v=2"));
    }

    #[test]
    fn test_redact_without_query() {
        let url = Url::parse("https://api.example.com/realtime/events").unwrap();
        assert_eq!(redact_token(&url), "https://api.example.com/realtime/events");
    }
}
