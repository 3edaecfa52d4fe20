//! Server-push event envelopes.
//!
//! Wire shape, one JSON object per pushed event:
//!
//! ```text
//! {"type": "profile_updated", "data": {...}, "message": "...", "timestamp": "2024-05-01T08:00:00Z"}
//! ```
//!
//! The kind fully determines the payload shape. Anything that does not fit is
//! rejected by [`EventEnvelope::parse`] and never reaches listeners.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Event kinds pushed over the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Connectivity information.
    Connection,
    /// Server keepalive.
    Heartbeat,
    /// The user's profile changed.
    ProfileUpdated,
    /// A notification addressed to the user.
    Notification,
    /// The user's settings changed.
    SettingsUpdated,
}

impl EventKind {
    /// Every kind, in declaration order.
    pub const ALL: [EventKind; 5] = [
        EventKind::Connection,
        EventKind::Heartbeat,
        EventKind::ProfileUpdated,
        EventKind::Notification,
        EventKind::SettingsUpdated,
    ];

    /// Wire name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Connection => "connection",
            EventKind::Heartbeat => "heartbeat",
            EventKind::ProfileUpdated => "profile_updated",
            EventKind::Notification => "notification",
            EventKind::SettingsUpdated => "settings_updated",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| EnvelopeError::UnknownKind(s.to_string()))
    }
}

/// Where an envelope came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnvelopeOrigin {
    /// Parsed from the push channel.
    #[default]
    Server,
    /// Produced locally by the client (connectivity and give-up notices).
    Synthetic,
}

/// Who stamped an envelope's timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestampSource {
    /// Sent by the server in the envelope.
    #[default]
    Server,
    /// Missing on the wire and filled in with the local clock on receipt.
    Client,
}

/// Envelope validation errors.
#[derive(Error, Debug)]
pub enum EnvelopeError {
    /// The line is not a JSON envelope.
    #[error("malformed envelope: {0}")]
    Json(#[from] serde_json::Error),

    /// The kind is not one we know.
    #[error("unknown event kind: {0}")]
    UnknownKind(String),

    /// The kind requires a payload and none was sent.
    #[error("{0} event without payload")]
    MissingPayload(EventKind),

    /// The payload does not have the shape the kind requires.
    #[error("invalid {kind} payload: {reason}")]
    InvalidPayload {
        /// Kind of the rejected envelope.
        kind: EventKind,
        /// What was wrong.
        reason: String,
    },

    /// The timestamp is not ISO-8601.
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

/// Snapshot of the authenticated user's profile.
///
/// Kept as the full JSON object the server sent so the persisted copy is
/// field-for-field identical to the pushed one. Must carry an `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct UserSnapshot {
    fields: Map<String, Value>,
}

impl UserSnapshot {
    /// The user id, rendered as a string.
    pub fn id(&self) -> String {
        match self.fields.get("id") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        }
    }

    /// Look up a profile field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// All profile fields.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Convert into a JSON value.
    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }
}

impl TryFrom<Map<String, Value>> for UserSnapshot {
    type Error = String;

    fn try_from(fields: Map<String, Value>) -> Result<Self, Self::Error> {
        match fields.get("id") {
            Some(Value::String(s)) if !s.is_empty() => Ok(Self { fields }),
            Some(Value::Number(_)) => Ok(Self { fields }),
            Some(_) => Err("user id must be a non-empty string or a number".to_string()),
            None => Err("user snapshot has no id".to_string()),
        }
    }
}

impl TryFrom<Value> for UserSnapshot {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(fields) => Self::try_from(fields),
            _ => Err("user snapshot must be a JSON object".to_string()),
        }
    }
}

impl From<UserSnapshot> for Map<String, Value> {
    fn from(user: UserSnapshot) -> Self {
        user.fields
    }
}

/// Notification severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

/// A notification to show the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub message: String,
    #[serde(default, alias = "type")]
    pub severity: Severity,
}

impl NotificationDescriptor {
    /// Create a notification with the given severity and message.
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            id: None,
            title: None,
            message: message.into(),
            severity,
        }
    }

    /// Set the title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// Display preferences (theme, units, locale, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DisplaySettings(Map<String, Value>);

impl DisplaySettings {
    /// Keys under which a settings payload may nest its display preferences.
    const NESTED_KEYS: [&'static str; 3] = ["display", "displayPreferences", "display_preferences"];

    /// Extract display preferences from a settings payload: the nested
    /// display object if there is one, otherwise the whole payload.
    pub fn from_settings(payload: Value) -> Option<Self> {
        let Value::Object(mut settings) = payload else {
            return None;
        };

        for key in Self::NESTED_KEYS {
            if matches!(settings.get(key), Some(Value::Object(_))) {
                if let Some(Value::Object(display)) = settings.remove(key) {
                    return Some(Self(display));
                }
            }
        }

        Some(Self(settings))
    }

    /// Look up a preference.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// All preferences.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

/// Kind-specific payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventPayload {
    /// `connection` and `heartbeat` carry nothing.
    None,
    /// `profile_updated`.
    User(UserSnapshot),
    /// `notification`.
    Notification(NotificationDescriptor),
    /// `settings_updated`, already narrowed to display preferences.
    DisplaySettings(DisplaySettings),
}

impl EventPayload {
    fn is_none(&self) -> bool {
        matches!(self, EventPayload::None)
    }
}

/// One pushed (or locally synthesized) event.
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    pub kind: EventKind,
    pub payload: EventPayload,
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub timestamp_source: TimestampSource,
    pub origin: EnvelopeOrigin,
}

#[derive(Deserialize)]
struct WireEnvelope {
    #[serde(rename = "type", alias = "kind")]
    kind: String,
    #[serde(default, alias = "payload")]
    data: Option<Value>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
}

#[derive(Serialize)]
struct WireEnvelopeRef<'a> {
    #[serde(rename = "type")]
    kind: EventKind,
    #[serde(skip_serializing_if = "EventPayload::is_none")]
    data: &'a EventPayload,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
    timestamp: String,
}

impl EventEnvelope {
    /// Parse one raw pushed line.
    pub fn parse(raw: &str) -> Result<Self, EnvelopeError> {
        let wire: WireEnvelope = serde_json::from_str(raw)?;
        let kind: EventKind = wire.kind.parse()?;

        let payload = match kind {
            EventKind::Connection | EventKind::Heartbeat => EventPayload::None,
            EventKind::ProfileUpdated => {
                let data = wire.data.ok_or(EnvelopeError::MissingPayload(kind))?;
                let user = UserSnapshot::try_from(data)
                    .map_err(|reason| EnvelopeError::InvalidPayload { kind, reason })?;
                EventPayload::User(user)
            }
            EventKind::Notification => {
                let data = wire.data.ok_or(EnvelopeError::MissingPayload(kind))?;
                let notification = serde_json::from_value(data).map_err(|e| {
                    EnvelopeError::InvalidPayload {
                        kind,
                        reason: e.to_string(),
                    }
                })?;
                EventPayload::Notification(notification)
            }
            EventKind::SettingsUpdated => {
                let data = wire.data.ok_or(EnvelopeError::MissingPayload(kind))?;
                let display = DisplaySettings::from_settings(data).ok_or_else(|| {
                    EnvelopeError::InvalidPayload {
                        kind,
                        reason: "settings must be a JSON object".to_string(),
                    }
                })?;
                EventPayload::DisplaySettings(display)
            }
        };

        let (timestamp, timestamp_source) = match wire.timestamp {
            Some(ts) => (
                DateTime::parse_from_rfc3339(&ts)
                    .map_err(|_| EnvelopeError::InvalidTimestamp(ts.clone()))?
                    .with_timezone(&Utc),
                TimestampSource::Server,
            ),
            None => (Utc::now(), TimestampSource::Client),
        };

        Ok(Self {
            kind,
            payload,
            message: wire.message,
            timestamp,
            timestamp_source,
            origin: EnvelopeOrigin::Server,
        })
    }

    /// Locally synthesized connectivity notice.
    pub fn connection(message: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Connection,
            payload: EventPayload::None,
            message: Some(message.into()),
            timestamp: Utc::now(),
            timestamp_source: TimestampSource::Client,
            origin: EnvelopeOrigin::Synthetic,
        }
    }

    /// Locally synthesized notification.
    pub fn synthetic_notification(notification: NotificationDescriptor) -> Self {
        Self {
            kind: EventKind::Notification,
            message: Some(notification.message.clone()),
            payload: EventPayload::Notification(notification),
            timestamp: Utc::now(),
            timestamp_source: TimestampSource::Client,
            origin: EnvelopeOrigin::Synthetic,
        }
    }

    /// True for envelopes produced by the client rather than the server.
    pub fn is_synthetic(&self) -> bool {
        self.origin == EnvelopeOrigin::Synthetic
    }

    /// The user snapshot of a `profile_updated` event.
    pub fn user(&self) -> Option<&UserSnapshot> {
        match &self.payload {
            EventPayload::User(user) => Some(user),
            _ => None,
        }
    }

    /// The descriptor of a `notification` event.
    pub fn notification(&self) -> Option<&NotificationDescriptor> {
        match &self.payload {
            EventPayload::Notification(notification) => Some(notification),
            _ => None,
        }
    }

    /// The display preferences of a `settings_updated` event.
    pub fn display_settings(&self) -> Option<&DisplaySettings> {
        match &self.payload {
            EventPayload::DisplaySettings(display) => Some(display),
            _ => None,
        }
    }

    /// Serialize back to the wire shape.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl Serialize for EventEnvelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        WireEnvelopeRef {
            kind: self.kind,
            data: &self.payload,
            message: self.message.as_deref(),
            timestamp: self.timestamp.to_rfc3339(),
        }
        .serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_profile_updated() {
        let raw = r#"{"type":"profile_updated","data":{"id":"42","nom":"Dupont"},"timestamp":"2024-05-01T08:00:00Z"}"#;
        let envelope = EventEnvelope::parse(raw).unwrap();

        assert_eq!(envelope.kind, EventKind::ProfileUpdated);
        assert_eq!(envelope.origin, EnvelopeOrigin::Server);
        let user = envelope.user().unwrap();
        assert_eq!(user.id(), "42");
        assert_eq!(
            user.clone().into_value(),
            json!({"id": "42", "nom": "Dupont"})
        );
        assert_eq!(envelope.timestamp.to_rfc3339(), "2024-05-01T08:00:00+00:00");
        assert_eq!(envelope.timestamp_source, TimestampSource::Server);
    }

    #[test]
    fn test_missing_timestamp_is_client_stamped() {
        let envelope = EventEnvelope::parse(r#"{"type":"heartbeat"}"#).unwrap();
        assert_eq!(envelope.timestamp_source, TimestampSource::Client);
        assert_eq!(
            EventEnvelope::connection("hi").timestamp_source,
            TimestampSource::Client
        );
    }

    #[test]
    fn test_parse_accepts_kind_and_payload_aliases() {
        let raw = r#"{"kind":"notification","payload":{"message":"Goal reached","type":"success"}}"#;
        let envelope = EventEnvelope::parse(raw).unwrap();

        let notification = envelope.notification().unwrap();
        assert_eq!(notification.message, "Goal reached");
        assert_eq!(notification.severity, Severity::Success);
    }

    #[test]
    fn test_parse_heartbeat_without_payload() {
        let envelope = EventEnvelope::parse(r#"{"type":"heartbeat"}"#).unwrap();
        assert_eq!(envelope.kind, EventKind::Heartbeat);
        assert_eq!(envelope.payload, EventPayload::None);
    }

    #[test]
    fn test_parse_connection_keeps_message() {
        let envelope =
            EventEnvelope::parse(r#"{"type":"connection","message":"welcome"}"#).unwrap();
        assert_eq!(envelope.message.as_deref(), Some("welcome"));
        assert!(!envelope.is_synthetic());
    }

    #[test]
    fn test_settings_extracts_nested_display() {
        let raw = r#"{"type":"settings_updated","data":{"display":{"theme":"dark","units":"metric"},"notifications":true}}"#;
        let envelope = EventEnvelope::parse(raw).unwrap();

        let display = envelope.display_settings().unwrap();
        assert_eq!(display.get("theme"), Some(&json!("dark")));
        assert!(display.get("notifications").is_none());
    }

    #[test]
    fn test_settings_already_display_shaped() {
        let raw = r#"{"type":"settings_updated","data":{"theme":"light"}}"#;
        let envelope = EventEnvelope::parse(raw).unwrap();

        let display = envelope.display_settings().unwrap();
        assert_eq!(display.as_map().len(), 1);
        assert_eq!(display.get("theme"), Some(&json!("light")));
    }

    #[test]
    fn test_malformed_envelopes_are_rejected() {
        let cases = [
            ("not json", "json"),
            (r#"{"data":{}}"#, "json"),
            (r#"{"type":"weather"}"#, "kind"),
            (r#"{"type":"profile_updated"}"#, "missing"),
            (r#"{"type":"profile_updated","data":{"nom":"x"}}"#, "invalid"),
            (r#"{"type":"profile_updated","data":[1,2]}"#, "invalid"),
            (r#"{"type":"notification","data":{"title":"no message"}}"#, "invalid"),
            (r#"{"type":"notification","data":{"message":"m","severity":"fatal"}}"#, "invalid"),
            (r#"{"type":"settings_updated","data":"dark"}"#, "invalid"),
            (r#"{"type":"heartbeat","timestamp":"yesterday"}"#, "timestamp"),
        ];

        for (raw, expected) in cases {
            let err = EventEnvelope::parse(raw).unwrap_err();
            let matched = match expected {
                "json" => matches!(err, EnvelopeError::Json(_)),
                "kind" => matches!(err, EnvelopeError::UnknownKind(_)),
                "missing" => matches!(err, EnvelopeError::MissingPayload(_)),
                "invalid" => matches!(err, EnvelopeError::InvalidPayload { .. }),
                "timestamp" => matches!(err, EnvelopeError::InvalidTimestamp(_)),
                _ => false,
            };
            assert!(matched, "{raw} produced unexpected error {err:?}");
        }
    }

    #[test]
    fn test_numeric_user_id() {
        let envelope =
            EventEnvelope::parse(r#"{"type":"profile_updated","data":{"id":7}}"#).unwrap();
        assert_eq!(envelope.user().unwrap().id(), "7");
    }

    #[test]
    fn test_synthetic_envelopes_are_tagged() {
        let connection = EventEnvelope::connection("Connected");
        assert!(connection.is_synthetic());
        assert_eq!(connection.kind, EventKind::Connection);

        let notice = EventEnvelope::synthetic_notification(NotificationDescriptor::new(
            Severity::Error,
            "Live updates unavailable",
        ));
        assert!(notice.is_synthetic());
        assert_eq!(notice.notification().unwrap().severity, Severity::Error);
    }

    #[test]
    fn test_to_json_wire_shape() {
        let raw = r#"{"type":"profile_updated","data":{"id":"42"},"timestamp":"2024-05-01T08:00:00Z"}"#;
        let envelope = EventEnvelope::parse(raw).unwrap();
        let value: Value = serde_json::from_str(&envelope.to_json().unwrap()).unwrap();

        assert_eq!(value["type"], "profile_updated");
        assert_eq!(value["data"], json!({"id": "42"}));
        assert!(value.get("message").is_none());

        let heartbeat = EventEnvelope::parse(r#"{"type":"heartbeat"}"#).unwrap();
        let value: Value = serde_json::from_str(&heartbeat.to_json().unwrap()).unwrap();
        assert!(value.get("data").is_none());
    }

    #[test]
    fn test_event_kind_from_str() {
        for kind in EventKind::ALL {
            assert_eq!(kind.as_str().parse::<EventKind>().unwrap(), kind);
        }
        assert!("Profile_Updated".parse::<EventKind>().is_err());
    }
}
