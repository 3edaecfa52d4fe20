//! One-shot authenticated control requests.

use crate::envelope::{NotificationDescriptor, UserSnapshot};
use crate::error::{RealtimeError, RealtimeResult};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error};
use url::Url;

/// Server-side connection counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    #[serde(default, alias = "total_connections")]
    pub total_connections: u64,
    #[serde(default, alias = "connected_users")]
    pub connected_users: u64,
    /// Channels open for the calling user, when the server reports it.
    #[serde(default, alias = "user_connections", skip_serializing_if = "Option::is_none")]
    pub user_connections: Option<u64>,
}

#[derive(Serialize)]
struct ProfileUpdateRequest<'a> {
    user: &'a UserSnapshot,
}

#[derive(Serialize)]
struct NotificationRequest<'a> {
    notification: &'a NotificationDescriptor,
}

/// HTTP client for the realtime control endpoints.
#[derive(Debug, Clone)]
pub struct ControlClient {
    http: Client,
    api_url: Url,
}

impl ControlClient {
    pub fn new(api_url: Url, timeout: Duration) -> RealtimeResult<Self> {
        if api_url.cannot_be_a_base() {
            return Err(RealtimeError::Config(format!(
                "api url must be a base URL: {api_url}"
            )));
        }
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { http, api_url })
    }

    pub fn api_url(&self) -> &Url {
        &self.api_url
    }

    /// Ask the server to push `user` as a `profile_updated` event to the
    /// user's sessions.
    pub async fn trigger_profile_update(&self, token: &str, user: &UserSnapshot) -> RealtimeResult<()> {
        let token = require_token(token)?;
        let url = self.endpoint(&["realtime", "trigger-profile-update"])?;
        debug!(user_id = %user.id(), "Triggering profile update push");
        let request = self.http.post(url).json(&ProfileUpdateRequest { user });
        self.execute(token, request).await?;
        Ok(())
    }

    /// Ask the server to push a notification to the user's sessions.
    pub async fn send_notification(
        &self,
        token: &str,
        notification: &NotificationDescriptor,
    ) -> RealtimeResult<()> {
        let token = require_token(token)?;
        let url = self.endpoint(&["realtime", "send-notification"])?;
        debug!(severity = ?notification.severity, "Sending notification push");
        let request = self.http.post(url).json(&NotificationRequest { notification });
        self.execute(token, request).await?;
        Ok(())
    }

    /// Query server-side connection counters.
    pub async fn connection_status(&self, token: &str) -> RealtimeResult<ConnectionStatus> {
        let token = require_token(token)?;
        let url = self.endpoint(&["realtime", "status"])?;
        let body = self.execute(token, self.http.get(url)).await?;
        let status = match body {
            Value::Object(mut fields) => match fields.remove("data") {
                Some(data @ Value::Object(_)) => serde_json::from_value(data)?,
                _ => serde_json::from_value(Value::Object(fields))?,
            },
            other => serde_json::from_value(other)?,
        };
        Ok(status)
    }

    fn endpoint(&self, segments: &[&str]) -> RealtimeResult<Url> {
        let mut url = self.api_url.clone();
        url.path_segments_mut()
            .map_err(|_| RealtimeError::Config(format!("api url must be a base URL: {}", self.api_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Send with the bearer token and decode the JSON response envelope.
    async fn execute(&self, token: &str, request: RequestBuilder) -> RealtimeResult<Value> {
        let response = request.bearer_auth(token).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let message = error_message(&body)
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
            error!(status = status.as_u16(), %message, "Realtime API error");
            return Err(RealtimeError::Api {
                status: status.as_u16(),
                message,
            });
        }

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        let value: Value = serde_json::from_str(&body)?;
        if value.get("success").and_then(Value::as_bool) == Some(false) {
            let message = message_field(&value).unwrap_or_else(|| "request rejected".to_string());
            return Err(RealtimeError::Rejected(message));
        }
        Ok(value)
    }
}

fn require_token(token: &str) -> RealtimeResult<&str> {
    let token = token.trim();
    if token.is_empty() {
        Err(RealtimeError::NoToken)
    } else {
        Ok(token)
    }
}

/// Best human-readable message from an error body.
fn error_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => message_field(&value).or_else(|| Some(trimmed.to_string())),
        Err(_) => Some(trimmed.to_string()),
    }
}

fn message_field(value: &Value) -> Option<String> {
    ["error", "message"]
        .iter()
        .find_map(|key| value.get(key).and_then(Value::as_str))
        .map(str::to_string)
}
