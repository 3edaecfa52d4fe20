//! Live event streaming.

use super::Context;
use crate::output::{self, OutputFormat};
use anyhow::Result;
use realtime_client::{
    listener, EventEnvelope, EventPayload, ListenerKey, PlatformBus, PlatformEvent, RealtimeClient,
};
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Connect and print every event until Ctrl-C.
pub async fn listen(ctx: &Context) -> Result<()> {
    let token = ctx.require_token()?;
    let bus = PlatformBus::default();
    let client = RealtimeClient::new(ctx.realtime_config(), ctx.snapshot_cache()?, bus.clone())?;

    let format = ctx.format;
    client.add_event_listener(
        ListenerKey::Wildcard,
        listener(move |envelope| print_envelope(envelope, format)),
    );
    let mut platform = bus.subscribe();

    client.connect(token);
    info!("Listening for live updates");
    if format == OutputFormat::Text {
        println!("Listening for live updates (Ctrl-C to stop)...");
    }

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            event = platform.recv() => match event {
                Ok(event) => print_platform_event(&event, format),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Dropped platform events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    client.disconnect();
    if format == OutputFormat::Text {
        println!("Disconnected.");
    }
    Ok(())
}

fn print_envelope(envelope: &EventEnvelope, format: OutputFormat) {
    match format {
        OutputFormat::Json => match envelope.to_json() {
            Ok(line) => println!("{}", line),
            Err(e) => warn!(error = %e, "Failed to encode event"),
        },
        OutputFormat::Text => {
            let time = envelope
                .timestamp
                .with_timezone(&chrono::Local)
                .format("%H:%M:%S");
            let origin = if envelope.is_synthetic() { " (local)" } else { "" };
            let detail = match &envelope.payload {
                EventPayload::None => envelope.message.clone().unwrap_or_default(),
                EventPayload::User(user) => format!("user {}", user.id()),
                EventPayload::Notification(n) => match &n.title {
                    Some(title) => format!("[{:?}] {}: {}", n.severity, title, n.message),
                    None => format!("[{:?}] {}", n.severity, n.message),
                },
                EventPayload::DisplaySettings(display) => {
                    serde_json::to_string(display.as_map()).unwrap_or_default()
                }
            };
            println!("{} {}{} {}", time, envelope.kind, origin, detail);
        }
    }
}

fn print_platform_event(event: &PlatformEvent, format: OutputFormat) {
    let detail = match event {
        PlatformEvent::UserDataUpdated(user) => json!(user),
        PlatformEvent::DisplaySettingsUpdated(display) => json!(display),
        PlatformEvent::RealtimeNotification(notification) => json!(notification),
    };
    match format {
        OutputFormat::Json => {
            output::print_json_line(&json!({"topic": event.topic().as_str(), "detail": detail}))
        }
        OutputFormat::Text => println!("  -> {} {}", event.topic(), detail),
    }
}
