//! One-shot realtime control requests.

use super::Context;
use crate::output::{self, OutputFormat};
use anyhow::{Context as _, Result};
use realtime_client::{NotificationDescriptor, Severity, UserSnapshot};
use std::path::Path;

/// Show server-side connection counters.
pub async fn status(ctx: &Context) -> Result<()> {
    let token = ctx.require_token()?;
    let status = ctx.control_client()?.connection_status(token).await?;

    match ctx.format {
        OutputFormat::Text => {
            output::print_heading("Realtime Status");
            output::print_row("Total connections", &status.total_connections.to_string());
            output::print_row("Connected users", &status.connected_users.to_string());
            if let Some(mine) = status.user_connections {
                output::print_row("Your connections", &mine.to_string());
            }
        }
        OutputFormat::Json => output::print_json(&status),
    }
    Ok(())
}

/// Push a notification to the user's sessions.
pub async fn notify(
    ctx: &Context,
    message: &str,
    title: Option<&str>,
    severity: Severity,
) -> Result<()> {
    let token = ctx.require_token()?;
    let mut notification = NotificationDescriptor::new(severity, message);
    if let Some(title) = title {
        notification = notification.with_title(title);
    }

    ctx.control_client()?
        .send_notification(token, &notification)
        .await?;
    output::print_success("Notification sent", &ctx.format);
    Ok(())
}

/// Push a profile snapshot read from a JSON file.
pub async fn push_profile(ctx: &Context, file: &Path) -> Result<()> {
    let token = ctx.require_token()?;
    let user = read_profile(file)?;

    ctx.control_client()?
        .trigger_profile_update(token, &user)
        .await?;
    output::print_success(&format!("Profile update for user {} sent", user.id()), &ctx.format);
    Ok(())
}

fn read_profile(file: &Path) -> Result<UserSnapshot> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("{} is not a valid profile snapshot", file.display()))
}
