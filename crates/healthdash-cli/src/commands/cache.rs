//! Local snapshot inspection.

use super::Context;
use crate::output::{self, OutputFormat};
use anyhow::Result;
use serde_json::Value;

/// Print the cached user snapshot.
pub fn cached_user(ctx: &Context) -> Result<()> {
    let snapshot: Option<Value> = ctx.snapshot_cache()?.reader().read()?;

    match (snapshot, ctx.format) {
        (Some(user), OutputFormat::Json) => output::print_json(&user),
        (Some(Value::Object(fields)), OutputFormat::Text) => {
            output::print_heading("Cached User");
            for (key, value) in &fields {
                let rendered = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                output::print_row(key, &rendered);
            }
        }
        (Some(other), OutputFormat::Text) => println!("{}", other),
        (None, OutputFormat::Json) => output::print_json(&Value::Null),
        (None, OutputFormat::Text) => println!("No cached user"),
    }
    Ok(())
}
