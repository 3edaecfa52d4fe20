//! Healthdash CLI - live updates and realtime control requests.

mod commands;
mod output;

use clap::{Parser, Subcommand};
use healthdash_config::{init_logging, Config, LogConfig, Paths};
use realtime_client::Severity;
use std::path::PathBuf;
use tracing::debug;

/// Healthdash CLI - Follow live dashboard updates and poke the realtime API.
#[derive(Parser)]
#[command(name = "healthdash")]
#[command(about = "Healthdash CLI for live updates and realtime control requests")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(short, long, default_value = "text", global = true)]
    format: output::OutputFormat,

    /// Log level (trace, debug, info, warn, error); defaults to the config file
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// API base URL; defaults to the config file
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Session token
    #[arg(long, env = "HEALTHDASH_TOKEN", global = true, hide_env_values = true)]
    token: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream live events until interrupted
    Listen,

    /// Show server-side connection counters
    Status,

    /// Push a notification to your sessions
    Notify {
        /// Notification text
        #[arg(short, long)]
        message: String,
        /// Notification title
        #[arg(short, long)]
        title: Option<String>,
        /// Severity (info, success, warning, error)
        #[arg(short, long, default_value = "info")]
        severity: output::SeverityArg,
    },

    /// Push a profile snapshot (JSON file) to your sessions
    PushProfile {
        /// Path to a JSON object with at least an `id` field
        file: PathBuf,
    },

    /// Print the locally cached user snapshot
    CachedUser,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = run(cli).await;
    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let paths = Paths::new()?;
    let mut config = Config::load(&paths)?;
    if let Some(api_url) = cli.api_url {
        config.api_url = api_url;
        config.api_url()?;
    }
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }

    if let Err(e) = init_logging(LogConfig {
        service_name: "healthdash-cli".into(),
        default_level: config.log_level.clone(),
        log_path: Some(paths.log_file()),
        also_stderr: false,
    }) {
        eprintln!("Warning: logging disabled: {}", e);
    }
    debug!(api_url = %config.api_url, "Configuration loaded");

    let ctx = commands::Context {
        config,
        paths,
        token: cli.token,
        format: cli.format,
    };

    match cli.command {
        Commands::Listen => commands::listen(&ctx).await,
        Commands::Status => commands::status(&ctx).await,
        Commands::Notify {
            message,
            title,
            severity,
        } => commands::notify(&ctx, &message, title.as_deref(), Severity::from(severity)).await,
        Commands::PushProfile { file } => commands::push_profile(&ctx, &file).await,
        Commands::CachedUser => commands::cached_user(&ctx),
    }
}
