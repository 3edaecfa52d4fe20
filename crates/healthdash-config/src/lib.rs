//! Configuration, filesystem paths, and logging for Healthdash.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{Config, RealtimeSettings, DEFAULT_API_URL, DEFAULT_LOG_LEVEL};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, parse_level, LogConfig};
pub use paths::Paths;
