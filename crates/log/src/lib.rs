//! # Trellis Log
//!
//! Logging bootstrap on top of `tracing-subscriber`: a level filter, an output
//! format and a couple of presets.
//!
//! ```rust,ignore
//! let _guard = trellis_log::init(trellis_log::Config::from_env())?;
//! tracing::info!("ready");
//! ```

mod builder;
mod config;
mod error;

pub use builder::{LoggerBuilder, LoggerGuard};
pub use config::{Config, DisplayConfig, Format};
pub use error::{LogError, LogResult};

/// Install the global subscriber described by `config`.
///
/// Keep the returned guard alive for as long as logging is needed.
pub fn init(config: Config) -> LogResult<LoggerGuard> {
    LoggerBuilder::from_config(config).build()
}

/// Install a subscriber for tests, writing through the test harness.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_test() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
