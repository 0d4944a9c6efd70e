//! Logger builder implementation

use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, Format};
use crate::error::{LogError, LogResult};

/// Logger builder
#[derive(Debug)]
pub struct LoggerBuilder {
    config: Config,
}

/// Guard that keeps the logger alive
///
/// Holds the root span carrying the service name, if one was configured.
#[derive(Debug)]
pub struct LoggerGuard {
    _root_span: Option<tracing::span::EnteredSpan>,
}

impl LoggerBuilder {
    /// Create builder from config
    #[must_use]
    pub fn from_config(config: Config) -> Self {
        Self { config }
    }

    /// Build the filter this builder would install.
    pub fn filter(&self) -> LogResult<EnvFilter> {
        EnvFilter::try_new(&self.config.level)
            .map_err(|e| LogError::Filter(format!("{}: {e}", self.config.level)))
    }

    /// Build and initialize the logger
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Filter string cannot be parsed
    /// - A global subscriber is already installed
    pub fn build(self) -> LogResult<LoggerGuard> {
        let filter = self.filter()?;
        let display = &self.config.display;
        let registry = Registry::default().with(filter);

        let installed = match self.config.format {
            Format::Pretty => registry
                .with(
                    fmt::layer()
                        .pretty()
                        .with_ansi(display.colors)
                        .with_target(display.target)
                        .with_file(display.source)
                        .with_line_number(display.source),
                )
                .try_init(),
            Format::Compact => registry
                .with(
                    fmt::layer()
                        .compact()
                        .with_ansi(display.colors)
                        .with_target(display.target)
                        .with_file(display.source)
                        .with_line_number(display.source),
                )
                .try_init(),
            Format::Json => registry
                .with(
                    fmt::layer()
                        .json()
                        .flatten_event(display.flatten)
                        .with_current_span(true)
                        .with_target(display.target)
                        .with_file(display.source)
                        .with_line_number(display.source),
                )
                .try_init(),
        };
        installed.map_err(|e| LogError::Init(e.to_string()))?;

        let root_span = self
            .config
            .service
            .as_deref()
            .map(|service| tracing::info_span!("app", service).entered());

        Ok(LoggerGuard {
            _root_span: root_span,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_directive_is_a_filter_error() {
        let builder = LoggerBuilder::from_config(Config {
            level: "trellis=notalevel".to_string(),
            ..Config::default()
        });
        assert!(matches!(builder.filter(), Err(LogError::Filter(_))));
    }

    #[test]
    fn valid_directive_builds_a_filter() {
        let builder = LoggerBuilder::from_config(Config {
            level: "info,trellis_resource=debug".to_string(),
            ..Config::default()
        });
        assert!(builder.filter().is_ok());
    }
}
