//! Configuration presets for common scenarios

use super::{Config, DisplayConfig, Format};

impl Config {
    /// Create configuration from environment variables
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `lookup`.
    ///
    /// `TRELLIS_LOG` wins over `RUST_LOG`; `TRELLIS_LOG_FORMAT` and
    /// `TRELLIS_SERVICE` are optional.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(level) = lookup("TRELLIS_LOG").or_else(|| lookup("RUST_LOG")) {
            config.level = level;
        }
        if let Some(format) = lookup("TRELLIS_LOG_FORMAT") {
            config.format = Format::from_name(&format);
        }
        if config.format == Format::Json {
            config.display.colors = false;
        }
        config.service = lookup("TRELLIS_SERVICE").filter(|service| !service.is_empty());

        config
    }

    /// Development configuration (pretty, debug level)
    #[must_use]
    pub fn development() -> Self {
        Self {
            level: "debug".to_string(),
            format: Format::Pretty,
            display: DisplayConfig {
                colors: true,
                source: true,
                ..DisplayConfig::default()
            },
            ..Self::default()
        }
    }

    /// Production configuration (JSON, info level)
    #[must_use]
    pub fn production() -> Self {
        Self {
            level: "info".to_string(),
            format: Format::Json,
            display: DisplayConfig {
                colors: false,
                source: false,
                flatten: true,
                ..DisplayConfig::default()
            },
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;

    use super::*;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        assert_eq!(Config::from_lookup(env(&[])), Config::default());
    }

    #[test]
    fn trellis_log_wins_over_rust_log() {
        let config = Config::from_lookup(env(&[
            ("RUST_LOG", "warn"),
            ("TRELLIS_LOG", "trellis_resource=trace"),
        ]));
        assert_eq!(config.level, "trellis_resource=trace");

        let config = Config::from_lookup(env(&[("RUST_LOG", "warn")]));
        assert_eq!(config.level, "warn");
    }

    #[test]
    fn json_format_turns_colors_off() {
        let config = Config::from_lookup(env(&[("TRELLIS_LOG_FORMAT", "JSON")]));
        assert_eq!(config.format, Format::Json);
        assert!(!config.display.colors);
    }

    #[test]
    fn unknown_format_is_compact() {
        assert_eq!(Format::from_name("logfmt"), Format::Compact);
        assert_eq!(Format::from_name(" pretty "), Format::Pretty);
    }

    #[test]
    fn presets_differ_in_format_and_level() {
        let dev = Config::development();
        let prod = Config::production();
        assert_eq!(dev.format, Format::Pretty);
        assert_eq!(prod.format, Format::Json);
        assert_eq!(dev.level, "debug");
        assert_eq!(prod.level, "info");
        assert!(prod.display.flatten);
    }

    #[test]
    fn config_deserializes_partially() {
        let config: Config = serde_json::from_str(r#"{ "format": "pretty" }"#).unwrap();
        assert_eq!(config.format, Format::Pretty);
        assert_eq!(config.level, "info");
    }
}
