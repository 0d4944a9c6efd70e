//! Logger configuration

mod presets;

use serde::{Deserialize, Serialize};

/// Output format of log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// Multi-line, human oriented.
    Pretty,
    /// One line per event.
    #[default]
    Compact,
    /// Newline-delimited JSON.
    Json,
}

impl Format {
    /// Parse a format name; unknown names fall back to [`Format::Compact`].
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "pretty" => Self::Pretty,
            "json" => Self::Json,
            _ => Self::Compact,
        }
    }
}

/// What each line shows besides the message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// ANSI colors.
    pub colors: bool,
    /// Source file and line.
    pub source: bool,
    /// Event target (module path).
    pub target: bool,
    /// Put event fields at the top level of JSON lines.
    pub flatten: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            colors: true,
            source: false,
            target: true,
            flatten: false,
        }
    }
}

/// Logger configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// `EnvFilter` directive, e.g. `info,trellis_resource=debug`.
    pub level: String,
    pub format: Format,
    pub display: DisplayConfig,
    /// Recorded on a root span wrapping everything logged afterwards.
    pub service: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: Format::default(),
            display: DisplayConfig::default(),
            service: None,
        }
    }
}
