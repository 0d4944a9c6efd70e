//! Manager configuration.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default capacity of the event channel.
pub const DEFAULT_EVENT_BUFFER: usize = 1024;

/// Settings of a [`ResourceManager`](crate::manager::ResourceManager).
///
/// Every field has a default, so partial JSON documents are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Capacity of the event broadcast channel.
    pub event_buffer: usize,
    /// Persist auto-save collections as soon as they change while running.
    pub auto_save: bool,
    /// Run registered initializers during `initialize` when storage is empty.
    pub bootstrap_when_empty: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            event_buffer: DEFAULT_EVENT_BUFFER,
            auto_save: true,
            bootstrap_when_empty: true,
        }
    }
}

impl ManagerConfig {
    /// Validate the configuration, returning an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.event_buffer == 0 {
            return Err(Error::configuration(
                "event_buffer must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Parse and validate a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::configuration(format!("invalid manager config: {e}")))?;
        config.validate()?;
        Ok(config)
    }
}
