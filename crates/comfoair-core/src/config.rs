//! Manager configuration
//!
//! One JSON document describing the link, the engine timeouts and which
//! command groups are polled how often.
//!
//! ```json
//! {
//!   "connection": { "transport": { "type": "tcp", "address": "10.0.0.5:8899" } },
//!   "engine": { "ack_timeout": 5, "data_timeout": 10, "max_retry": 3 },
//!   "polling": {
//!     "enabled": true,
//!     "groups": [ { "label": "temperatures", "interval_secs": 60 } ]
//!   }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::protocol::{CommandCatalog, ConnectionConfig, EngineConfig, Transport};

/// Errors while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read or written
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid JSON
    #[error("Invalid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    /// Config parsed but holds an unusable value
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Poll interval of one command group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollGroupConfig {
    /// Catalog label of a pollable read command
    pub label: String,
    /// Seconds between polls, 0 disables the group
    #[serde(default)]
    pub interval_secs: u64,
    /// Switch the group off without losing its interval
    #[serde(default = "default_group_enabled")]
    pub enabled: bool,
}

fn default_group_enabled() -> bool {
    true
}

impl PollGroupConfig {
    /// Enabled group polled every `interval_secs`
    pub fn new(label: impl Into<String>, interval_secs: u64) -> Self {
        Self {
            label: label.into(),
            interval_secs,
            enabled: true,
        }
    }

    /// Same group, switched off
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Periodic polling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Master switch for all groups
    pub enabled: bool,
    /// Groups to poll
    pub groups: Vec<PollGroupConfig>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            groups: Vec::new(),
        }
    }
}

/// Complete manager configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Link to the unit
    pub connection: ConnectionConfig,
    /// Timeouts and retry budget
    pub engine: EngineConfig,
    /// Periodic reads
    pub polling: PollConfig,
}

impl ManagerConfig {
    /// Load and validate against the built-in catalog
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Parse and validate against the built-in catalog
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: ManagerConfig = serde_json::from_str(json)?;
        config.validate(&CommandCatalog::comfoair())?;
        Ok(config)
    }

    /// Write as pretty JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Check values serde cannot check
    pub fn validate(&self, catalog: &CommandCatalog) -> Result<(), ConfigError> {
        if self.engine.ack_timeout.is_zero() {
            return Err(ConfigError::Invalid("ack_timeout must be positive".into()));
        }
        if self.engine.data_timeout.is_zero() {
            return Err(ConfigError::Invalid("data_timeout must be positive".into()));
        }
        if self.connection.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("tick_interval_ms must be positive".into()));
        }

        match &self.connection.transport {
            Transport::Serial { port_name, baud_rate } => {
                if port_name.trim().is_empty() {
                    return Err(ConfigError::Invalid("serial port name is empty".into()));
                }
                if *baud_rate == 0 {
                    return Err(ConfigError::Invalid("baud_rate must be positive".into()));
                }
            }
            Transport::Tcp { address } => {
                if !address.contains(':') {
                    return Err(ConfigError::Invalid(format!(
                        "tcp address '{}' needs host:port",
                        address
                    )));
                }
            }
        }

        for group in &self.polling.groups {
            match catalog.find_by_label(&group.label) {
                Some(desc) if desc.pollable => {}
                Some(_) => {
                    return Err(ConfigError::Invalid(format!(
                        "poll group '{}' is not pollable",
                        group.label
                    )))
                }
                None => {
                    return Err(ConfigError::Invalid(format!(
                        "unknown poll group '{}'",
                        group.label
                    )))
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = ManagerConfig::from_json_str("{}").unwrap();
        assert_eq!(config, ManagerConfig::default());
        assert_eq!(config.engine.data_timeout, Duration::from_secs(10));
        assert!(config.polling.enabled);
    }

    #[test]
    fn test_unknown_group_rejected() {
        let err = ManagerConfig::from_json_str(
            r#"{ "polling": { "groups": [ { "label": "nope", "interval_secs": 5 } ] } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(ref msg) if msg.contains("nope")));
    }

    #[test]
    fn test_write_group_rejected() {
        let err = ManagerConfig::from_json_str(
            r#"{ "polling": { "groups": [ { "label": "set_ventilation_level", "interval_secs": 5 } ] } }"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("not pollable"));
    }

    #[test]
    fn test_group_enabled_defaults_on() {
        let config = ManagerConfig::from_json_str(
            r#"{ "polling": { "groups": [
                { "label": "temperatures", "interval_secs": 60 },
                { "label": "faults", "interval_secs": 300, "enabled": false }
            ] } }"#,
        )
        .unwrap();
        assert!(config.polling.groups[0].enabled);
        assert_eq!(
            config.polling.groups[1],
            PollGroupConfig::new("faults", 300).disabled()
        );
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err = ManagerConfig::from_json_str(r#"{ "engine": { "ack_timeout": 0 } }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_bad_json() {
        assert!(matches!(
            ManagerConfig::from_json_str("{ nope").unwrap_err(),
            ConfigError::Parse(_)
        ));
    }
}
