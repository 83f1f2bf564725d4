//! # Configuration Module
//!
//! Loads the YAML file describing one provider and the streamers it runs:
//!
//! ```yaml
//! provider:
//!   name: catalog
//!   expire_time: 600
//! streamers:
//!   - name: users
//!     path: data/users.tsv
//!     interval: 30
//!     is_sync: true
//! metrics:
//!   Open: { Prometheus: true }
//!   MonitorSystem: { Default: { Namespace: bifrost, Subsystem: catalog } }
//! ```
//!
//! A bad path, a malformed file or an inconsistent setting is returned as a
//! `ConfigError`. Nothing here panics.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::metrics::MetricsConfig;

/// Streamer and provider settings.
pub mod streamers;

pub use streamers::{LocalFileStreamerCfg, StreamerProviderCfg};

/// # Config Error
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Only YAML files are accepted.
    #[error("config must be a .yaml/.yml file, got {0}")]
    UnsupportedFormat(String),
    /// The file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not valid YAML for `BifrostConfig`.
    #[error("invalid config: {0}")]
    Yaml(#[from] serde_yml::Error),
    /// The file parsed but its settings are inconsistent.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// # Bifrost Config
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BifrostConfig {
    /// Provider settings.
    #[serde(default)]
    pub provider: StreamerProviderCfg,
    /// Streamers to register, in order.
    #[serde(default)]
    pub streamers: Vec<LocalFileStreamerCfg>,
    /// Metrics settings; absent means no metrics.
    #[serde(default)]
    pub metrics: Option<MetricsConfig>,
}

impl BifrostConfig {
    /// Parses and validates a YAML document.
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a `.yaml`/`.yml` file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let is_yaml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext == "yaml" || ext == "yml");
        if !is_yaml {
            return Err(ConfigError::UnsupportedFormat(path.display().to_string()));
        }
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    /// Checks names and intervals.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.provider.name.trim().is_empty() {
            return Err(ConfigError::Invalid("provider name is empty".into()));
        }
        if self.provider.expire_time > 0 && self.provider.expire_check_interval == 0 {
            return Err(ConfigError::Invalid(
                "expire_check_interval must be positive when expire_time is set".into(),
            ));
        }

        let mut seen = HashSet::new();
        for streamer in &self.streamers {
            if streamer.name.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "streamer for {} has an empty name",
                    streamer.path.display()
                )));
            }
            if !seen.insert(streamer.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate streamer name '{}'",
                    streamer.name
                )));
            }
            if streamer.interval == 0 {
                return Err(ConfigError::Invalid(format!(
                    "streamer '{}' has a zero interval",
                    streamer.name
                )));
            }
            if streamer.fetch_timeout == Some(0) {
                return Err(ConfigError::Invalid(format!(
                    "streamer '{}' has a zero fetch_timeout",
                    streamer.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::UpdateMode;
    use crate::parser::ParserKind;
    use serde_json::json;
    use std::io::Write;
    use std::time::Duration;

    const SAMPLE: &str = r#"
provider:
  name: catalog
  expire_time: 600
streamers:
  - name: users
    path: data/users.tsv
    update_mode: incremental
    interval: 30
    is_sync: true
    user_data:
      separator: ","
      key_type: int
  - name: prices
    path: data/prices.json
    parser: json_document
    fetch_timeout: 3
metrics:
  Open:
    Prometheus: true
  MonitorSystem:
    Default:
      Namespace: bifrost
      Subsystem: catalog
"#;

    #[test]
    fn test_full_document() {
        let config = BifrostConfig::from_yaml(SAMPLE).unwrap();

        assert_eq!(config.provider.name, "catalog");
        assert_eq!(config.provider.expire_time(), Duration::from_secs(600));
        assert_eq!(config.provider.expire_check_interval(), Duration::from_secs(5));

        let users = &config.streamers[0];
        assert_eq!(users.update_mode, UpdateMode::Incremental);
        assert_eq!(users.interval(), Duration::from_secs(30));
        assert!(users.is_sync);
        assert_eq!(users.parser, ParserKind::KvLines);
        assert_eq!(users.user_data, json!({"separator": ",", "key_type": "int"}));

        let prices = &config.streamers[1];
        assert_eq!(prices.update_mode, UpdateMode::FullReplace);
        assert_eq!(prices.interval, 60);
        assert_eq!(prices.parser, ParserKind::JsonDocument);
        assert_eq!(prices.fetch_timeout(), Some(Duration::from_secs(3)));

        assert!(config.metrics.unwrap().open.prometheus);
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let text = "streamers:\n  - { name: a, path: x }\n  - { name: a, path: y }\n";
        let err = BifrostConfig::from_yaml(text).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("duplicate")));
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let text = "streamers:\n  - { name: a, path: x, interval: 0 }\n";
        assert!(matches!(
            BifrostConfig::from_yaml(text),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_unknown_parser_is_a_yaml_error() {
        let text = "streamers:\n  - { name: a, path: x, parser: csv }\n";
        assert!(matches!(
            BifrostConfig::from_yaml(text),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        assert_eq!(BifrostConfig::from_file(file.path()).unwrap().streamers.len(), 2);

        let err = BifrostConfig::from_file("bifrost.toml").unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat(_)));

        let err = BifrostConfig::from_file("/nonexistent/bifrost.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
