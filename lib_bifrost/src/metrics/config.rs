//! # Metrics Configuration
//!
//! The metrics file names the namespace/subsystem every metric is created under
//! and which backends are switched on:
//!
//! ```yaml
//! Open:
//!   Prometheus: true
//! MonitorSystem:
//!   Default:
//!     Namespace: bifrost
//!     Subsystem: streamer
//!     Name: requests_total      # only needed for MetricsFactory::default_opts
//!     Help: Requests served
//! ```
//!
//! Loading never panics: a wrong extension or a malformed file is returned as a
//! `MetricsError`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::MetricsError;

/// Which backends receive observations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct OpenBackends {
    /// Report to Prometheus.
    pub prometheus: bool,
}

/// Naming applied to every metric.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct MetricDefaults {
    /// Prometheus namespace (first name segment).
    pub namespace: String,
    /// Prometheus subsystem (second name segment).
    pub subsystem: String,
    /// Name of the default metric.
    pub name: Option<String>,
    /// Help text of the default metric.
    pub help: Option<String>,
}

/// The `MonitorSystem` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct MonitorSystem {
    /// Defaults shared by all metrics.
    pub default: MetricDefaults,
}

/// # Metrics Config
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct MetricsConfig {
    /// Enabled backends.
    pub open: OpenBackends,
    /// Naming defaults.
    pub monitor_system: MonitorSystem,
}

impl MetricsConfig {
    /// A config with the Prometheus backend enabled under `namespace`/`subsystem`.
    pub fn prometheus(namespace: &str, subsystem: &str) -> Self {
        Self {
            open: OpenBackends { prometheus: true },
            monitor_system: MonitorSystem {
                default: MetricDefaults {
                    namespace: namespace.to_string(),
                    subsystem: subsystem.to_string(),
                    ..Default::default()
                },
            },
        }
    }

    /// Parses a YAML document.
    pub fn from_yaml(text: &str) -> Result<Self, MetricsError> {
        Ok(serde_yml::from_str(text)?)
    }

    /// Loads a `.yaml`/`.yml` file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, MetricsError> {
        let path = path.as_ref();
        let is_yaml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext == "yaml" || ext == "yml");
        if !is_yaml {
            return Err(MetricsError::UnsupportedFormat(path.display().to_string()));
        }
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }
}
