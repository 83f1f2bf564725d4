//! Construction-time settings of streamers and providers.
//!
//! Durations are whole seconds in the files and `std::time::Duration` in code.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::container::{UpdateMode, Value};
use crate::parser::ParserKind;

fn default_interval() -> u64 {
    60
}

fn default_expire_check_interval() -> u64 {
    5
}

/// # Local File Streamer Config
///
/// ```yaml
/// name: users
/// path: /var/lib/bifrost/users.tsv
/// update_mode: incremental     # or full_replace (default)
/// interval: 30
/// is_sync: true
/// parser: kv_lines             # kv_lines | json_lines | json_document
/// user_data: { separator: ",", key_type: int }
/// fetch_timeout: 10
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalFileStreamerCfg {
    /// Unique streamer name.
    pub name: String,
    /// File to follow.
    pub path: PathBuf,
    /// How batches are merged.
    #[serde(default)]
    pub update_mode: UpdateMode,
    /// Seconds between cycles; must be positive.
    #[serde(default = "default_interval")]
    pub interval: u64,
    /// Complete the first cycle before the streamer is registered.
    #[serde(default)]
    pub is_sync: bool,
    /// Built-in parser to use.
    #[serde(default)]
    pub parser: ParserKind,
    /// Context handed to the parser.
    #[serde(default)]
    pub user_data: Value,
    /// Seconds a single fetch may take.
    #[serde(default)]
    pub fetch_timeout: Option<u64>,
}

impl LocalFileStreamerCfg {
    /// A config with every optional field at its default.
    pub fn new(name: impl Into<String>, path: impl AsRef<Path>) -> Self {
        Self {
            name: name.into(),
            path: path.as_ref().to_path_buf(),
            update_mode: UpdateMode::default(),
            interval: default_interval(),
            is_sync: false,
            parser: ParserKind::default(),
            user_data: Value::Null,
            fetch_timeout: None,
        }
    }

    /// `interval` as a `Duration`.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    /// `fetch_timeout` as a `Duration`.
    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout.map(Duration::from_secs)
    }
}

/// # Streamer Provider Config
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamerProviderCfg {
    /// Provider name, used in logs.
    pub name: String,
    /// Seconds without a successful refresh after which a streamer is evicted;
    /// `0` keeps streamers forever.
    #[serde(default)]
    pub expire_time: u64,
    /// Seconds between two eviction sweeps.
    #[serde(default = "default_expire_check_interval")]
    pub expire_check_interval: u64,
}

impl Default for StreamerProviderCfg {
    fn default() -> Self {
        Self {
            name: "bifrost".to_string(),
            expire_time: 0,
            expire_check_interval: default_expire_check_interval(),
        }
    }
}

impl StreamerProviderCfg {
    /// A provider config that never evicts.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// `expire_time` as a `Duration`; zero disables eviction.
    pub fn expire_time(&self) -> Duration {
        Duration::from_secs(self.expire_time)
    }

    /// `expire_check_interval` as a `Duration`.
    pub fn expire_check_interval(&self) -> Duration {
        Duration::from_secs(self.expire_check_interval)
    }
}
