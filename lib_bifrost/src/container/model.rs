//! Keys, values and record modes shared by parsers and containers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque value stored in a container.
pub type Value = serde_json::Value;

/// # Map Key
///
/// The comparable key of a container entry. Integer and string keys never
/// compare equal to each other, so `Int(1)` and `Str("1")` are distinct keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MapKey {
    /// A signed integer key.
    Int(i64),
    /// A string key.
    Str(String),
}

impl fmt::Display for MapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapKey::Int(v) => write!(f, "{}", v),
            MapKey::Str(v) => f.write_str(v),
        }
    }
}

impl From<i64> for MapKey {
    fn from(v: i64) -> Self {
        MapKey::Int(v)
    }
}

impl From<&str> for MapKey {
    fn from(v: &str) -> Self {
        MapKey::Str(v.to_string())
    }
}

impl From<String> for MapKey {
    fn from(v: String) -> Self {
        MapKey::Str(v)
    }
}

/// How a single record is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DataMode {
    /// Insert the key or replace its value.
    #[default]
    #[serde(alias = "add", alias = "update")]
    Upsert,
    /// Remove the key.
    #[serde(alias = "del")]
    Delete,
    /// Part of a full dataset; only valid inside a full-replace merge, where it
    /// behaves like `Upsert`.
    FullReplace,
}

impl DataMode {
    /// Parses the textual mode tags accepted in data files.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "upsert" | "add" | "update" => Some(DataMode::Upsert),
            "delete" | "del" => Some(DataMode::Delete),
            "full_replace" | "full" => Some(DataMode::FullReplace),
            _ => None,
        }
    }
}

/// How a whole batch is applied to a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UpdateMode {
    /// Apply every record on top of the current version.
    Incremental,
    /// Discard the current version; the batch is the whole dataset.
    #[default]
    FullReplace,
}

/// # Record
///
/// One successfully parsed unit of source data.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// How the record is applied.
    pub mode: DataMode,
    /// Target key.
    pub key: MapKey,
    /// New value; `Value::Null` for deletes.
    pub value: Value,
}

impl Record {
    /// An upsert of `key` to `value`.
    pub fn upsert(key: impl Into<MapKey>, value: impl Into<Value>) -> Self {
        Self {
            mode: DataMode::Upsert,
            key: key.into(),
            value: value.into(),
        }
    }

    /// A delete of `key`.
    pub fn delete(key: impl Into<MapKey>) -> Self {
        Self {
            mode: DataMode::Delete,
            key: key.into(),
            value: Value::Null,
        }
    }
}
