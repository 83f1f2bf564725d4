//! # Key/Value Line Parser
//!
//! One record per line: `key<sep>value`, or `mode<sep>key<sep>value` when the
//! `with_mode` option is set. Blank lines and lines starting with `#` are ignored.
//!
//! Options, read from the streamer's `user_data` object:
//!
//! | key         | default  | meaning                                      |
//! |-------------|----------|----------------------------------------------|
//! | `separator` | `"\t"`   | column separator                             |
//! | `key_type`  | `string` | `string` or `int`                            |
//! | `with_mode` | `false`  | first column is `upsert`/`add`/`update`/`delete`/`del` |
//!
//! Values are decoded as JSON when they parse as JSON (`42`, `true`, `{"a":1}`),
//! otherwise they are stored as strings.

use crate::container::{DataMode, MapKey, Record, Value};

use super::{decode_utf8, DataParser, ParseError, ParserResult};

/// Options controlling `KvLineParser`.
#[derive(Debug, Clone, PartialEq)]
struct LineOptions {
    separator: String,
    int_keys: bool,
    with_mode: bool,
}

impl LineOptions {
    fn from_user_data(user_data: &Value) -> Self {
        let separator = user_data
            .get("separator")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or("\t")
            .to_string();
        let int_keys = user_data.get("key_type").and_then(Value::as_str) == Some("int");
        let with_mode = user_data
            .get("with_mode")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        Self {
            separator,
            int_keys,
            with_mode,
        }
    }
}

/// # KV Line Parser
#[derive(Debug, Clone, Copy, Default)]
pub struct KvLineParser;

impl KvLineParser {
    fn parse_line(line: &str, unit: usize, opts: &LineOptions) -> ParserResult {
        let malformed = |reason: String| ParseError::Malformed { unit, reason };

        let mut columns = line.splitn(if opts.with_mode { 3 } else { 2 }, opts.separator.as_str());
        let mode = if opts.with_mode {
            let tag = columns.next().unwrap_or_default();
            DataMode::from_tag(tag).ok_or_else(|| malformed(format!("unknown mode '{}'", tag)))?
        } else {
            DataMode::Upsert
        };

        let raw_key = columns.next().unwrap_or_default().trim();
        if raw_key.is_empty() {
            return Err(malformed("empty key".to_string()));
        }
        let key = if opts.int_keys {
            raw_key
                .parse::<i64>()
                .map(MapKey::Int)
                .map_err(|e| malformed(format!("key '{}' is not an integer: {}", raw_key, e)))?
        } else {
            MapKey::from(raw_key)
        };

        let value = match (mode, columns.next()) {
            (DataMode::Delete, _) => Value::Null,
            (_, Some(raw)) => decode_value(raw.trim()),
            (_, None) => return Err(malformed(format!("missing value for key '{}'", key))),
        };

        Ok(Record { mode, key, value })
    }
}

fn decode_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

impl DataParser for KvLineParser {
    fn parse(&self, raw: &[u8], user_data: &Value) -> Vec<ParserResult> {
        let text = match decode_utf8(raw) {
            Ok(text) => text,
            Err(err) => return vec![Err(err)],
        };
        let opts = LineOptions::from_user_data(user_data);

        text.lines()
            .enumerate()
            .filter(|(_, line)| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with('#')
            })
            .map(|(unit, line)| Self::parse_line(line, unit, &opts))
            .collect()
    }
}
