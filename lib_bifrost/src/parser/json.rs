//! # JSON Parsers
//!
//! - `JsonLinesParser`: one object per line, `{"key": .., "value": .., "mode": ..}`.
//!   `mode` is optional and defaults to `upsert`; `value` may be omitted for deletes.
//! - `JsonDocumentParser`: the whole buffer is one object mapping keys to values.
//!   Every entry becomes an upsert. Numeric-looking keys stay string keys unless
//!   `user_data.key_type` is `"int"`.

use serde::Deserialize;

use crate::container::{DataMode, MapKey, Record, Value};

use super::{decode_utf8, DataParser, ParseError, ParserResult};

#[derive(Debug, Deserialize)]
struct JsonLine {
    key: MapKey,
    #[serde(default)]
    value: Option<Value>,
    #[serde(default)]
    mode: DataMode,
}

/// # JSON Lines Parser
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonLinesParser;

impl DataParser for JsonLinesParser {
    fn parse(&self, raw: &[u8], _user_data: &Value) -> Vec<ParserResult> {
        let text = match decode_utf8(raw) {
            Ok(text) => text,
            Err(err) => return vec![Err(err)],
        };

        text.lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(unit, line)| -> ParserResult {
                let parsed: JsonLine =
                    serde_json::from_str(line).map_err(|e| ParseError::Malformed {
                        unit,
                        reason: e.to_string(),
                    })?;
                match (parsed.mode, parsed.value) {
                    (DataMode::Delete, _) => Ok(Record::delete(parsed.key)),
                    (mode, Some(value)) => Ok(Record {
                        mode,
                        key: parsed.key,
                        value,
                    }),
                    (_, None) => Err(ParseError::Malformed {
                        unit,
                        reason: format!("missing value for key '{}'", parsed.key),
                    }),
                }
            })
            .collect()
    }
}

/// # JSON Document Parser
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDocumentParser;

impl DataParser for JsonDocumentParser {
    fn parse(&self, raw: &[u8], user_data: &Value) -> Vec<ParserResult> {
        let document: Value = match serde_json::from_slice(raw) {
            Ok(document) => document,
            Err(e) => return vec![Err(ParseError::Undecodable(e.to_string()))],
        };
        let Value::Object(entries) = document else {
            return vec![Err(ParseError::Undecodable(
                "top-level JSON value is not an object".to_string(),
            ))];
        };
        let int_keys = user_data.get("key_type").and_then(Value::as_str) == Some("int");

        entries
            .into_iter()
            .enumerate()
            .map(|(unit, (key, value))| -> ParserResult {
                let key = if int_keys {
                    key.parse::<i64>()
                        .map(MapKey::Int)
                        .map_err(|e| ParseError::Malformed {
                            unit,
                            reason: format!("key '{}' is not an integer: {}", key, e),
                        })?
                } else {
                    MapKey::Str(key)
                };
                Ok(Record::upsert(key, value))
            })
            .collect()
    }
}
