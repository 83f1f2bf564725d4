//! # Data Parser Module
//!
//! Parsers turn the raw bytes fetched from a source into keyed, mode-tagged
//! records. They are pure: no I/O, no scheduling, no container access.
//!
//! ## Failure Reporting:
//! - A malformed unit (typically one line) yields one `Err(ParseError::Malformed)`
//!   in place of its record; parsing continues with the next unit.
//! - A buffer that cannot be decoded at all yields a single
//!   `Err(ParseError::Undecodable)` and nothing else. The streamer then treats the
//!   whole refresh as failed and keeps serving the previous data.
//!
//! Parsers never panic on bad input.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::container::{Record, Value};

/// JSON document and JSON-lines parsers.
pub mod json;
/// Delimited `key<sep>value` line parser.
pub mod lines;

pub use json::{JsonDocumentParser, JsonLinesParser};
pub use lines::KvLineParser;

/// # Parse Error
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ParseError {
    /// One unit of the input could not be turned into a record.
    #[error("unit {unit}: {reason}")]
    Malformed {
        /// Zero-based index of the unit (line number for line formats).
        unit: usize,
        /// What was wrong with it.
        reason: String,
    },
    /// The buffer as a whole is not in the expected format.
    #[error("undecodable input: {0}")]
    Undecodable(String),
}

/// Outcome of parsing one unit.
pub type ParserResult = Result<Record, ParseError>;

/// # Data Parser
///
/// `user_data` is the caller-supplied context from the streamer configuration
/// (`Value::Null` when none was given). Any caching is the parser's own business.
pub trait DataParser: Send + Sync {
    /// Parses `raw` into records, in source order.
    fn parse(&self, raw: &[u8], user_data: &Value) -> Vec<ParserResult>;
}

/// Returns `true` when the parser rejected the buffer as a whole, that is when
/// the only result is an `Undecodable` error. Batches of `Malformed` records
/// are still merged.
pub fn is_whole_buffer_failure(results: &[ParserResult]) -> bool {
    matches!(results, [Err(ParseError::Undecodable(_))])
}

/// Adapts a closure into a `DataParser`.
pub struct FnParser<F>(pub F);

impl<F> DataParser for FnParser<F>
where
    F: Fn(&[u8], &Value) -> Vec<ParserResult> + Send + Sync,
{
    fn parse(&self, raw: &[u8], user_data: &Value) -> Vec<ParserResult> {
        (self.0)(raw, user_data)
    }
}

/// # Parser Kind
///
/// Names the built-in parsers so configuration files can pick one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ParserKind {
    /// `KvLineParser`.
    #[default]
    KvLines,
    /// `JsonLinesParser`.
    JsonLines,
    /// `JsonDocumentParser`.
    JsonDocument,
}

impl ParserKind {
    /// Instantiates the parser.
    pub fn build(self) -> Arc<dyn DataParser> {
        match self {
            ParserKind::KvLines => Arc::new(KvLineParser),
            ParserKind::JsonLines => Arc::new(JsonLinesParser),
            ParserKind::JsonDocument => Arc::new(JsonDocumentParser),
        }
    }
}

/// Reads a text buffer, mapping invalid UTF-8 to a whole-buffer failure.
pub(crate) fn decode_utf8(raw: &[u8]) -> Result<&str, ParseError> {
    std::str::from_utf8(raw).map_err(|e| ParseError::Undecodable(e.to_string()))
}
