//! # lib_bifrost
//!
//! Keeps in-process, read-optimized key-value containers synchronized with an
//! external data source without ever blocking the readers.
//!
//! The pipeline for a single dataset is:
//!
//! ```text
//! Source::fetch -> DataParser::parse -> Container::merge -> SchedInfo
//! ```
//!
//! A `Streamer` owns one pipeline (one `Container`, one `SchedInfo`), and a
//! `StreamerProvider` schedules a named set of streamers, each on its own
//! interval, evicting the ones whose data has gone stale for too long.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// The versioned, concurrently-readable key-value store.
pub mod container;
/// Parser contract and the built-in record parsers.
pub mod parser;
/// The "fetch raw bytes" contract and its concrete transports.
pub mod source;
/// One source -> parser -> container pipeline and its scheduling bookkeeping.
pub mod streamer;
/// Registry that schedules and expires a named set of streamers.
pub mod provider;
/// Counter/gauge/histogram facade with fan-out over reporting backends.
pub mod metrics;
/// YAML configuration files for providers, streamers and metrics.
pub mod configs;
/// Tracing subscriber setup for binaries embedding the library.
#[cfg(feature = "loggers")]
pub mod loggers;

// Re-export the types most callers need.
pub use configs::{BifrostConfig, LocalFileStreamerCfg, StreamerProviderCfg};
pub use container::{
    Container, DataMode, MapKey, MergeReport, Record, Snapshot, UpdateMode, Value,
    VersionedContainer,
};
pub use parser::{DataParser, ParseError, ParserKind, ParserResult};
pub use provider::{ProviderError, StreamerProvider};
pub use source::{FetchError, LocalFileSource, Source};
pub use streamer::{
    CycleReport, LocalFileStreamer, SchedHandle, SchedInfo, SourceStreamer, Streamer,
    StreamerError, StreamerState,
};
