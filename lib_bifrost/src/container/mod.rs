//! # Container Module
//!
//! The container is the read side of the system: a versioned key-value store
//! that many readers query concurrently while a single refresh task keeps it in
//! sync with its source.
//!
//! ## Consistency Model:
//!
//! - **Published snapshots**: readers always look at one immutable `Snapshot`.
//!   A merge builds the next generation off to the side and publishes it with a
//!   single atomic pointer store, so a reader holding generation *n* never sees
//!   a value written while building *n+1*.
//! - **Single writer**: merges on one container are serialised. Readers never
//!   coordinate with each other or wait on the writer.
//! - **Best effort batches**: records that failed to parse are skipped and
//!   reported in the `MergeReport`; the valid records of the batch still commit.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::sync::Arc;

use thiserror::Error;

use crate::parser::{ParseError, ParserResult};

/// Keys, values, record modes and the `Record` type.
pub mod model;
/// The arc-swap backed container implementation.
pub mod versioned;

pub use model::{DataMode, MapKey, Record, UpdateMode, Value};
pub use versioned::{Snapshot, VersionedContainer};

/// # Container Error
///
/// Failures that abort a whole merge. Nothing is published when a merge fails.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ContainerError {
    /// A record asked for a mode the merge cannot honour, e.g. a `FullReplace`
    /// record inside an incremental batch.
    #[error("record for key '{key}' has mode {mode:?}, which an {update:?} merge cannot apply")]
    ModeConflict {
        /// Key of the offending record.
        key: MapKey,
        /// Mode carried by the record.
        mode: DataMode,
        /// Mode of the merge that rejected it.
        update: UpdateMode,
    },
}

/// The aggregate of every per-record failure in one merge.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{} record(s) failed to parse; first: {}", .0.len(), .0.first().map(ToString::to_string).unwrap_or_default())]
pub struct RecordErrors(pub Vec<ParseError>);

/// # Merge Report
///
/// Outcome of a committed merge.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeReport {
    /// Version published by this merge.
    pub version: u64,
    /// Records written (upserts and deletes).
    pub applied: usize,
    /// Records that were not written: parse failures plus records the mode ignores.
    pub skipped: usize,
    /// Per-record parse failures, in input order.
    pub errors: Vec<ParseError>,
}

impl MergeReport {
    /// Returns the aggregate record error, if any record failed to parse.
    pub fn aggregate_error(&self) -> Option<RecordErrors> {
        if self.errors.is_empty() {
            None
        } else {
            Some(RecordErrors(self.errors.clone()))
        }
    }
}

/// # Container
///
/// The contract readers and the owning streamer rely on. Implementations must
/// be safe to read while a merge is in flight.
pub trait Container: Send + Sync {
    /// Looks `key` up in the currently published version.
    fn get(&self, key: &MapKey) -> Option<Arc<Value>>;

    /// Returns `true` if `key` is present in the current version.
    fn contains(&self, key: &MapKey) -> bool {
        self.get(key).is_some()
    }

    /// Number of entries in the current version.
    fn len(&self) -> usize;

    /// Returns `true` when the current version has no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current version; `0` means nothing was ever merged.
    fn version(&self) -> u64;

    /// A consistent view of the current version that stays valid after later merges.
    fn snapshot(&self) -> Arc<Snapshot>;

    /// Applies a batch of parsed records according to `mode`.
    fn merge(
        &self,
        results: Vec<ParserResult>,
        mode: UpdateMode,
    ) -> Result<MergeReport, ContainerError>;
}
