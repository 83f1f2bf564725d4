//! # Streamer Module
//!
//! A streamer owns one refresh pipeline: one `Source`, one `DataParser`, one
//! `Container` and the `SchedInfo` describing how the pipeline is doing.
//!
//! ## Refresh Cycle:
//!
//! ```text
//! Idle -> Fetching -> Parsing -> Merging -> Idle
//!            |           |
//!            +-----------+--> failure: container untouched, back to Idle
//! ```
//!
//! - A fetch error or a whole-buffer parse failure aborts the cycle. The
//!   container keeps serving the previous data and `SchedInfo.last_error` says why.
//! - Per-record parse failures never abort a cycle. They are dropped, counted
//!   and returned in the `CycleReport`.
//! - Cycles of one streamer never overlap. A second `update_data` waits for the
//!   running one and then starts from its committed state.
//! - Cancelling the token stops the cycle before anything reaches the container.
//!   A merge that already committed is never rolled back.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::container::{Container, ContainerError};
use crate::parser::ParseError;
use crate::source::FetchError;

/// `SchedInfo`, `SchedHandle` and `StreamerState`.
pub mod sched;
/// The generic source-driven streamer and its local-file flavour.
pub mod source_streamer;

pub use sched::{SchedHandle, SchedInfo, StreamerState};
pub use source_streamer::{LocalFileStreamer, SourceStreamer};

/// Interval used when a streamer is built without one.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// # Streamer Error
///
/// Why a refresh cycle was aborted. In every case the container is unchanged.
#[derive(Debug, Error)]
pub enum StreamerError {
    /// The source could not be read.
    #[error("fetch failed: {0}")]
    Fetch(#[source] FetchError),
    /// The parser could not decode the buffer at all.
    #[error("whole buffer failed to parse: {0}")]
    Parse(#[source] ParseError),
    /// The container refused the batch.
    #[error("merge failed: {0}")]
    Merge(#[from] ContainerError),
    /// The caller cancelled the cycle.
    #[error("refresh cancelled")]
    Cancelled,
}

impl From<FetchError> for StreamerError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Cancelled => StreamerError::Cancelled,
            other => StreamerError::Fetch(other),
        }
    }
}

/// Outcome of a committed refresh cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    /// Container version published by the cycle.
    pub version: u64,
    /// Records written.
    pub applied: usize,
    /// Records not written.
    pub skipped: usize,
    /// Records that failed to parse, in source order.
    pub record_errors: Vec<ParseError>,
    /// Wall time of the whole cycle.
    pub elapsed: Duration,
}

/// # Streamer
///
/// The contract the provider schedules against.
#[async_trait]
pub trait Streamer: Send + Sync {
    /// Unique name within a provider.
    fn name(&self) -> &str;

    /// Replaces the owned container, e.g. with one pre-warmed elsewhere.
    fn set_container(&self, container: Arc<dyn Container>);

    /// The container readers should query.
    fn container(&self) -> Arc<dyn Container>;

    /// Live view of the scheduling state.
    fn sched_info(&self) -> SchedHandle;

    /// Runs one refresh cycle.
    async fn update_data(&self, cancel: &CancellationToken) -> Result<CycleReport, StreamerError>;
}
