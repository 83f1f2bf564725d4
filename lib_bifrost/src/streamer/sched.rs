//! Scheduling bookkeeping shared between a streamer, its provider and monitoring.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use super::{CycleReport, StreamerError};

/// Where a streamer is within its refresh cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamerState {
    /// Waiting for the next cycle.
    #[default]
    Idle,
    /// Reading raw bytes from the source.
    Fetching,
    /// Turning the bytes into records.
    Parsing,
    /// Applying the records to the container.
    Merging,
}

impl fmt::Display for StreamerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StreamerState::Idle => "idle",
            StreamerState::Fetching => "fetching",
            StreamerState::Parsing => "parsing",
            StreamerState::Merging => "merging",
        };
        f.write_str(label)
    }
}

/// # Sched Info
///
/// A point-in-time copy of one streamer's scheduling state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedInfo {
    /// Time between two scheduled cycles.
    pub interval: Duration,
    /// Whether the first cycle must finish before the streamer serves reads.
    pub is_sync: bool,
    /// Current position in the cycle.
    pub state: StreamerState,
    /// When the streamer was created.
    pub registered_at: DateTime<Utc>,
    /// End of the most recent cycle, successful or not.
    pub last_run: Option<DateTime<Utc>>,
    /// End of the most recent committed cycle.
    pub last_success: Option<DateTime<Utc>>,
    /// `last_run + interval`.
    pub next_due: Option<DateTime<Utc>>,
    /// Error of the most recent cycle; cleared by the next success.
    pub last_error: Option<String>,
    /// Records dropped by the most recent committed cycle.
    pub last_record_errors: usize,
    /// Cycles that ran to completion or failure.
    pub cycles: u64,
    /// Cycles that failed.
    pub failures: u64,
    /// Container version published by the most recent committed cycle.
    pub version: u64,
}

impl SchedInfo {
    /// Fresh bookkeeping for a streamer created at `now`.
    pub fn new(interval: Duration, is_sync: bool, now: DateTime<Utc>) -> Self {
        Self {
            interval,
            is_sync,
            state: StreamerState::Idle,
            registered_at: now,
            last_run: None,
            last_success: None,
            next_due: None,
            last_error: None,
            last_record_errors: 0,
            cycles: 0,
            failures: 0,
            version: 0,
        }
    }

    fn finish(&mut self, now: DateTime<Utc>) {
        self.state = StreamerState::Idle;
        self.cycles += 1;
        self.last_run = Some(now);
        self.next_due = chrono::Duration::from_std(self.interval)
            .ok()
            .and_then(|interval| now.checked_add_signed(interval));
    }

    /// Records a committed cycle.
    pub fn record_success(&mut self, now: DateTime<Utc>, report: &CycleReport) {
        self.finish(now);
        self.last_success = Some(now);
        self.last_error = None;
        self.last_record_errors = report.record_errors.len();
        self.version = report.version;
    }

    /// Records a cycle that was aborted without touching the container.
    pub fn record_failure(&mut self, now: DateTime<Utc>, error: &StreamerError) {
        self.finish(now);
        self.failures += 1;
        self.last_error = Some(error.to_string());
    }

    /// Returns `true` when nothing has been committed for longer than `expire_time`.
    ///
    /// Streamers that never succeeded are measured from registration. A zero
    /// `expire_time` never expires.
    pub fn is_expired(&self, expire_time: Duration, now: DateTime<Utc>) -> bool {
        if expire_time.is_zero() {
            return false;
        }
        let reference = self.last_success.unwrap_or(self.registered_at);
        chrono::Duration::from_std(expire_time)
            .map(|expire| now.signed_duration_since(reference) > expire)
            .unwrap_or(false)
    }
}

/// # Sched Handle
///
/// A live, read-only view of a streamer's `SchedInfo`. Only the owning
/// streamer writes through it.
#[derive(Debug, Clone)]
pub struct SchedHandle {
    inner: Arc<RwLock<SchedInfo>>,
}

impl SchedHandle {
    pub(crate) fn new(info: SchedInfo) -> Self {
        Self {
            inner: Arc::new(RwLock::new(info)),
        }
    }

    /// Copies the current state out.
    pub fn snapshot(&self) -> SchedInfo {
        self.inner.read().clone()
    }

    /// Current cycle position.
    pub fn state(&self) -> StreamerState {
        self.inner.read().state
    }

    /// Configured interval.
    pub fn interval(&self) -> Duration {
        self.inner.read().interval
    }

    /// Whether the first cycle is synchronous.
    pub fn is_sync(&self) -> bool {
        self.inner.read().is_sync
    }

    /// See `SchedInfo::is_expired`.
    pub fn is_expired(&self, expire_time: Duration, now: DateTime<Utc>) -> bool {
        self.inner.read().is_expired(expire_time, now)
    }

    pub(crate) fn set_state(&self, state: StreamerState) {
        self.inner.write().state = state;
    }

    pub(crate) fn update<F: FnOnce(&mut SchedInfo)>(&self, f: F) {
        f(&mut self.inner.write());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ParseError;
    use crate::source::FetchError;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_success_then_failure_bookkeeping() {
        let mut info = SchedInfo::new(Duration::from_secs(30), false, at(0));
        let report = CycleReport {
            version: 4,
            applied: 2,
            skipped: 1,
            record_errors: vec![ParseError::Malformed {
                unit: 1,
                reason: "bad".into(),
            }],
            elapsed: Duration::from_millis(3),
        };

        info.record_success(at(10), &report);
        assert_eq!(info.last_success, Some(at(10)));
        assert_eq!(info.next_due, Some(at(40)));
        assert_eq!(info.last_record_errors, 1);
        assert_eq!(info.version, 4);

        info.record_failure(at(40), &StreamerError::Fetch(FetchError::Http("down".into())));
        assert_eq!(info.cycles, 2);
        assert_eq!(info.failures, 1);
        assert_eq!(info.last_success, Some(at(10)));
        assert!(info.last_error.as_deref().unwrap().contains("down"));
        assert_eq!(info.state, StreamerState::Idle);
    }

    #[test]
    fn test_expiry_is_measured_from_last_success_or_registration() {
        let mut info = SchedInfo::new(Duration::from_secs(1), false, at(0));
        let expire = Duration::from_secs(60);

        assert!(!info.is_expired(expire, at(60)));
        assert!(info.is_expired(expire, at(61)));
        assert!(!info.is_expired(Duration::ZERO, at(10_000)));

        info.record_success(at(50), &CycleReport::default());
        assert!(!info.is_expired(expire, at(100)));
        assert!(info.is_expired(expire, at(111)));
    }
}
