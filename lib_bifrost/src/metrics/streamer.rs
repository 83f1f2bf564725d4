//! The metric set every streamer reports after each refresh cycle.

use std::sync::Arc;
use std::time::Duration;

use super::{
    labels, Counter, Gauge, Histogram, MetricOpts, MetricsError, MetricsFactory, NoopMetric,
};

/// Label value of `cycles_total` for a committed cycle.
pub const RESULT_OK: &str = "ok";
/// Label value of `cycles_total` for an aborted cycle.
pub const RESULT_ERROR: &str = "error";

/// # Streamer Metrics
///
/// | metric                | kind      | labels             |
/// |-----------------------|-----------|--------------------|
/// | `cycles_total`        | counter   | `streamer, result` |
/// | `record_errors_total` | counter   | `streamer`         |
/// | `entries`             | gauge     | `streamer`         |
/// | `refresh_seconds`     | histogram | `streamer`         |
#[derive(Clone)]
pub struct StreamerMetrics {
    cycles: Arc<dyn Counter>,
    record_errors: Arc<dyn Counter>,
    entries: Arc<dyn Gauge>,
    refresh_seconds: Arc<dyn Histogram>,
}

impl Default for StreamerMetrics {
    fn default() -> Self {
        Self::noop()
    }
}

impl std::fmt::Debug for StreamerMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamerMetrics").finish_non_exhaustive()
    }
}

impl StreamerMetrics {
    /// Registers the streamer metrics through `factory`.
    ///
    /// Call once per factory: the metric names are fixed, so a second call on
    /// the same registry fails with a duplicate registration error.
    pub fn new(factory: &MetricsFactory) -> Result<Self, MetricsError> {
        Ok(Self {
            cycles: factory.new_counter(
                &MetricOpts::new("cycles_total", "Refresh cycles by outcome"),
                &["streamer", "result"],
            )?,
            record_errors: factory.new_counter(
                &MetricOpts::new("record_errors_total", "Records dropped because they failed to parse"),
                &["streamer"],
            )?,
            entries: factory.new_gauge(
                &MetricOpts::new("entries", "Entries in the published container version"),
                &["streamer"],
            )?,
            refresh_seconds: factory.new_histogram(
                &MetricOpts::new("refresh_seconds", "Duration of refresh cycles"),
                &["streamer"],
            )?,
        })
    }

    /// Metrics that discard everything.
    pub fn noop() -> Self {
        Self {
            cycles: Arc::new(NoopMetric),
            record_errors: Arc::new(NoopMetric),
            entries: Arc::new(NoopMetric),
            refresh_seconds: Arc::new(NoopMetric),
        }
    }

    /// Reports a committed cycle.
    pub fn record_success(
        &self,
        streamer: &str,
        entries: usize,
        record_errors: usize,
        elapsed: Duration,
    ) {
        let by_streamer = labels([("streamer", streamer)]);
        self.cycles
            .with(&labels([("streamer", streamer), ("result", RESULT_OK)]))
            .add(1.0);
        if record_errors > 0 {
            self.record_errors
                .with(&by_streamer)
                .add(record_errors as f64);
        }
        self.entries.with(&by_streamer).set(entries as f64);
        self.refresh_seconds
            .with(&by_streamer)
            .observe(elapsed.as_secs_f64());
    }

    /// Reports a cycle that was aborted before anything was published.
    pub fn record_failure(&self, streamer: &str, elapsed: Duration) {
        self.cycles
            .with(&labels([("streamer", streamer), ("result", RESULT_ERROR)]))
            .add(1.0);
        self.refresh_seconds
            .with(&labels([("streamer", streamer)]))
            .observe(elapsed.as_secs_f64());
    }
}

#[cfg(all(test, feature = "prometheus"))]
mod tests {
    use super::*;
    use crate::metrics::MetricsConfig;
    use ::prometheus::{Encoder, TextEncoder};

    #[test]
    fn test_cycle_outcomes_are_exported() {
        let factory = MetricsFactory::new(MetricsConfig::prometheus("bifrost", "streamer"));
        let metrics = StreamerMetrics::new(&factory).unwrap();

        metrics.record_success("users", 3, 1, Duration::from_millis(20));
        metrics.record_success("users", 4, 0, Duration::from_millis(10));
        metrics.record_failure("users", Duration::from_millis(5));

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&factory.registry().gather(), &mut buffer)
            .unwrap();
        let text = String::from_utf8(buffer).unwrap();

        assert!(text.contains(r#"bifrost_streamer_cycles_total{result="ok",streamer="users"} 2"#));
        assert!(text.contains(r#"bifrost_streamer_cycles_total{result="error",streamer="users"} 1"#));
        assert!(text.contains(r#"bifrost_streamer_record_errors_total{streamer="users"} 1"#));
        assert!(text.contains(r#"bifrost_streamer_entries{streamer="users"} 4"#));
        assert!(text.contains(r#"bifrost_streamer_refresh_seconds_count{streamer="users"} 3"#));
    }

    #[test]
    fn test_registering_twice_on_one_registry_fails() {
        let factory = MetricsFactory::new(MetricsConfig::prometheus("bifrost", "streamer"));
        assert!(StreamerMetrics::new(&factory).is_ok());
        assert!(StreamerMetrics::new(&factory).is_err());
    }
}
