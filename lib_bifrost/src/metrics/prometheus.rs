//! # Prometheus Backend
//!
//! Each facade metric maps onto one labelled Prometheus vector registered on
//! the factory's registry. A handle carries the label values chosen so far
//! through `with`; the concrete child series is resolved when a value is
//! recorded. A label set that does not match the vector's label names is
//! logged and the observation dropped: reporting never takes the caller down.

use std::collections::HashMap;
use std::sync::Arc;

use ::prometheus::{CounterVec, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry};
use tracing::warn;

use super::{Counter, Gauge, Histogram, Labels, MetricOpts, MetricsConfig, MetricsError};

fn base_opts(config: &MetricsConfig, opts: &MetricOpts) -> Opts {
    let defaults = &config.monitor_system.default;
    Opts::new(opts.name.clone(), opts.help.clone())
        .namespace(defaults.namespace.clone())
        .subsystem(defaults.subsystem.clone())
}

fn merged(current: &Labels, extra: &Labels) -> Labels {
    let mut labels = current.clone();
    labels.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
    labels
}

fn as_lookup(labels: &Labels) -> HashMap<&str, &str> {
    labels.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect()
}

/// Counter backed by a Prometheus `CounterVec`.
#[derive(Clone)]
pub struct PrometheusCounter {
    vec: CounterVec,
    labels: Labels,
}

impl PrometheusCounter {
    /// Creates the vector and registers it on `registry`.
    pub fn register(
        registry: &Registry,
        config: &MetricsConfig,
        opts: &MetricOpts,
        label_names: &[&str],
    ) -> Result<Self, MetricsError> {
        let vec = CounterVec::new(base_opts(config, opts), label_names)?;
        registry.register(Box::new(vec.clone()))?;
        Ok(Self {
            vec,
            labels: Labels::new(),
        })
    }
}

impl Counter for PrometheusCounter {
    fn with(&self, labels: &Labels) -> Arc<dyn Counter> {
        Arc::new(Self {
            vec: self.vec.clone(),
            labels: merged(&self.labels, labels),
        })
    }

    fn add(&self, delta: f64) {
        if delta < 0.0 {
            warn!(target: "bifrost::metrics", delta, "counter cannot decrease; dropped");
            return;
        }
        match self.vec.get_metric_with(&as_lookup(&self.labels)) {
            Ok(counter) => counter.inc_by(delta),
            Err(err) => warn!(target: "bifrost::metrics", "prometheus counter error: {err}"),
        }
    }
}

/// Gauge backed by a Prometheus `GaugeVec`.
#[derive(Clone)]
pub struct PrometheusGauge {
    vec: GaugeVec,
    labels: Labels,
}

impl PrometheusGauge {
    /// Creates the vector and registers it on `registry`.
    pub fn register(
        registry: &Registry,
        config: &MetricsConfig,
        opts: &MetricOpts,
        label_names: &[&str],
    ) -> Result<Self, MetricsError> {
        let vec = GaugeVec::new(base_opts(config, opts), label_names)?;
        registry.register(Box::new(vec.clone()))?;
        Ok(Self {
            vec,
            labels: Labels::new(),
        })
    }
}

impl Gauge for PrometheusGauge {
    fn with(&self, labels: &Labels) -> Arc<dyn Gauge> {
        Arc::new(Self {
            vec: self.vec.clone(),
            labels: merged(&self.labels, labels),
        })
    }

    fn set(&self, value: f64) {
        match self.vec.get_metric_with(&as_lookup(&self.labels)) {
            Ok(gauge) => gauge.set(value),
            Err(err) => warn!(target: "bifrost::metrics", "prometheus gauge error: {err}"),
        }
    }

    fn add(&self, delta: f64) {
        match self.vec.get_metric_with(&as_lookup(&self.labels)) {
            Ok(gauge) => gauge.add(delta),
            Err(err) => warn!(target: "bifrost::metrics", "prometheus gauge error: {err}"),
        }
    }
}

/// Histogram backed by a Prometheus `HistogramVec` with the default buckets.
#[derive(Clone)]
pub struct PrometheusHistogram {
    vec: HistogramVec,
    labels: Labels,
}

impl PrometheusHistogram {
    /// Creates the vector and registers it on `registry`.
    pub fn register(
        registry: &Registry,
        config: &MetricsConfig,
        opts: &MetricOpts,
        label_names: &[&str],
    ) -> Result<Self, MetricsError> {
        let vec = HistogramVec::new(
            HistogramOpts::from(base_opts(config, opts)),
            label_names,
        )?;
        registry.register(Box::new(vec.clone()))?;
        Ok(Self {
            vec,
            labels: Labels::new(),
        })
    }
}

impl Histogram for PrometheusHistogram {
    fn with(&self, labels: &Labels) -> Arc<dyn Histogram> {
        Arc::new(Self {
            vec: self.vec.clone(),
            labels: merged(&self.labels, labels),
        })
    }

    fn observe(&self, value: f64) {
        match self.vec.get_metric_with(&as_lookup(&self.labels)) {
            Ok(histogram) => histogram.observe(value),
            Err(err) => warn!(target: "bifrost::metrics", "prometheus histogram error: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{labels, MetricsFactory};
    use ::prometheus::{Encoder, TextEncoder};

    fn gather(registry: &Registry) -> String {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&registry.gather(), &mut buffer)
            .unwrap();
        String::from_utf8(buffer).unwrap()
    }

    #[test]
    fn test_counter_records_labelled_series() {
        let factory = MetricsFactory::new(MetricsConfig::prometheus("bifrost", "demo"));
        let counter = factory
            .new_counter(
                &MetricOpts::new("requests_total", "Requests"),
                &["method", "code"],
            )
            .unwrap();

        counter
            .with(&labels([("method", "Get")]))
            .with(&labels([("code", "200")]))
            .add(1.0);
        counter.with(&labels([("method", "Post"), ("code", "200")])).add(2.0);

        let text = gather(factory.registry());
        assert!(text.contains(r#"bifrost_demo_requests_total{code="200",method="Get"} 1"#));
        assert!(text.contains(r#"bifrost_demo_requests_total{code="200",method="Post"} 2"#));
    }

    #[test]
    fn test_label_mismatch_and_negative_delta_are_dropped() {
        let factory = MetricsFactory::new(MetricsConfig::prometheus("bifrost", "demo"));
        let counter = factory
            .new_counter(&MetricOpts::new("drops_total", "Drops"), &["streamer"])
            .unwrap();

        counter.with(&labels([("unknown", "x")])).add(1.0);
        counter.with(&labels([("streamer", "a")])).add(-1.0);

        assert!(!gather(factory.registry()).contains("drops_total{"));
    }

    #[test]
    fn test_duplicate_registration_is_an_error() {
        let factory = MetricsFactory::new(MetricsConfig::prometheus("bifrost", "demo"));
        let opts = MetricOpts::new("entries", "Entries");
        assert!(factory.new_gauge(&opts, &["streamer"]).is_ok());
        assert!(matches!(
            factory.new_gauge(&opts, &["streamer"]),
            Err(MetricsError::Prometheus(_))
        ));
    }

    #[test]
    fn test_gauge_and_histogram() {
        let factory = MetricsFactory::new(MetricsConfig::prometheus("bifrost", "demo"));
        let gauge = factory
            .new_gauge(&MetricOpts::new("depth", "Depth"), &["queue"])
            .unwrap()
            .with(&labels([("queue", "jobs")]));
        gauge.set(5.0);
        gauge.add(-2.0);

        let histogram = factory
            .new_histogram(&MetricOpts::new("latency_seconds", "Latency"), &[])
            .unwrap();
        histogram.observe(0.25);

        let text = gather(factory.registry());
        assert!(text.contains(r#"bifrost_demo_depth{queue="jobs"} 3"#));
        assert!(text.contains("bifrost_demo_latency_seconds_count 1"));
    }
}
