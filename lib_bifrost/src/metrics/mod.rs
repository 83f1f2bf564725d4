//! # Metrics Facade
//!
//! A small counter/gauge/histogram facade so the streamer and provider can
//! report without knowing which monitoring system is listening.
//!
//! ## Design:
//! - **Capability traits**: `Counter`, `Gauge` and `Histogram` each expose
//!   `with(labels)` plus their recording operation. `with` returns a new handle
//!   carrying the merged label set; handles are cheap to clone and share.
//! - **Backends**: `prometheus` (feature `prometheus`) maps each metric onto a
//!   labelled Prometheus vector. Backends are switched on in `MetricsConfig`.
//! - **Fan-out**: `MultiCounter`, `MultiGauge` and `MultiHistogram` forward every
//!   observation to all enabled backends; with no backend enabled the factory
//!   hands out `NoopMetric`.
//! - **No hidden globals**: metrics are registered on the registry owned by the
//!   `MetricsFactory` the caller created and passed in.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

/// YAML configuration of the metrics facade.
pub mod config;
/// Prometheus backend.
#[cfg(feature = "prometheus")]
pub mod prometheus;
/// The metric set emitted by streamers.
pub mod streamer;

pub use config::MetricsConfig;
pub use streamer::StreamerMetrics;

/// Label name to label value.
pub type Labels = BTreeMap<String, String>;

/// Builds a `Labels` map from literal pairs.
pub fn labels<const N: usize>(pairs: [(&str, &str); N]) -> Labels {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// # Metrics Error
#[derive(Debug, Error)]
pub enum MetricsError {
    /// Configuration files must be YAML.
    #[error("metrics config must be a .yaml/.yml file, got {0}")]
    UnsupportedFormat(String),
    /// The configuration file could not be read.
    #[error("failed to read metrics config: {0}")]
    Io(#[from] std::io::Error),
    /// The configuration file is not valid YAML for `MetricsConfig`.
    #[error("invalid metrics config: {0}")]
    Yaml(#[from] serde_yml::Error),
    /// A value required to build a metric is missing from the configuration.
    #[error("metrics config is missing {0}")]
    Missing(&'static str),
    /// The configuration enables a backend this build does not include.
    #[error("metrics backend '{0}' is not compiled in")]
    BackendUnavailable(&'static str),
    /// Creating or registering a Prometheus collector failed.
    #[cfg(feature = "prometheus")]
    #[error("prometheus: {0}")]
    Prometheus(#[from] ::prometheus::Error),
}

/// A value that only ever goes up.
pub trait Counter: Send + Sync {
    /// Returns a handle with `labels` merged over the current ones.
    fn with(&self, labels: &Labels) -> Arc<dyn Counter>;
    /// Adds `delta`, which must not be negative.
    fn add(&self, delta: f64);
}

/// A value that is set to arbitrary levels over time.
pub trait Gauge: Send + Sync {
    /// Returns a handle with `labels` merged over the current ones.
    fn with(&self, labels: &Labels) -> Arc<dyn Gauge>;
    /// Sets the gauge to `value`.
    fn set(&self, value: f64);
    /// Moves the gauge by `delta`.
    fn add(&self, delta: f64);
}

/// Repeated observations of the same kind of thing, e.g. latencies.
pub trait Histogram: Send + Sync {
    /// Returns a handle with `labels` merged over the current ones.
    fn with(&self, labels: &Labels) -> Arc<dyn Histogram>;
    /// Records one observation.
    fn observe(&self, value: f64);
}

/// Name and help text of one metric; namespace and subsystem come from the config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricOpts {
    /// Metric name without namespace/subsystem prefix.
    pub name: String,
    /// Help text.
    pub help: String,
}

impl MetricOpts {
    /// Convenience constructor.
    pub fn new(name: impl Into<String>, help: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
        }
    }
}

/// Discards everything. Used when no backend is enabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetric;

impl Counter for NoopMetric {
    fn with(&self, _labels: &Labels) -> Arc<dyn Counter> {
        Arc::new(NoopMetric)
    }
    fn add(&self, _delta: f64) {}
}

impl Gauge for NoopMetric {
    fn with(&self, _labels: &Labels) -> Arc<dyn Gauge> {
        Arc::new(NoopMetric)
    }
    fn set(&self, _value: f64) {}
    fn add(&self, _delta: f64) {}
}

impl Histogram for NoopMetric {
    fn with(&self, _labels: &Labels) -> Arc<dyn Histogram> {
        Arc::new(NoopMetric)
    }
    fn observe(&self, _value: f64) {}
}

/// Treats several counters as one.
#[derive(Clone, Default)]
pub struct MultiCounter(pub Vec<Arc<dyn Counter>>);

impl Counter for MultiCounter {
    fn with(&self, labels: &Labels) -> Arc<dyn Counter> {
        Arc::new(MultiCounter(self.0.iter().map(|c| c.with(labels)).collect()))
    }

    fn add(&self, delta: f64) {
        for counter in &self.0 {
            counter.add(delta);
        }
    }
}

/// Treats several gauges as one.
#[derive(Clone, Default)]
pub struct MultiGauge(pub Vec<Arc<dyn Gauge>>);

impl Gauge for MultiGauge {
    fn with(&self, labels: &Labels) -> Arc<dyn Gauge> {
        Arc::new(MultiGauge(self.0.iter().map(|g| g.with(labels)).collect()))
    }

    fn set(&self, value: f64) {
        for gauge in &self.0 {
            gauge.set(value);
        }
    }

    fn add(&self, delta: f64) {
        for gauge in &self.0 {
            gauge.add(delta);
        }
    }
}

/// Treats several histograms as one.
#[derive(Clone, Default)]
pub struct MultiHistogram(pub Vec<Arc<dyn Histogram>>);

impl Histogram for MultiHistogram {
    fn with(&self, labels: &Labels) -> Arc<dyn Histogram> {
        Arc::new(MultiHistogram(
            self.0.iter().map(|h| h.with(labels)).collect(),
        ))
    }

    fn observe(&self, value: f64) {
        for histogram in &self.0 {
            histogram.observe(value);
        }
    }
}

/// # Metrics Factory
///
/// Builds fan-out metrics for every backend `MetricsConfig` enables and owns the
/// registry they are registered on.
#[derive(Clone)]
pub struct MetricsFactory {
    config: MetricsConfig,
    #[cfg(feature = "prometheus")]
    registry: ::prometheus::Registry,
}

impl MetricsFactory {
    /// Creates a factory with a fresh, private registry.
    pub fn new(config: MetricsConfig) -> Self {
        Self {
            config,
            #[cfg(feature = "prometheus")]
            registry: ::prometheus::Registry::new(),
        }
    }

    /// Creates a factory that registers on a caller-owned registry.
    #[cfg(feature = "prometheus")]
    pub fn with_registry(config: MetricsConfig, registry: ::prometheus::Registry) -> Self {
        Self { config, registry }
    }

    /// The registry metrics are registered on, for exposition.
    #[cfg(feature = "prometheus")]
    pub fn registry(&self) -> &::prometheus::Registry {
        &self.registry
    }

    /// The configuration this factory was built from.
    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    /// Name and help of the configured default metric.
    pub fn default_opts(&self) -> Result<MetricOpts, MetricsError> {
        let defaults = &self.config.monitor_system.default;
        let name = defaults
            .name
            .clone()
            .ok_or(MetricsError::Missing("MonitorSystem.Default.Name"))?;
        let help = defaults.help.clone().unwrap_or_else(|| name.clone());
        Ok(MetricOpts { name, help })
    }

    fn check_backends(&self) -> Result<(), MetricsError> {
        if self.config.open.prometheus && !cfg!(feature = "prometheus") {
            return Err(MetricsError::BackendUnavailable("prometheus"));
        }
        Ok(())
    }

    /// Creates a counter with the given label names on every enabled backend.
    pub fn new_counter(
        &self,
        opts: &MetricOpts,
        label_names: &[&str],
    ) -> Result<Arc<dyn Counter>, MetricsError> {
        self.check_backends()?;
        #[allow(unused_mut)]
        let mut backends: Vec<Arc<dyn Counter>> = Vec::new();
        #[cfg(feature = "prometheus")]
        if self.config.open.prometheus {
            backends.push(Arc::new(prometheus::PrometheusCounter::register(
                &self.registry,
                &self.config,
                opts,
                label_names,
            )?));
        }
        #[cfg(not(feature = "prometheus"))]
        let _ = (opts, label_names);
        Ok(match backends.len() {
            0 => Arc::new(NoopMetric),
            _ => Arc::new(MultiCounter(backends)),
        })
    }

    /// Creates a gauge with the given label names on every enabled backend.
    pub fn new_gauge(
        &self,
        opts: &MetricOpts,
        label_names: &[&str],
    ) -> Result<Arc<dyn Gauge>, MetricsError> {
        self.check_backends()?;
        #[allow(unused_mut)]
        let mut backends: Vec<Arc<dyn Gauge>> = Vec::new();
        #[cfg(feature = "prometheus")]
        if self.config.open.prometheus {
            backends.push(Arc::new(prometheus::PrometheusGauge::register(
                &self.registry,
                &self.config,
                opts,
                label_names,
            )?));
        }
        #[cfg(not(feature = "prometheus"))]
        let _ = (opts, label_names);
        Ok(match backends.len() {
            0 => Arc::new(NoopMetric),
            _ => Arc::new(MultiGauge(backends)),
        })
    }

    /// Creates a histogram with the given label names on every enabled backend.
    pub fn new_histogram(
        &self,
        opts: &MetricOpts,
        label_names: &[&str],
    ) -> Result<Arc<dyn Histogram>, MetricsError> {
        self.check_backends()?;
        #[allow(unused_mut)]
        let mut backends: Vec<Arc<dyn Histogram>> = Vec::new();
        #[cfg(feature = "prometheus")]
        if self.config.open.prometheus {
            backends.push(Arc::new(prometheus::PrometheusHistogram::register(
                &self.registry,
                &self.config,
                opts,
                label_names,
            )?));
        }
        #[cfg(not(feature = "prometheus"))]
        let _ = (opts, label_names);
        Ok(match backends.len() {
            0 => Arc::new(NoopMetric),
            _ => Arc::new(MultiHistogram(backends)),
        })
    }
}
