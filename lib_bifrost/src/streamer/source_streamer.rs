//! The source-driven streamer.
//!
//! `SourceStreamer` runs the fetch -> parse -> merge cycle over any `Source`
//! and `DataParser`. `LocalFileStreamer` is the same pipeline assembled from a
//! `LocalFileStreamerCfg`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::{
    CycleReport, SchedHandle, SchedInfo, Streamer, StreamerError, StreamerState, DEFAULT_INTERVAL,
};
use crate::configs::LocalFileStreamerCfg;
use crate::container::{Container, UpdateMode, Value, VersionedContainer};
use crate::metrics::StreamerMetrics;
use crate::parser::{is_whole_buffer_failure, DataParser, ParseError};
use crate::source::{FetchError, LocalFileSource, Source};

/// # Source Streamer
///
/// Built with `new` and refined with the `with_*` methods before it is handed
/// to a provider:
///
/// ```ignore
/// let streamer = SourceStreamer::new("users", source, ParserKind::KvLines.build())
///     .with_update_mode(UpdateMode::Incremental)
///     .with_interval(Duration::from_secs(30))
///     .with_sync(true);
/// ```
pub struct SourceStreamer {
    name: String,
    source: Arc<dyn Source>,
    parser: Arc<dyn DataParser>,
    user_data: Value,
    update_mode: UpdateMode,
    fetch_timeout: Option<Duration>,
    container: RwLock<Arc<dyn Container>>,
    sched: SchedHandle,
    metrics: StreamerMetrics,
    /// Held for a whole cycle; cycles of one streamer never overlap.
    cycle: Mutex<()>,
}

impl SourceStreamer {
    /// A full-replace streamer with an empty container and the default interval.
    pub fn new(name: impl Into<String>, source: Arc<dyn Source>, parser: Arc<dyn DataParser>) -> Self {
        Self {
            name: name.into(),
            source,
            parser,
            user_data: Value::Null,
            update_mode: UpdateMode::default(),
            fetch_timeout: None,
            container: RwLock::new(Arc::new(VersionedContainer::new())),
            sched: SchedHandle::new(SchedInfo::new(DEFAULT_INTERVAL, false, Utc::now())),
            metrics: StreamerMetrics::noop(),
            cycle: Mutex::new(()),
        }
    }

    /// How each batch is merged.
    pub fn with_update_mode(mut self, mode: UpdateMode) -> Self {
        self.update_mode = mode;
        self
    }

    /// Time between scheduled cycles.
    pub fn with_interval(self, interval: Duration) -> Self {
        self.sched.update(|info| info.interval = interval);
        self
    }

    /// Whether the provider must complete the first cycle before registering.
    pub fn with_sync(self, is_sync: bool) -> Self {
        self.sched.update(|info| info.is_sync = is_sync);
        self
    }

    /// Context passed to the parser on every cycle.
    pub fn with_user_data(mut self, user_data: Value) -> Self {
        self.user_data = user_data;
        self
    }

    /// Deadline for a single fetch.
    pub fn with_fetch_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Where cycle outcomes are reported.
    pub fn with_metrics(mut self, metrics: StreamerMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Starts from `container` instead of an empty one.
    pub fn with_container(self, container: Arc<dyn Container>) -> Self {
        *self.container.write() = container;
        self
    }

    /// The configured merge mode.
    pub fn update_mode(&self) -> UpdateMode {
        self.update_mode
    }

    /// The source this streamer reads.
    pub fn source(&self) -> &Arc<dyn Source> {
        &self.source
    }

    async fn fetch(&self, cancel: &CancellationToken) -> Result<Vec<u8>, FetchError> {
        let fetch = async {
            match self.fetch_timeout {
                Some(limit) => tokio::time::timeout(limit, self.source.fetch(cancel))
                    .await
                    .unwrap_or(Err(FetchError::Timeout(limit))),
                None => self.source.fetch(cancel).await,
            }
        };
        // Cancellation wins even when the source ignores the token.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            result = fetch => result,
        }
    }

    async fn run_cycle(&self, cancel: &CancellationToken) -> Result<CycleReport, StreamerError> {
        if cancel.is_cancelled() {
            return Err(StreamerError::Cancelled);
        }

        self.sched.set_state(StreamerState::Fetching);
        let raw = self.fetch(cancel).await?;

        self.sched.set_state(StreamerState::Parsing);
        let results = self.parser.parse(&raw, &self.user_data);
        if is_whole_buffer_failure(&results) {
            let first = results
                .into_iter()
                .find_map(Result::err)
                .unwrap_or_else(|| ParseError::Undecodable("no records".into()));
            return Err(StreamerError::Parse(first));
        }

        if cancel.is_cancelled() {
            return Err(StreamerError::Cancelled);
        }

        self.sched.set_state(StreamerState::Merging);
        let report = self.container().merge(results, self.update_mode)?;

        Ok(CycleReport {
            version: report.version,
            applied: report.applied,
            skipped: report.skipped,
            record_errors: report.errors,
            elapsed: Duration::ZERO,
        })
    }
}

#[async_trait]
impl Streamer for SourceStreamer {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_container(&self, container: Arc<dyn Container>) {
        *self.container.write() = container;
    }

    fn container(&self) -> Arc<dyn Container> {
        Arc::clone(&self.container.read())
    }

    fn sched_info(&self) -> SchedHandle {
        self.sched.clone()
    }

    async fn update_data(&self, cancel: &CancellationToken) -> Result<CycleReport, StreamerError> {
        let _cycle = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StreamerError::Cancelled),
            guard = self.cycle.lock() => guard,
        };

        let started = Instant::now();
        let result = self.run_cycle(cancel).await;
        let elapsed = started.elapsed();
        let now = Utc::now();

        match result {
            Ok(mut report) => {
                report.elapsed = elapsed;
                self.sched.update(|info| info.record_success(now, &report));
                self.metrics.record_success(
                    &self.name,
                    self.container().len(),
                    report.record_errors.len(),
                    elapsed,
                );
                if report.record_errors.is_empty() {
                    tracing::debug!(
                        "Streamer '{}' committed version {} ({} applied, {} skipped) in {:?}",
                        self.name,
                        report.version,
                        report.applied,
                        report.skipped,
                        elapsed
                    );
                } else {
                    tracing::warn!(
                        "Streamer '{}' committed version {} but dropped {} record(s); first: {}",
                        self.name,
                        report.version,
                        report.record_errors.len(),
                        report.record_errors[0]
                    );
                }
                Ok(report)
            }
            Err(StreamerError::Cancelled) => {
                self.sched.set_state(StreamerState::Idle);
                tracing::debug!("Streamer '{}' cycle cancelled", self.name);
                Err(StreamerError::Cancelled)
            }
            Err(err) => {
                self.sched.update(|info| info.record_failure(now, &err));
                self.metrics.record_failure(&self.name, elapsed);
                tracing::warn!(
                    "Streamer '{}' refresh from {} failed, keeping previous data: {}",
                    self.name,
                    self.source.describe(),
                    err
                );
                Err(err)
            }
        }
    }
}

/// # Local File Streamer
///
/// A `SourceStreamer` over a `LocalFileSource`, configured from a
/// `LocalFileStreamerCfg`.
pub struct LocalFileStreamer {
    inner: SourceStreamer,
    path: PathBuf,
}

impl LocalFileStreamer {
    /// Builds the streamer with the parser named in `cfg`.
    pub fn new(cfg: LocalFileStreamerCfg) -> Self {
        let parser = cfg.parser.build();
        Self::with_parser(cfg, parser)
    }

    /// Builds the streamer with an explicit parser, ignoring `cfg.parser`.
    pub fn with_parser(cfg: LocalFileStreamerCfg, parser: Arc<dyn DataParser>) -> Self {
        let interval = cfg.interval();
        let fetch_timeout = cfg.fetch_timeout();
        let source = Arc::new(LocalFileSource::new(cfg.path.clone()));
        let inner = SourceStreamer::new(cfg.name, source, parser)
            .with_update_mode(cfg.update_mode)
            .with_interval(interval)
            .with_sync(cfg.is_sync)
            .with_user_data(cfg.user_data)
            .with_fetch_timeout(fetch_timeout);
        Self {
            inner,
            path: cfg.path,
        }
    }

    /// Reports cycle outcomes to `metrics`.
    pub fn with_metrics(mut self, metrics: StreamerMetrics) -> Self {
        self.inner = self.inner.with_metrics(metrics);
        self
    }

    /// The file being followed.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Streamer for LocalFileStreamer {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn set_container(&self, container: Arc<dyn Container>) {
        self.inner.set_container(container)
    }

    fn container(&self) -> Arc<dyn Container> {
        self.inner.container()
    }

    fn sched_info(&self) -> SchedHandle {
        self.inner.sched_info()
    }

    async fn update_data(&self, cancel: &CancellationToken) -> Result<CycleReport, StreamerError> {
        self.inner.update_data(cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{MapKey, Record};
    use crate::parser::{FnParser, KvLineParser, ParserKind, ParserResult};
    use crate::source::StaticSource;
    use serde_json::json;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Sleeps on every fetch and remembers how many fetches overlapped.
    #[derive(Default)]
    struct SlowSource {
        delay: Duration,
        active: AtomicUsize,
        max_active: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Source for SlowSource {
        fn describe(&self) -> String {
            "slow".to_string()
        }

        async fn fetch(&self, _cancel: &CancellationToken) -> Result<Vec<u8>, FetchError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("k{n}\t{n}\n").into_bytes())
        }
    }

    fn key(k: &str) -> MapKey {
        MapKey::from(k)
    }

    #[tokio::test]
    async fn test_cancelled_token_leaves_container_unchanged() {
        let streamer = SourceStreamer::new(
            "static",
            Arc::new(StaticSource::new("a\t1\n")),
            Arc::new(KvLineParser),
        );
        let token = CancellationToken::new();
        token.cancel();

        let err = streamer.update_data(&token).await.unwrap_err();
        assert!(matches!(err, StreamerError::Cancelled));

        let container = streamer.container();
        assert_eq!(container.version(), 0);
        assert!(container.is_empty());
        assert_eq!(streamer.sched_info().snapshot().failures, 0);
        assert_eq!(streamer.sched_info().state(), StreamerState::Idle);
    }

    #[tokio::test]
    async fn test_cancel_aborts_a_fetch_that_ignores_the_token() {
        let source = Arc::new(SlowSource {
            delay: Duration::from_secs(3),
            ..Default::default()
        });
        let streamer = SourceStreamer::new("deaf", source, Arc::new(KvLineParser));
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = streamer.update_data(&token).await.unwrap_err();
        assert!(matches!(err, StreamerError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(streamer.container().version(), 0);
        assert_eq!(streamer.sched_info().snapshot().failures, 0);
        assert_eq!(streamer.sched_info().state(), StreamerState::Idle);
    }

    #[tokio::test]
    async fn test_fetch_failure_keeps_stale_data() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"a\t1\nb\t2\n").unwrap();
        let cfg = LocalFileStreamerCfg::new("users", file.path());
        let streamer = LocalFileStreamer::new(cfg);
        let token = CancellationToken::new();

        let report = streamer.update_data(&token).await.unwrap();
        assert_eq!(report.version, 1);
        assert_eq!(report.applied, 2);

        let path = file.path().to_path_buf();
        drop(file);
        assert!(!path.exists());

        let err = streamer.update_data(&token).await.unwrap_err();
        assert!(matches!(err, StreamerError::Fetch(FetchError::Io { .. })));

        let container = streamer.container();
        assert_eq!(container.version(), 1);
        assert_eq!(container.get(&key("a")).as_deref(), Some(&json!(1)));

        let info = streamer.sched_info().snapshot();
        assert_eq!(info.cycles, 2);
        assert_eq!(info.failures, 1);
        assert!(info.last_error.is_some());
        assert!(info.last_success.is_some());
    }

    #[tokio::test]
    async fn test_whole_buffer_failure_aborts_cycle() {
        let source = Arc::new(StaticSource::new("a\t1\n"));
        let streamer = SourceStreamer::new("bytes", source.clone(), Arc::new(KvLineParser));
        let token = CancellationToken::new();
        streamer.update_data(&token).await.unwrap();

        source.set(vec![0xff, 0xfe, 0x00]);
        let err = streamer.update_data(&token).await.unwrap_err();
        assert!(matches!(err, StreamerError::Parse(ParseError::Undecodable(_))));
        assert_eq!(streamer.container().version(), 1);
        assert_eq!(streamer.container().get(&key("a")).as_deref(), Some(&json!(1)));
    }

    #[tokio::test]
    async fn test_record_errors_do_not_fail_the_cycle() {
        let parser = FnParser(|_: &[u8], _: &Value| {
            vec![
                Ok(Record::upsert("a", 1i64)),
                Err(ParseError::Malformed {
                    unit: 1,
                    reason: "ParseFail".into(),
                }),
            ]
        });
        let streamer = SourceStreamer::new("mixed", Arc::new(StaticSource::new("")), Arc::new(parser));

        let report = streamer.update_data(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.record_errors.len(), 1);
        assert_eq!(streamer.container().get(&key("a")).as_deref(), Some(&json!(1)));

        let info = streamer.sched_info().snapshot();
        assert_eq!(info.last_record_errors, 1);
        assert_eq!(info.last_error, None);
        assert_eq!(info.version, 1);
    }

    #[tokio::test]
    async fn test_batch_of_only_malformed_records_still_commits() {
        let parser = FnParser(|_: &[u8], _: &Value| -> Vec<ParserResult> {
            vec![
                Err(ParseError::Malformed { unit: 0, reason: "bad".into() }),
                Err(ParseError::Malformed { unit: 1, reason: "bad".into() }),
            ]
        });
        let seed = Arc::new(VersionedContainer::with_entries([(key("kept"), json!(1))]));
        let streamer = SourceStreamer::new("noisy", Arc::new(StaticSource::new("")), Arc::new(parser))
            .with_update_mode(UpdateMode::Incremental)
            .with_container(seed);

        let report = streamer.update_data(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.record_errors.len(), 2);
        assert_eq!(report.applied, 0);
        assert_eq!(streamer.container().get(&key("kept")).as_deref(), Some(&json!(1)));

        let info = streamer.sched_info().snapshot();
        assert_eq!(info.failures, 0);
        assert_eq!(info.last_error, None);
        assert_eq!(info.last_record_errors, 2);
        assert!(info.last_success.is_some());
    }

    #[tokio::test]
    async fn test_concurrent_cycles_are_serialised() {
        let source = Arc::new(SlowSource {
            delay: Duration::from_millis(30),
            ..Default::default()
        });
        let streamer = SourceStreamer::new("slow", source.clone(), Arc::new(KvLineParser))
            .with_update_mode(UpdateMode::Incremental);
        let token = CancellationToken::new();

        let (first, second) = tokio::join!(streamer.update_data(&token), streamer.update_data(&token));
        let mut versions = vec![first.unwrap().version, second.unwrap().version];
        versions.sort_unstable();

        assert_eq!(versions, vec![1, 2]);
        assert_eq!(source.max_active.load(Ordering::SeqCst), 1);
        let container = streamer.container();
        assert!(container.contains(&key("k0")));
        assert!(container.contains(&key("k1")));
    }

    #[tokio::test]
    async fn test_fetch_timeout() {
        let source = Arc::new(SlowSource {
            delay: Duration::from_secs(5),
            ..Default::default()
        });
        let streamer = SourceStreamer::new("stuck", source, Arc::new(KvLineParser))
            .with_fetch_timeout(Some(Duration::from_millis(10)));

        let err = streamer.update_data(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, StreamerError::Fetch(FetchError::Timeout(_))));
        assert_eq!(streamer.sched_info().snapshot().failures, 1);
    }

    #[tokio::test]
    async fn test_prewarmed_container_and_options() {
        let warm = Arc::new(VersionedContainer::with_entries([(key("seed"), json!(true))]));
        let streamer = SourceStreamer::new(
            "warm",
            Arc::new(StaticSource::new(r#"{"n": 7}"#)),
            ParserKind::JsonDocument.build(),
        )
        .with_container(warm)
        .with_update_mode(UpdateMode::Incremental)
        .with_interval(Duration::from_secs(5))
        .with_sync(true);

        assert!(streamer.container().contains(&key("seed")));
        assert!(streamer.sched_info().is_sync());
        assert_eq!(streamer.sched_info().interval(), Duration::from_secs(5));

        let report = streamer.update_data(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.version, 2);
        let container = streamer.container();
        assert!(container.contains(&key("seed")));
        assert_eq!(container.get(&key("n")).as_deref(), Some(&json!(7)));

        streamer.set_container(Arc::new(VersionedContainer::new()));
        assert!(streamer.container().is_empty());
    }
}
