//! # Streamer Provider
//!
//! The provider owns a named set of streamers and keeps each one refreshing on
//! its own timer.
//!
//! ## Scheduling:
//! - **One task per streamer**: refreshes of different streamers run fully in
//!   parallel. Within one streamer a tick that comes due while a cycle is still
//!   running is skipped, never queued behind it.
//! - **Sync streamers**: `register` runs the first cycle itself and only
//!   registers the streamer once that cycle committed. Async streamers run their
//!   first cycle right away on their task.
//! - **Eviction**: a streamer that has not committed anything for longer than
//!   `expire_time` is removed (`evict_expired`, or periodically through
//!   `spawn_janitor`). A zero `expire_time` keeps streamers forever.
//! - **Shutdown**: every task gets a child of the provider's cancellation token;
//!   `shutdown` cancels it and waits for the tasks to finish. Later `register`
//!   calls fail with `ProviderError::ShutDown`.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::configs::StreamerProviderCfg;
use crate::container::Container;
use crate::streamer::{Streamer, StreamerError};

/// # Provider Error
#[derive(Debug, Error)]
pub enum ProviderError {
    /// A streamer with the same name is already registered.
    #[error("streamer '{0}' is already registered")]
    Duplicate(String),
    /// The streamer's interval is zero.
    #[error("streamer '{0}' has a zero refresh interval")]
    ZeroInterval(String),
    /// The provider was shut down.
    #[error("provider is shut down, cannot register streamer '{0}'")]
    ShutDown(String),
    /// The synchronous first cycle failed; the streamer was not registered.
    #[error("initial load of streamer '{name}' failed: {source}")]
    InitialLoad {
        /// Streamer name.
        name: String,
        /// Why the cycle failed.
        #[source]
        source: StreamerError,
    },
}

struct Entry {
    streamer: Arc<dyn Streamer>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// # Streamer Provider
pub struct StreamerProvider {
    cfg: StreamerProviderCfg,
    entries: RwLock<HashMap<String, Entry>>,
    root: CancellationToken,
    janitor: Mutex<Option<JoinHandle<()>>>,
}

impl StreamerProvider {
    /// Creates an empty provider. Must be called inside a tokio runtime.
    pub fn new(cfg: StreamerProviderCfg) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            entries: RwLock::new(HashMap::new()),
            root: CancellationToken::new(),
            janitor: Mutex::new(None),
        })
    }

    /// Provider name.
    pub fn name(&self) -> &str {
        &self.cfg.name
    }

    /// The configuration the provider was built from.
    pub fn config(&self) -> &StreamerProviderCfg {
        &self.cfg
    }

    /// Adds `streamer` and starts refreshing it.
    pub async fn register(&self, streamer: Arc<dyn Streamer>) -> Result<(), ProviderError> {
        let name = streamer.name().to_string();
        if self.root.is_cancelled() {
            return Err(ProviderError::ShutDown(name));
        }
        if self.entries.read().contains_key(&name) {
            return Err(ProviderError::Duplicate(name));
        }

        let sched = streamer.sched_info();
        let interval = sched.interval();
        if interval.is_zero() {
            return Err(ProviderError::ZeroInterval(name));
        }

        let cancel = self.root.child_token();
        let is_sync = sched.is_sync();
        if is_sync {
            streamer
                .update_data(&cancel)
                .await
                .map_err(|source| ProviderError::InitialLoad {
                    name: name.clone(),
                    source,
                })?;
        }

        let mut entries = self.entries.write();
        // shutdown() cancels before draining under this lock.
        if self.root.is_cancelled() {
            return Err(ProviderError::ShutDown(name));
        }
        if entries.contains_key(&name) {
            return Err(ProviderError::Duplicate(name));
        }
        let task = tokio::spawn(refresh_loop(
            Arc::clone(&streamer),
            interval,
            is_sync,
            cancel.clone(),
        ));
        entries.insert(
            name.clone(),
            Entry {
                streamer,
                cancel,
                task,
            },
        );
        tracing::info!(
            "Provider '{}' registered streamer '{}' (interval {:?}, sync {})",
            self.cfg.name,
            name,
            interval,
            is_sync
        );
        Ok(())
    }

    /// Looks a streamer up by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Streamer>> {
        self.entries
            .read()
            .get(name)
            .map(|entry| Arc::clone(&entry.streamer))
    }

    /// The container of the named streamer.
    pub fn container(&self, name: &str) -> Option<Arc<dyn Container>> {
        self.get(name).map(|streamer| streamer.container())
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered streamers.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns `true` when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Stops refreshing the named streamer and forgets it.
    pub fn remove(&self, name: &str) -> Option<Arc<dyn Streamer>> {
        let entry = self.entries.write().remove(name)?;
        entry.cancel.cancel();
        tracing::info!("Provider '{}' removed streamer '{}'", self.cfg.name, name);
        Some(entry.streamer)
    }

    /// Removes every streamer that has not committed a cycle within `expire_time`
    /// as of `now`, returning their names.
    pub fn evict_expired(&self, now: DateTime<Utc>) -> Vec<String> {
        let expire_time = self.cfg.expire_time();
        if expire_time.is_zero() {
            return Vec::new();
        }

        // Decided and removed under one write lock, against the entry that is
        // registered at that moment.
        let evicted: Vec<(String, Entry)> = {
            let mut entries = self.entries.write();
            let expired: Vec<String> = entries
                .iter()
                .filter(|(_, entry)| entry.streamer.sched_info().is_expired(expire_time, now))
                .map(|(name, _)| name.clone())
                .collect();
            expired
                .into_iter()
                .filter_map(|name| entries.remove(&name).map(|entry| (name, entry)))
                .collect()
        };

        evicted
            .into_iter()
            .map(|(name, entry)| {
                entry.cancel.cancel();
                tracing::warn!(
                    "Provider '{}' evicted streamer '{}': no successful refresh within {:?}",
                    self.cfg.name,
                    name,
                    expire_time
                );
                name
            })
            .collect()
    }

    /// Runs `evict_expired` every `expire_check_interval` until shutdown.
    ///
    /// Returns `false` when eviction is disabled or a janitor is already running.
    pub fn spawn_janitor(self: &Arc<Self>) -> bool {
        let period = self.cfg.expire_check_interval();
        if self.cfg.expire_time == 0 || period.is_zero() {
            return false;
        }
        let mut janitor = self.janitor.lock();
        if janitor.is_some() {
            return false;
        }

        let provider: Weak<Self> = Arc::downgrade(self);
        let cancel = self.root.child_token();
        *janitor = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(provider) = provider.upgrade() else {
                    break;
                };
                provider.evict_expired(Utc::now());
            }
        }));
        true
    }

    /// Cancels every refresh task and the janitor and waits for them to stop.
    pub async fn shutdown(&self) {
        self.root.cancel();
        let drained: Vec<(String, Entry)> = self.entries.write().drain().collect();
        let janitor = self.janitor.lock().take();

        for (name, entry) in drained {
            if let Err(e) = entry.task.await {
                tracing::error!("Refresh task of streamer '{}' ended abnormally: {}", name, e);
            }
        }
        if let Some(janitor) = janitor {
            let _ = janitor.await;
        }
        tracing::info!("Provider '{}' shut down", self.cfg.name);
    }
}

impl Drop for StreamerProvider {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

async fn refresh_loop(
    streamer: Arc<dyn Streamer>,
    interval: Duration,
    loaded: bool,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    if loaded {
        // The first tick fires at once; the sync load already covered it.
        ticker.tick().await;
    }

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        // Failures are recorded in SchedInfo and logged by the streamer.
        if let Err(StreamerError::Cancelled) = streamer.update_data(&cancel).await {
            break;
        }
    }
    tracing::debug!("Refresh loop of streamer '{}' stopped", streamer.name());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{MapKey, Value};
    use crate::parser::{FnParser, KvLineParser, ParseError, ParserResult};
    use crate::source::{LocalFileSource, StaticSource};
    use crate::streamer::SourceStreamer;
    use serde_json::json;

    fn static_streamer(name: &str, data: &str, interval_ms: u64, is_sync: bool) -> (Arc<StaticSource>, Arc<SourceStreamer>) {
        let source = Arc::new(StaticSource::new(data));
        let streamer = SourceStreamer::new(name, source.clone(), Arc::new(KvLineParser))
            .with_interval(Duration::from_millis(interval_ms))
            .with_sync(is_sync);
        (source, Arc::new(streamer))
    }

    fn broken_streamer(name: &str, is_sync: bool) -> Arc<SourceStreamer> {
        let parser = FnParser(|_: &[u8], _: &Value| -> Vec<ParserResult> {
            vec![Err(ParseError::Undecodable("broken".into()))]
        });
        Arc::new(
            SourceStreamer::new(name, Arc::new(StaticSource::new("x")), Arc::new(parser))
                .with_interval(Duration::from_secs(3600))
                .with_sync(is_sync),
        )
    }

    async fn wait_for<F: Fn() -> bool>(check: F) -> bool {
        for _ in 0..200 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_sync_register_loads_before_returning() {
        let provider = StreamerProvider::new(StreamerProviderCfg::new("test"));
        let (_, streamer) = static_streamer("users", "a\t1\n", 60_000, true);

        provider.register(streamer).await.unwrap();

        let container = provider.container("users").unwrap();
        assert_eq!(container.get(&MapKey::from("a")).as_deref(), Some(&json!(1)));
        assert_eq!(provider.names(), vec!["users".to_string()]);
        provider.shutdown().await;
    }

    #[tokio::test]
    async fn test_async_streamer_loads_on_its_task_and_refreshes() {
        let provider = StreamerProvider::new(StreamerProviderCfg::new("test"));
        let (source, streamer) = static_streamer("prices", "a\t1\n", 20, false);
        provider.register(streamer).await.unwrap();

        let container = || provider.container("prices").unwrap();
        assert!(wait_for(|| container().contains(&MapKey::from("a"))).await);

        source.set("b\t2\n");
        assert!(wait_for(|| container().contains(&MapKey::from("b"))).await);
        assert!(!container().contains(&MapKey::from("a")));
        provider.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_sync_load_rejects_registration() {
        let dir = tempfile::tempdir().unwrap();
        let provider = StreamerProvider::new(StreamerProviderCfg::new("test"));
        let streamer = SourceStreamer::new(
            "missing",
            Arc::new(LocalFileSource::new(dir.path().join("absent.tsv"))),
            Arc::new(KvLineParser),
        )
        .with_sync(true);

        let err = provider.register(Arc::new(streamer)).await.unwrap_err();
        assert!(matches!(err, ProviderError::InitialLoad { ref name, .. } if name == "missing"));
        assert!(provider.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_and_zero_interval_are_rejected() {
        let provider = StreamerProvider::new(StreamerProviderCfg::new("test"));
        let (_, first) = static_streamer("dup", "a\t1\n", 60_000, false);
        let (_, second) = static_streamer("dup", "a\t2\n", 60_000, false);
        let (_, zero) = static_streamer("zero", "a\t1\n", 0, false);

        provider.register(first).await.unwrap();
        assert!(matches!(provider.register(second).await, Err(ProviderError::Duplicate(_))));
        assert!(matches!(provider.register(zero).await, Err(ProviderError::ZeroInterval(_))));
        assert_eq!(provider.len(), 1);
        provider.shutdown().await;
    }

    #[tokio::test]
    async fn test_remove_stops_refreshing() {
        let provider = StreamerProvider::new(StreamerProviderCfg::new("test"));
        let (_, streamer) = static_streamer("gone", "a\t1\n", 10, false);
        provider.register(streamer.clone()).await.unwrap();
        assert!(wait_for(|| streamer.sched_info().snapshot().cycles > 0).await);

        assert!(provider.remove("gone").is_some());
        assert!(provider.get("gone").is_none());
        assert!(provider.remove("gone").is_none());

        tokio::time::sleep(Duration::from_millis(30)).await;
        let settled = streamer.sched_info().snapshot().cycles;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(streamer.sched_info().snapshot().cycles, settled);
    }

    #[tokio::test]
    async fn test_evict_expired() {
        let cfg = StreamerProviderCfg {
            expire_time: 60,
            ..StreamerProviderCfg::new("test")
        };
        let provider = StreamerProvider::new(cfg);
        let (_, healthy) = static_streamer("healthy", "a\t1\n", 3_600_000, true);
        provider.register(healthy).await.unwrap();
        provider.register(broken_streamer("broken", false)).await.unwrap();

        let now = Utc::now();
        assert!(provider.evict_expired(now).is_empty());
        assert_eq!(provider.len(), 2);

        let mut evicted = provider.evict_expired(now + chrono::Duration::seconds(120));
        evicted.sort();
        assert_eq!(evicted, vec!["broken".to_string(), "healthy".to_string()]);
        assert!(provider.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_eviction_spares_a_reregistered_streamer() {
        let cfg = StreamerProviderCfg {
            expire_time: 60,
            ..StreamerProviderCfg::new("test")
        };
        let provider = StreamerProvider::new(cfg);

        for _ in 0..50 {
            let stale = broken_streamer("x", false);
            stale.sched_info().update(|info| {
                info.registered_at = info.registered_at - chrono::Duration::seconds(120)
            });
            provider.register(stale).await.unwrap();

            let evictor = {
                let provider = Arc::clone(&provider);
                tokio::task::spawn_blocking(move || provider.evict_expired(Utc::now()))
            };
            provider.remove("x");
            let (_, fresh) = static_streamer("x", "a\t1\n", 3_600_000, true);
            provider.register(fresh).await.unwrap();
            evictor.await.unwrap();

            let current = provider.get("x").unwrap();
            assert!(current.sched_info().snapshot().last_success.is_some());
            assert!(provider.remove("x").is_some());
        }
        provider.shutdown().await;
    }

    #[tokio::test]
    async fn test_register_after_shutdown_is_rejected() {
        let provider = StreamerProvider::new(StreamerProviderCfg::new("test"));
        provider.shutdown().await;

        let (_, late) = static_streamer("late", "a\t1\n", 60_000, false);
        let (_, late_sync) = static_streamer("late_sync", "a\t1\n", 60_000, true);
        assert!(matches!(provider.register(late).await, Err(ProviderError::ShutDown(_))));
        assert!(matches!(provider.register(late_sync).await, Err(ProviderError::ShutDown(_))));
        assert!(provider.is_empty());
    }

    #[tokio::test]
    async fn test_zero_expire_time_never_evicts() {
        let provider = StreamerProvider::new(StreamerProviderCfg::new("test"));
        provider.register(broken_streamer("broken", false)).await.unwrap();

        let far = Utc::now() + chrono::Duration::days(365);
        assert!(provider.evict_expired(far).is_empty());
        assert!(!provider.spawn_janitor());
        provider.shutdown().await;
    }

    #[tokio::test]
    async fn test_janitor_evicts_failing_streamer() {
        let cfg = StreamerProviderCfg {
            name: "test".into(),
            expire_time: 1,
            expire_check_interval: 1,
        };
        let provider = StreamerProvider::new(cfg);
        provider.register(broken_streamer("broken", false)).await.unwrap();
        assert!(provider.spawn_janitor());
        assert!(!provider.spawn_janitor());

        let mut gone = false;
        for _ in 0..40 {
            if provider.is_empty() {
                gone = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(gone);
        provider.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_everything() {
        let provider = StreamerProvider::new(StreamerProviderCfg::new("test"));
        let (_, a) = static_streamer("a", "k\t1\n", 10, false);
        let (_, b) = static_streamer("b", "k\t2\n", 10, true);
        provider.register(a).await.unwrap();
        provider.register(b).await.unwrap();

        provider.shutdown().await;
        assert!(provider.is_empty());
    }
}
