//! # Versioned Container
//!
//! A `Container` whose published root is an `ArcSwap<Snapshot>`.
//!
//! Reads are a lock-free `load` of the current snapshot followed by a plain
//! `HashMap` lookup. Merges take the writer mutex, build the next snapshot
//! without touching the published one, and `store` it in one step. Readers that
//! loaded the previous snapshot keep it alive until they drop their `Arc`; after
//! that the old generation is freed.
//!
//! ## Cost:
//! An incremental merge starts from a copy of the current map, so it costs
//! O(container size + batch size) regardless of how small the batch is. Values
//! are shared through `Arc` and only keys and pointers are copied, but a large
//! container fed with frequent tiny deltas pays that copy on every cycle. A
//! full-replace merge costs O(batch size).

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use super::{
    Container, ContainerError, DataMode, MapKey, MergeReport, UpdateMode, Value,
};
use crate::parser::ParserResult;

/// # Snapshot
///
/// One immutable, published generation of a container.
#[derive(Debug, Default)]
pub struct Snapshot {
    version: u64,
    entries: HashMap<MapKey, Arc<Value>>,
}

impl Snapshot {
    /// Version number of this generation.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Looks a key up in this generation.
    pub fn get(&self, key: &MapKey) -> Option<&Arc<Value>> {
        self.entries.get(key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when the generation holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over the entries in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&MapKey, &Arc<Value>)> {
        self.entries.iter()
    }
}

/// # Versioned Container
///
/// The default container owned by every streamer.
pub struct VersionedContainer {
    /// The published generation. Only `merge` stores into it.
    current: ArcSwap<Snapshot>,
    /// Serialises merges so that each one builds on the previous generation.
    writer: Mutex<()>,
}

impl Default for VersionedContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl VersionedContainer {
    /// An empty container at version `0`.
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(Snapshot::default()),
            writer: Mutex::new(()),
        }
    }

    /// A pre-warmed container at version `1`, for data built outside a streamer.
    pub fn with_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (MapKey, Value)>,
    {
        let entries = entries
            .into_iter()
            .map(|(k, v)| (k, Arc::new(v)))
            .collect();
        Self {
            current: ArcSwap::from_pointee(Snapshot { version: 1, entries }),
            writer: Mutex::new(()),
        }
    }
}

impl Container for VersionedContainer {
    fn get(&self, key: &MapKey) -> Option<Arc<Value>> {
        self.current.load().entries.get(key).cloned()
    }

    fn len(&self) -> usize {
        self.current.load().entries.len()
    }

    fn version(&self) -> u64 {
        self.current.load().version
    }

    fn snapshot(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    fn merge(
        &self,
        results: Vec<ParserResult>,
        mode: UpdateMode,
    ) -> Result<MergeReport, ContainerError> {
        let _writer = self.writer.lock();
        let base = self.current.load_full();
        let mut entries = match mode {
            // O(len): the published map is never mutated in place.
            UpdateMode::Incremental => base.entries.clone(),
            UpdateMode::FullReplace => HashMap::with_capacity(results.len()),
        };

        let mut report = MergeReport::default();
        for result in results {
            let record = match result {
                Ok(record) => record,
                Err(err) => {
                    report.skipped += 1;
                    report.errors.push(err);
                    continue;
                }
            };
            match (mode, record.mode) {
                (_, DataMode::Upsert) | (UpdateMode::FullReplace, DataMode::FullReplace) => {
                    entries.insert(record.key, Arc::new(record.value));
                    report.applied += 1;
                }
                (UpdateMode::Incremental, DataMode::Delete) => {
                    entries.remove(&record.key);
                    report.applied += 1;
                }
                // A full dataset lists what exists; a delete in it has nothing to remove.
                (UpdateMode::FullReplace, DataMode::Delete) => report.skipped += 1,
                // Nothing has been published yet, so bailing out leaves no trace.
                (UpdateMode::Incremental, DataMode::FullReplace) => {
                    return Err(ContainerError::ModeConflict {
                        key: record.key,
                        mode: record.mode,
                        update: mode,
                    });
                }
            }
        }

        report.version = base.version + 1;
        self.current.store(Arc::new(Snapshot {
            version: report.version,
            entries,
        }));
        Ok(report)
    }
}
