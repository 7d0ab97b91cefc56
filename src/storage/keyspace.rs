//! Key Space (storage engine)
//!
//! One key space = one directory of shard files + index, fully cached in
//! memory, written back by a debounced [`FlushScheduler`].
//!
//! ## Concurrency Model
//!
//! - All reads and mutations go through one `Mutex<KeySpaceState>`, so
//!   mutations apply one at a time in arrival order. Batches hold the lock
//!   for the whole batch.
//! - Disk writes happen only on the scheduler thread. A flush snapshots the
//!   dirty shards under the lock and writes them after releasing it, so the
//!   cache is always at least as fresh as disk.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use serde_json::{Map, Value};

use crate::config::StoreOptions;
use crate::error::{Result, VaultError};

use super::index::{ShardId, ShardIndex};
use super::scheduler::{FlushScheduler, SchedulerState};
use super::shard::{self, ShardData};

/// Mutable state of a key space (guarded by one lock)
#[derive(Debug, Default)]
struct KeySpaceState {
    index: ShardIndex,
    cache: BTreeMap<ShardId, ShardData>,
    write_queue: BTreeSet<ShardId>,
}

/// State shared between the key space handle and its scheduler thread
struct Shared {
    dir: PathBuf,
    options: StoreOptions,
    state: Mutex<KeySpaceState>,

    /// Set once a flush fails or the key space is closed; mutations are
    /// refused from then on
    failure: Mutex<Option<String>>,
}

/// Storage engine for a single key space
pub struct KeySpace {
    shared: Arc<Shared>,
    scheduler: FlushScheduler,

    /// See [`KeySpace::order_writes`]
    write_order: Mutex<()>,
}

impl KeySpace {
    /// Open or create a key space in `dir`
    ///
    /// On startup:
    /// 1. Create the directory if needed
    /// 2. Load the index (missing index = empty key space)
    /// 3. Hydrate the cache from every shard the index references
    /// 4. Start the write-back scheduler
    pub fn open(dir: impl AsRef<Path>, options: StoreOptions) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let index = match shard::load_index(&dir)? {
            Some(record) => ShardIndex::from_record(record)?,
            None => ShardIndex::new(),
        };

        let mut cache = BTreeMap::new();
        for id in index.shard_ids() {
            cache.insert(id, shard::load_shard(&dir, id)?);
        }

        tracing::debug!(
            "Opened key space {} ({} shards, {} keys)",
            dir.display(),
            index.shard_count(),
            index.len()
        );

        let shared = Arc::new(Shared {
            dir,
            options,
            state: Mutex::new(KeySpaceState {
                index,
                cache,
                write_queue: BTreeSet::new(),
            }),
            failure: Mutex::new(None),
        });

        let flusher = Arc::clone(&shared);
        let scheduler = FlushScheduler::spawn(
            "vaultkv-flush".to_string(),
            options.debounce_interval,
            options.max_debounce_count,
            move || flusher.flush_dirty(),
        )?;

        Ok(Self {
            shared,
            scheduler,
            write_order: Mutex::new(()),
        })
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Get a value by key
    pub fn get(&self, key: &str) -> Option<Value> {
        let state = self.shared.state.lock();
        Self::lookup(&state, key)
    }

    /// Whether the key exists
    pub fn has(&self, key: &str) -> bool {
        self.shared.state.lock().index.contains(key)
    }

    /// Snapshot of every key → value, merged in shard order
    pub fn all(&self) -> Map<String, Value> {
        let state = self.shared.state.lock();
        let mut merged = Map::new();
        for data in state.cache.values() {
            for (key, value) in data {
                merged.insert(key.clone(), value.clone());
            }
        }
        merged
    }

    /// Get several keys, preserving input order
    pub fn get_many<S: AsRef<str>>(&self, keys: &[S]) -> Vec<Option<Value>> {
        let state = self.shared.state.lock();
        keys.iter().map(|k| Self::lookup(&state, k.as_ref())).collect()
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Set a key, returning the stored value
    ///
    /// Writing the value already cached for the key succeeds without
    /// dirtying the shard.
    pub fn set(&self, key: &str, value: Value) -> Result<Value> {
        self.ensure_writable()?;
        let dirtied = {
            let mut state = self.shared.state.lock();
            Self::apply_set(&mut state, self.shared.options.max_keys_per_shard, key, value.clone())
        };
        if dirtied {
            self.scheduler.mark_dirty();
        }
        Ok(value)
    }

    /// Delete a key; `false` when it was not present
    pub fn delete(&self, key: &str) -> Result<bool> {
        self.ensure_writable()?;
        let removed = {
            let mut state = self.shared.state.lock();
            Self::apply_delete(&mut state, key)
        };
        if removed {
            self.scheduler.mark_dirty();
        }
        Ok(removed)
    }

    /// Set several entries in order, returning the stored values
    pub fn set_many(&self, entries: Vec<(String, Value)>) -> Result<Vec<Value>> {
        self.ensure_writable()?;
        let capacity = self.shared.options.max_keys_per_shard;
        let mut stored = Vec::with_capacity(entries.len());
        let mut marks = 0;
        {
            let mut state = self.shared.state.lock();
            for (key, value) in entries {
                if Self::apply_set(&mut state, capacity, &key, value.clone()) {
                    marks += 1;
                }
                stored.push(value);
            }
        }
        for _ in 0..marks {
            self.scheduler.mark_dirty();
        }
        Ok(stored)
    }

    /// Delete several keys in order, returning which ones existed
    pub fn delete_many<S: AsRef<str>>(&self, keys: &[S]) -> Result<Vec<bool>> {
        self.ensure_writable()?;
        let results: Vec<bool> = {
            let mut state = self.shared.state.lock();
            keys.iter()
                .map(|k| Self::apply_delete(&mut state, k.as_ref()))
                .collect()
        };
        for _ in results.iter().filter(|removed| **removed) {
            self.scheduler.mark_dirty();
        }
        Ok(results)
    }

    /// Hold while mutating to order the mutation with side effects
    ///
    /// Holders run one at a time, so anything a holder records next to its
    /// mutation (such as an operation log append) lands in apply order.
    pub fn order_writes(&self) -> MutexGuard<'_, ()> {
        self.write_order.lock()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Write every dirty shard now and wait for it
    pub fn flush(&self) -> Result<()> {
        self.scheduler.flush()
    }

    /// Final flush and scheduler shutdown; later mutations are refused
    ///
    /// Fails if dirty shards could not be written.
    pub fn close(&self) -> Result<()> {
        self.shared
            .failure
            .lock()
            .get_or_insert_with(|| "key space closed".to_string());
        self.scheduler.shutdown()
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Directory holding this key space's files
    pub fn dir(&self) -> &Path {
        &self.shared.dir
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        self.shared.state.lock().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of shards (including shards emptied by deletes)
    pub fn shard_count(&self) -> usize {
        self.shared.state.lock().index.shard_count()
    }

    /// Number of keys in shard `id` (0 for unknown shards)
    pub fn shard_len(&self, id: ShardId) -> usize {
        self.shared.state.lock().index.shard_len(id)
    }

    /// Number of keys held by each shard, in creation order
    pub fn shard_sizes(&self) -> Vec<(ShardId, usize)> {
        let state = self.shared.state.lock();
        state
            .index
            .shard_ids()
            .map(|id| (id, state.index.shard_len(id)))
            .collect()
    }

    /// Shard currently holding `key`
    pub fn shard_of(&self, key: &str) -> Option<ShardId> {
        self.shared.state.lock().index.locate(key)
    }

    /// Number of shards with unflushed mutations
    pub fn dirty_shards(&self) -> usize {
        self.shared.state.lock().write_queue.len()
    }

    /// Write-back scheduler state
    pub fn scheduler_state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    /// Failure message if the key space stopped accepting writes
    pub fn failure(&self) -> Option<String> {
        self.shared.failure.lock().clone()
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn ensure_writable(&self) -> Result<()> {
        match self.shared.failure.lock().as_ref() {
            Some(reason) => Err(VaultError::Storage(format!(
                "Key space {} is not writable: {}",
                self.shared.dir.display(),
                reason
            ))),
            None => Ok(()),
        }
    }

    fn lookup(state: &KeySpaceState, key: &str) -> Option<Value> {
        let id = state.index.locate(key)?;
        state.cache.get(&id)?.get(key).cloned()
    }

    /// Returns whether the shard was dirtied
    fn apply_set(state: &mut KeySpaceState, capacity: usize, key: &str, value: Value) -> bool {
        let id = match state.index.locate(key) {
            Some(id) => id,
            None => {
                let (id, created) = state.index.choose_target(capacity);
                if created {
                    tracing::debug!("Created shard {}", id);
                }
                state.index.assign(id, key);
                id
            }
        };

        let data = state.cache.entry(id).or_default();
        if data.get(key) == Some(&value) {
            return false;
        }
        data.insert(key.to_string(), value);
        state.write_queue.insert(id);
        true
    }

    /// Returns whether the key existed
    fn apply_delete(state: &mut KeySpaceState, key: &str) -> bool {
        let Some(id) = state.index.remove(key) else {
            return false;
        };
        if let Some(data) = state.cache.get_mut(&id) {
            data.remove(key);
        }
        state.write_queue.insert(id);
        true
    }
}

impl Shared {
    /// Write every queued shard plus the index
    ///
    /// Runs on the scheduler thread only.
    fn flush_dirty(&self) -> Result<()> {
        let (shards, record) = {
            let mut state = self.state.lock();
            if state.write_queue.is_empty() {
                return Ok(());
            }
            let drained = std::mem::take(&mut state.write_queue);
            let shards: Vec<(ShardId, ShardData)> = drained
                .into_iter()
                .map(|id| (id, state.cache.get(&id).cloned().unwrap_or_default()))
                .collect();
            (shards, state.index.to_record())
        };

        let written = shards.len();
        let result = shards
            .iter()
            .try_for_each(|(id, data)| shard::store_shard(&self.dir, *id, data))
            .and_then(|_| shard::store_index(&self.dir, &record));

        match result {
            Ok(()) => {
                tracing::debug!("Flushed {} shard(s) in {}", written, self.dir.display());
                Ok(())
            }
            Err(e) => {
                tracing::error!("Flush failed in {}: {}", self.dir.display(), e);
                // Unwritten shards stay dirty so a later flush retries them
                self.state
                    .lock()
                    .write_queue
                    .extend(shards.iter().map(|(id, _)| *id));
                self.failure
                    .lock()
                    .get_or_insert_with(|| format!("flush failed: {}", e));
                Err(e)
            }
        }
    }
}
