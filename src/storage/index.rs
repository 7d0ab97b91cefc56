//! Shard Index
//!
//! Authoritative mapping from shard id to the keys it currently holds.
//!
//! ## Invariants
//! - A key is listed in exactly one shard, or in none
//! - Shards iterate in creation order (ascending id)
//! - A shard at capacity is never chosen as a write target

use std::collections::{BTreeMap, HashMap};

use crate::error::{Result, VaultError};

/// Numeric shard identifier; shard `n` lives in `data_<n>.json`
pub type ShardId = u64;

/// On-disk form of the index: shard file name → keys
pub type IndexRecord = BTreeMap<String, Vec<String>>;

/// In-memory shard index with a reverse key → shard lookup
#[derive(Debug, Default, Clone)]
pub struct ShardIndex {
    /// Shard id → ordered key list
    shards: BTreeMap<ShardId, Vec<String>>,

    /// Key → owning shard (derived from `shards`)
    locations: HashMap<String, ShardId>,
}

impl ShardIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild an index from its persisted record
    ///
    /// A key listed under more than one shard keeps its first (lowest id)
    /// placement; later duplicates are dropped.
    pub fn from_record(record: IndexRecord) -> Result<Self> {
        let mut parsed = Vec::with_capacity(record.len());
        for (name, keys) in record {
            let id = parse_shard_file_name(&name).ok_or_else(|| {
                VaultError::Storage(format!("Unrecognized shard name in index: {}", name))
            })?;
            parsed.push((id, keys));
        }
        parsed.sort_by_key(|(id, _)| *id);

        let mut index = Self::new();
        for (id, keys) in parsed {
            let slot = index.shards.entry(id).or_default();
            for key in keys {
                if index.locations.contains_key(&key) {
                    tracing::warn!("Key {:?} listed in more than one shard, keeping first", key);
                    continue;
                }
                index.locations.insert(key.clone(), id);
                slot.push(key);
            }
        }

        Ok(index)
    }

    /// Produce the persisted record for this index
    pub fn to_record(&self) -> IndexRecord {
        self.shards
            .iter()
            .map(|(id, keys)| (shard_file_name(*id), keys.clone()))
            .collect()
    }

    /// Which shard holds `key`, if any
    pub fn locate(&self, key: &str) -> Option<ShardId> {
        self.locations.get(key).copied()
    }

    /// Whether `key` is assigned to any shard
    pub fn contains(&self, key: &str) -> bool {
        self.locations.contains_key(key)
    }

    /// Number of keys currently in a shard (0 for unknown shards)
    pub fn shard_len(&self, id: ShardId) -> usize {
        self.shards.get(&id).map(Vec::len).unwrap_or(0)
    }

    /// Keys assigned to a shard, in insertion order
    pub fn keys(&self, id: ShardId) -> Option<&[String]> {
        self.shards.get(&id).map(Vec::as_slice)
    }

    /// Shard ids in creation order
    pub fn shard_ids(&self) -> impl Iterator<Item = ShardId> + '_ {
        self.shards.keys().copied()
    }

    /// Number of shards
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Total number of keys across all shards
    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    /// Choose the shard a new key should be written to
    ///
    /// Returns the first shard in creation order with room. The newest shard
    /// is part of that scan, so when every shard is full a new one is
    /// created. The boolean is `true` when the shard was just created.
    pub fn choose_target(&mut self, capacity: usize) -> (ShardId, bool) {
        if let Some((&id, _)) = self.shards.iter().find(|(_, keys)| keys.len() < capacity) {
            return (id, false);
        }

        let id = self.shards.keys().next_back().map(|id| id + 1).unwrap_or(1);
        self.shards.insert(id, Vec::new());
        (id, true)
    }

    /// Assign `key` to shard `id` (no-op if already there)
    pub fn assign(&mut self, id: ShardId, key: &str) {
        if self.locations.get(key) == Some(&id) {
            return;
        }
        if let Some(previous) = self.locations.remove(key) {
            if let Some(keys) = self.shards.get_mut(&previous) {
                keys.retain(|k| k != key);
            }
        }
        self.shards.entry(id).or_default().push(key.to_string());
        self.locations.insert(key.to_string(), id);
    }

    /// Remove `key` from whichever shard holds it
    ///
    /// The shard itself stays in the index even when it becomes empty.
    pub fn remove(&mut self, key: &str) -> Option<ShardId> {
        let id = self.locations.remove(key)?;
        if let Some(keys) = self.shards.get_mut(&id) {
            keys.retain(|k| k != key);
        }
        Some(id)
    }
}

// =============================================================================
// Shard File Naming
// =============================================================================

/// "data_7.json" for shard 7
pub fn shard_file_name(id: ShardId) -> String {
    format!("data_{}.json", id)
}

/// "data_7.json" → Some(7)
pub fn parse_shard_file_name(name: &str) -> Option<ShardId> {
    name.strip_prefix("data_")?.strip_suffix(".json")?.parse().ok()
}
