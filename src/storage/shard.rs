//! Shard and index files
//!
//! Every file is a JSON document written atomically: the bytes go to a
//! `.tmp` sibling, are synced, and the sibling is renamed over the target.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::Path;

use serde_json::{Map, Value};

use crate::error::Result;

use super::index::{shard_file_name, IndexRecord, ShardId};

/// Contents of one shard: key → value
pub type ShardData = Map<String, Value>;

/// Name of the index file inside a key space directory
pub const INDEX_FILENAME: &str = "index.json";

/// Load the index record; `None` when the key space has never been flushed
pub fn load_index(dir: &Path) -> Result<Option<IndexRecord>> {
    let path = dir.join(INDEX_FILENAME);
    match fs::read(&path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Persist the index record
pub fn store_index(dir: &Path, record: &IndexRecord) -> Result<()> {
    let bytes = serde_json::to_vec(record)?;
    write_atomic(&dir.join(INDEX_FILENAME), &bytes)
}

/// Load one shard's contents
///
/// A shard listed in the index but absent on disk was created and never
/// flushed; it hydrates as empty.
pub fn load_shard(dir: &Path, id: ShardId) -> Result<ShardData> {
    let path = dir.join(shard_file_name(id));
    match fs::read(&path) {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::warn!("Shard file {} missing, starting it empty", path.display());
            Ok(ShardData::new())
        }
        Err(e) => Err(e.into()),
    }
}

/// Persist one shard's contents
pub fn store_shard(dir: &Path, id: ShardId, data: &ShardData) -> Result<()> {
    let bytes = serde_json::to_vec(data)?;
    write_atomic(&dir.join(shard_file_name(id)), &bytes)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}
