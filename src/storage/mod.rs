//! Storage Module
//!
//! Sharded, fully cached key spaces with debounced write-back.
//!
//! ## Responsibilities
//! - Route each key to a bounded shard file through the shard index
//! - Serve every read from the in-memory cache
//! - Coalesce bursts of mutations into few disk writes
//! - Map key space names to engines (registry)
//!
//! ## On-Disk Layout (per key space)
//! ```text
//! {data_dir}/{path}/
//!   ├── index.json       {"data_1.json": ["k1", "k2", ...], ...}
//!   ├── data_1.json      {"k1": <value>, "k2": <value>, ...}
//!   ├── data_2.json
//!   └── ...
//! ```

mod index;
mod keyspace;
mod registry;
mod scheduler;
mod shard;

pub use index::{parse_shard_file_name, shard_file_name, IndexRecord, ShardId, ShardIndex};
pub use keyspace::KeySpace;
pub use registry::{normalize_path, KeySpaceRegistry};
pub use scheduler::{FlushScheduler, SchedulerState};
pub use shard::{ShardData, INDEX_FILENAME};
