//! Tests for the Shard Index
//!
//! These tests verify:
//! - Target selection (first shard with room, then a new shard)
//! - Idempotent assignment and removal
//! - Conversion to and from the persisted record

use vaultkv::storage::{parse_shard_file_name, shard_file_name, IndexRecord, ShardIndex};

// =============================================================================
// Helper Functions
// =============================================================================

/// Place `count` keys through the normal target-selection path
fn fill(index: &mut ShardIndex, capacity: usize, prefix: &str, count: usize) {
    for i in 0..count {
        let key = format!("{}{}", prefix, i);
        let (id, _) = index.choose_target(capacity);
        index.assign(id, &key);
    }
}

// =============================================================================
// Target Selection Tests
// =============================================================================

#[test]
fn test_first_target_creates_shard_one() {
    let mut index = ShardIndex::new();

    assert_eq!(index.choose_target(100), (1, true));
    assert_eq!(index.shard_count(), 1);

    // Still empty, so it is reused rather than recreated
    assert_eq!(index.choose_target(100), (1, false));
    assert_eq!(index.shard_count(), 1);
}

#[test]
fn test_full_shard_is_never_chosen() {
    let mut index = ShardIndex::new();
    fill(&mut index, 3, "k", 7);

    assert_eq!(index.shard_count(), 3);
    assert_eq!(index.shard_len(1), 3);
    assert_eq!(index.shard_len(2), 3);
    assert_eq!(index.shard_len(3), 1);
    assert_eq!(index.choose_target(3), (3, false));
}

#[test]
fn test_room_in_older_shard_is_reused() {
    let mut index = ShardIndex::new();
    fill(&mut index, 2, "k", 4);
    assert_eq!(index.shard_count(), 2);

    assert_eq!(index.remove("k0"), Some(1));
    assert_eq!(index.choose_target(2), (1, false));
}

#[test]
fn test_new_shard_after_all_full() {
    let mut index = ShardIndex::new();
    fill(&mut index, 2, "k", 4);

    assert_eq!(index.choose_target(2), (3, true));
}

// =============================================================================
// Assignment Tests
// =============================================================================

#[test]
fn test_assign_is_idempotent() {
    let mut index = ShardIndex::new();
    index.choose_target(10);
    index.assign(1, "a");
    index.assign(1, "a");

    assert_eq!(index.keys(1), Some(&["a".to_string()][..]));
    assert_eq!(index.len(), 1);
}

#[test]
fn test_remove_keeps_empty_shard() {
    let mut index = ShardIndex::new();
    index.choose_target(10);
    index.assign(1, "a");

    assert_eq!(index.remove("a"), Some(1));
    assert_eq!(index.remove("a"), None);
    assert!(index.is_empty());
    assert_eq!(index.shard_count(), 1);
    assert!(!index.contains("a"));
}

// =============================================================================
// Persisted Record Tests
// =============================================================================

#[test]
fn test_record_uses_shard_file_names() {
    let mut index = ShardIndex::new();
    fill(&mut index, 2, "k", 3);

    let record = index.to_record();
    assert_eq!(record["data_1.json"], vec!["k0", "k1"]);
    assert_eq!(record["data_2.json"], vec!["k2"]);

    let rebuilt = ShardIndex::from_record(record).unwrap();
    assert_eq!(rebuilt.locate("k2"), Some(2));
    assert_eq!(rebuilt.len(), 3);
}

#[test]
fn test_duplicate_key_keeps_first_shard() {
    let mut record = IndexRecord::new();
    record.insert("data_2.json".to_string(), vec!["dup".to_string()]);
    record.insert("data_1.json".to_string(), vec!["dup".to_string(), "a".to_string()]);

    let index = ShardIndex::from_record(record).unwrap();

    assert_eq!(index.locate("dup"), Some(1));
    assert_eq!(index.shard_len(2), 0);
    assert_eq!(index.len(), 2);
}

#[test]
fn test_unknown_shard_name_is_rejected() {
    let mut record = IndexRecord::new();
    record.insert("shard-one".to_string(), vec!["a".to_string()]);

    assert!(ShardIndex::from_record(record).is_err());
}

#[test]
fn test_shard_file_names() {
    assert_eq!(shard_file_name(7), "data_7.json");
    assert_eq!(parse_shard_file_name("data_7.json"), Some(7));
    assert_eq!(parse_shard_file_name("data_x.json"), None);
    assert_eq!(parse_shard_file_name("index.json"), None);
}
