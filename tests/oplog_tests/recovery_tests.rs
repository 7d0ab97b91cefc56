//! Tests for operation log recovery
//!
//! These tests verify:
//! - Recovery without a log is a no-op
//! - Exactly the trailing window of mutations is replayed, oldest first
//! - Batches and deletes replay through the same primitives as live traffic
//! - Malformed lines and bad paths are skipped without aborting
//! - Replayed state is flushed before recovery returns

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde_json::json;
use tempfile::TempDir;
use vaultkv::oplog::{OpLogRecord, RecoveryEngine, RecoveryReport};
use vaultkv::protocol::{Entry, Operation, Request};
use vaultkv::storage::{KeySpace, KeySpaceRegistry};
use vaultkv::StoreOptions;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup() -> (TempDir, PathBuf, KeySpaceRegistry) {
    let temp = TempDir::new().unwrap();
    let log_path = temp.path().join("oplog.log");
    let registry = KeySpaceRegistry::new(temp.path().join("data"), StoreOptions::default());
    (temp, log_path, registry)
}

/// Append the log line for `operation` on `path`
fn log(log_path: &Path, n: usize, path: &str, operation: Operation) {
    let request = Request {
        request_id: format!("req-{}", n),
        path: path.to_string(),
        operation,
    };
    let line = OpLogRecord::from_request(&request, n as i64).unwrap().to_line();
    append_raw(log_path, &line);
}

fn append_raw(log_path: &Path, text: &str) {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .unwrap();
    file.write_all(text.as_bytes()).unwrap();
}

fn set(key: &str, value: serde_json::Value) -> Operation {
    Operation::Set {
        key: key.to_string(),
        value,
    }
}

// =============================================================================
// Basic Recovery Tests
// =============================================================================

#[test]
fn test_missing_log_is_noop() {
    let (_temp, log_path, registry) = setup();

    let report = RecoveryEngine::new(&log_path, 1000).run(&registry).unwrap();

    assert_eq!(report, RecoveryReport::default());
    assert!(registry.is_empty());
}

#[test]
fn test_empty_log() {
    let (_temp, log_path, registry) = setup();
    fs::write(&log_path, "").unwrap();

    let report = RecoveryEngine::new(&log_path, 1000).run(&registry).unwrap();

    assert_eq!(report.lines_read, 0);
    assert_eq!(report.replayed, 0);
}

#[test]
fn test_replays_sets_and_deletes_in_order() {
    let (_temp, log_path, registry) = setup();
    log(&log_path, 1, "users", set("alice", json!(1)));
    log(&log_path, 2, "users", set("bob", json!(2)));
    log(&log_path, 3, "users", set("alice", json!(3)));
    log(&log_path, 4, "users", Operation::Delete { key: "bob".to_string() });

    let report = RecoveryEngine::new(&log_path, 1000).run(&registry).unwrap();

    assert_eq!(report.replayed, 4);
    assert_eq!(report.key_spaces, 1);
    let users = registry.get("users").unwrap();
    assert_eq!(users.get("alice"), Some(json!(3)));
    assert_eq!(users.get("bob"), None);
}

#[test]
fn test_replays_batches() {
    let (_temp, log_path, registry) = setup();
    log(
        &log_path,
        1,
        "orders",
        Operation::SetMany {
            data: vec![
                Entry::new("o1", json!({"total": 5})),
                Entry::new("o2", json!({"total": 7})),
                Entry::new("o3", json!({"total": 9})),
            ],
        },
    );
    log(
        &log_path,
        2,
        "orders",
        Operation::DeleteMany {
            keys: vec!["o2".to_string(), "missing".to_string()],
        },
    );

    let report = RecoveryEngine::new(&log_path, 1000).run(&registry).unwrap();

    assert_eq!(report.replayed, 2);
    let orders = registry.get("orders").unwrap();
    assert_eq!(orders.len(), 2);
    assert_eq!(orders.get("o3"), Some(json!({"total": 9})));
    assert_eq!(orders.get("o2"), None);
}

#[test]
fn test_reads_are_not_replayed() {
    let (_temp, log_path, registry) = setup();
    log(&log_path, 1, "users", Operation::Get { key: "a".to_string() });
    log(&log_path, 2, "users", Operation::All);
    log(&log_path, 3, "users", set("a", json!(true)));

    let report = RecoveryEngine::new(&log_path, 1000).run(&registry).unwrap();

    assert_eq!(report.lines_read, 3);
    assert_eq!(report.mutations_found, 1);
    assert_eq!(report.replayed, 1);
}

// =============================================================================
// Replay Window Tests
// =============================================================================

#[test]
fn test_only_last_window_is_replayed() {
    let (temp, log_path, registry) = setup();
    let mut text = String::new();
    for n in 0..1500 {
        let request = Request {
            request_id: format!("req-{}", n),
            path: "users".to_string(),
            operation: set(&format!("key{}", n), json!(n)),
        };
        text.push_str(&OpLogRecord::from_request(&request, n as i64).unwrap().to_line());
    }
    append_raw(&log_path, &text);

    let report = RecoveryEngine::new(&log_path, 1000).run(&registry).unwrap();

    assert_eq!(report.mutations_found, 1500);
    assert_eq!(report.replayed, 1000);

    let users = registry.get("users").unwrap();
    assert_eq!(users.len(), 1000);
    assert_eq!(users.get("key499"), None);
    assert_eq!(users.get("key500"), Some(json!(500)));
    assert_eq!(users.get("key1499"), Some(json!(1499)));
    assert!(users.shard_sizes().iter().all(|(_, n)| *n <= 100));

    // Flushed before returning
    registry.close_all().unwrap();
    let reopened = KeySpace::open(temp.path().join("data/users"), StoreOptions::default()).unwrap();
    assert_eq!(reopened.len(), 1000);
}

#[test]
fn test_delete_in_window_removes_flushed_key() {
    let (temp, log_path, registry) = setup();
    {
        let space =
            KeySpace::open(temp.path().join("data/users"), StoreOptions::default()).unwrap();
        space.set("stale", json!("on disk")).unwrap();
        space.set("kept", json!("on disk")).unwrap();
        space.close().unwrap();
    }
    log(&log_path, 1, "users", Operation::Delete { key: "stale".to_string() });

    RecoveryEngine::new(&log_path, 1000).run(&registry).unwrap();

    let users = registry.get("users").unwrap();
    assert_eq!(users.get("stale"), None);
    assert_eq!(users.get("kept"), Some(json!("on disk")));
}

// =============================================================================
// Malformed Input Tests
// =============================================================================

#[test]
fn test_malformed_lines_are_skipped() {
    let (_temp, log_path, registry) = setup();
    log(&log_path, 1, "users", set("a", json!(1)));
    append_raw(&log_path, "this is not a record\n");
    append_raw(&log_path, "2,\treq-2,\tusers,\tSET,\tb,\t{broken json\n");
    log(&log_path, 3, "users", set("c", json!(3)));

    let report = RecoveryEngine::new(&log_path, 1000).run(&registry).unwrap();

    assert_eq!(report.lines_read, 4);
    assert_eq!(report.skipped_malformed, 2);
    assert_eq!(report.replayed, 2);
    let users = registry.get("users").unwrap();
    assert_eq!(users.get("a"), Some(json!(1)));
    assert_eq!(users.get("b"), None);
    assert_eq!(users.get("c"), Some(json!(3)));
}

#[test]
fn test_escaping_path_is_skipped() {
    let (temp, log_path, registry) = setup();
    log(&log_path, 1, "../outside", set("a", json!(1)));
    log(&log_path, 2, "inside", set("a", json!(2)));

    let report = RecoveryEngine::new(&log_path, 1000).run(&registry).unwrap();

    assert_eq!(report.skipped_malformed, 1);
    assert_eq!(report.replayed, 1);
    assert_eq!(registry.paths(), vec!["inside"]);
    assert!(!temp.path().join("outside").exists());
}
