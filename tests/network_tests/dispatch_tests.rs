//! Tests for request dispatch
//!
//! These tests verify:
//! - Concurrent writers to one key are logged in the order they were applied
//! - Replaying the log reproduces the live state
//! - Failed requests are not logged
//! - Reads are logged only with read auditing on

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;
use vaultkv::network::Dispatcher;
use vaultkv::oplog::{OpLogRecord, OpLogWriter, RecoveryEngine};
use vaultkv::protocol::{Method, Operation, Request};
use vaultkv::storage::KeySpaceRegistry;
use vaultkv::StoreOptions;

// =============================================================================
// Helper Functions
// =============================================================================

struct Fixture {
    _temp: TempDir,
    log_path: PathBuf,
    replay_dir: PathBuf,
    oplog: Arc<OpLogWriter>,
    dispatcher: Arc<Dispatcher>,
}

fn setup(audit_reads: bool) -> Fixture {
    let temp = TempDir::new().unwrap();
    let log_path = temp.path().join("oplog.log");
    let registry = Arc::new(KeySpaceRegistry::new(
        temp.path().join("data"),
        StoreOptions::default(),
    ));
    let oplog = Arc::new(OpLogWriter::open(&log_path).unwrap());
    let dispatcher = Arc::new(Dispatcher::new(registry, Arc::clone(&oplog), audit_reads));
    Fixture {
        replay_dir: temp.path().join("replay"),
        _temp: temp,
        log_path,
        oplog,
        dispatcher,
    }
}

fn set(key: &str, value: Value) -> Request {
    Request::new(
        "p",
        Operation::Set {
            key: key.to_string(),
            value,
        },
    )
}

fn read_log(log_path: &Path) -> Vec<OpLogRecord> {
    fs::read_to_string(log_path)
        .unwrap_or_default()
        .lines()
        .map(|line| OpLogRecord::parse(line).unwrap())
        .collect()
}

// =============================================================================
// Ordering Tests
// =============================================================================

#[test]
fn test_concurrent_sets_log_in_apply_order() {
    let fixture = setup(false);

    let writers: Vec<_> = (0..8)
        .map(|t| {
            let dispatcher = Arc::clone(&fixture.dispatcher);
            thread::spawn(move || {
                for i in 0..50 {
                    let response = dispatcher.handle(&set("shared", json!(t * 1000 + i)));
                    assert!(response.is_ok());
                    // Uneven pacing between writers, like slow replies
                    if (t + i) % 7 == 0 {
                        thread::sleep(Duration::from_millis(1));
                    }
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }
    fixture.oplog.sync().unwrap();

    let live = fixture
        .dispatcher
        .registry()
        .get("p")
        .unwrap()
        .get("shared")
        .unwrap();

    let records = read_log(&fixture.log_path);
    assert_eq!(records.len(), 400);
    let last: Value = serde_json::from_str(&records.last().unwrap().value).unwrap();
    assert_eq!(last, live);

    // Each writer's own sets appear in the order it issued them
    for t in 0..8 {
        let values: Vec<i64> = records
            .iter()
            .map(|r| serde_json::from_str::<i64>(&r.value).unwrap())
            .filter(|v| v / 1000 == t)
            .collect();
        let expected: Vec<i64> = (0..50).map(|i| t * 1000 + i).collect();
        assert_eq!(values, expected);
    }
}

#[test]
fn test_replayed_log_matches_live_state() {
    let fixture = setup(false);

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let dispatcher = Arc::clone(&fixture.dispatcher);
            thread::spawn(move || {
                for i in 0..25 {
                    dispatcher.handle(&set("shared", json!(format!("{}-{}", t, i))));
                    dispatcher.handle(&set(&format!("own-{}", t), json!(i)));
                    if i % 5 == t {
                        thread::sleep(Duration::from_millis(2));
                    }
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }
    fixture.oplog.sync().unwrap();

    let live = fixture.dispatcher.registry().get("p").unwrap().all();

    let replayed = KeySpaceRegistry::new(&fixture.replay_dir, StoreOptions::default());
    let report = RecoveryEngine::new(&fixture.log_path, 1000)
        .run(&replayed)
        .unwrap();
    assert_eq!(report.replayed, 200);

    assert_eq!(replayed.get_or_open("p").unwrap().all(), live);
}

// =============================================================================
// Logging Filter Tests
// =============================================================================

#[test]
fn test_failed_request_is_not_logged() {
    let fixture = setup(false);

    let response = fixture.dispatcher.handle(&Request::new(
        "../escape",
        Operation::Set {
            key: "k".to_string(),
            value: json!(1),
        },
    ));
    assert!(!response.is_ok());

    assert!(fixture.dispatcher.handle(&set("k", json!(2))).is_ok());
    fixture.oplog.sync().unwrap();

    let records = read_log(&fixture.log_path);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].path, "p");
    assert_eq!(records[0].value, "2");
}

#[test]
fn test_reads_logged_only_when_audited() {
    for audit_reads in [false, true] {
        let fixture = setup(audit_reads);

        fixture.dispatcher.handle(&set("k", json!(1)));
        let response = fixture.dispatcher.handle(&Request::new(
            "p",
            Operation::Get {
                key: "k".to_string(),
            },
        ));
        assert_eq!(response.into_result().unwrap(), json!(1));
        fixture.oplog.sync().unwrap();

        let methods: Vec<Method> = read_log(&fixture.log_path)
            .into_iter()
            .map(|r| r.method)
            .collect();
        if audit_reads {
            assert_eq!(methods, vec![Method::Set, Method::Get]);
        } else {
            assert_eq!(methods, vec![Method::Set]);
        }
    }
}
