//! Tests for the Request Correlator
//!
//! These tests verify:
//! - Responses reach their callers in any arrival order
//! - Unknown and late responses are dropped
//! - Timeouts remove the pending record
//! - Bulk failure on disconnect

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::json;
use vaultkv::client::RequestCorrelator;
use vaultkv::VaultError;

const WAIT: Duration = Duration::from_secs(2);

// =============================================================================
// Resolution Tests
// =============================================================================

#[test]
fn test_resolve_delivers_reply() {
    let correlator = RequestCorrelator::new();
    let pending = correlator.register("a");

    assert!(correlator.is_pending("a"));
    assert!(correlator.resolve("a", Ok(json!(42))));

    assert_eq!(pending.wait(WAIT).unwrap(), json!(42));
    assert!(correlator.is_empty());
}

#[test]
fn test_out_of_order_responses() {
    let correlator = Arc::new(RequestCorrelator::new());
    let ids: Vec<String> = (0..10).map(|i| format!("req-{}", i)).collect();
    let waiters: Vec<_> = ids.iter().map(|id| correlator.register(id)).collect();

    let resolver = {
        let correlator = Arc::clone(&correlator);
        let ids = ids.clone();
        thread::spawn(move || {
            for (i, id) in ids.iter().enumerate().rev() {
                correlator.resolve(id, Ok(json!(i)));
            }
        })
    };

    for (i, waiter) in waiters.into_iter().enumerate() {
        assert_eq!(waiter.request_id(), ids[i]);
        assert_eq!(waiter.wait(WAIT).unwrap(), json!(i));
    }
    resolver.join().unwrap();
    assert!(correlator.is_empty());
}

#[test]
fn test_unknown_response_is_dropped() {
    let correlator = RequestCorrelator::new();
    let pending = correlator.register("known");

    assert!(!correlator.resolve("stranger", Ok(json!(1))));
    assert!(correlator.is_pending("known"));

    correlator.resolve("known", Ok(json!(2)));
    assert_eq!(pending.wait(WAIT).unwrap(), json!(2));
}

#[test]
fn test_duplicate_response_is_dropped() {
    let correlator = RequestCorrelator::new();
    let pending = correlator.register("a");

    assert!(correlator.resolve("a", Ok(json!("first"))));
    assert!(!correlator.resolve("a", Ok(json!("second"))));
    assert_eq!(pending.wait(WAIT).unwrap(), json!("first"));
}

#[test]
fn test_error_reply() {
    let correlator = RequestCorrelator::new();
    let pending = correlator.register("a");

    correlator.resolve("a", Err(VaultError::Remote("boom".to_string())));

    assert!(matches!(pending.wait(WAIT), Err(VaultError::Remote(_))));
}

// =============================================================================
// Timeout Tests
// =============================================================================

#[test]
fn test_timeout_removes_record() {
    let correlator = RequestCorrelator::new();
    let pending = correlator.register("slow");

    let result = pending.wait(Duration::from_millis(30));

    match result {
        Err(VaultError::RequestTimeout { request_id }) => assert_eq!(request_id, "slow"),
        other => panic!("expected timeout, got {:?}", other),
    }
    assert!(!correlator.is_pending("slow"));

    // A late response finds nothing
    assert!(!correlator.resolve("slow", Ok(json!(1))));
}

#[test]
fn test_dropping_waiter_removes_record() {
    let correlator = RequestCorrelator::new();
    {
        let _pending = correlator.register("gone");
        assert_eq!(correlator.len(), 1);
    }

    assert!(correlator.is_empty());
}

#[test]
fn test_dropping_replaced_waiter_keeps_new_record() {
    let correlator = RequestCorrelator::new();
    let old = correlator.register("same");
    let new = correlator.register("same");

    drop(old);
    assert!(correlator.is_pending("same"));

    correlator.resolve("same", Ok(json!("new")));
    assert_eq!(new.wait(WAIT).unwrap(), json!("new"));
}

// =============================================================================
// Bulk Failure Tests
// =============================================================================

#[test]
fn test_fail_all() {
    let correlator = RequestCorrelator::new();
    let a = correlator.register("a");
    let b = correlator.register("b");

    assert_eq!(correlator.fail_all(|| VaultError::NotConnected), 2);

    assert!(matches!(a.wait(WAIT), Err(VaultError::NotConnected)));
    assert!(matches!(b.wait(WAIT), Err(VaultError::NotConnected)));
    assert!(correlator.is_empty());
}

#[test]
fn test_fail_single() {
    let correlator = RequestCorrelator::new();
    let a = correlator.register("a");
    let _b = correlator.register("b");

    assert!(correlator.fail("a", VaultError::ConnectionTimeout));

    assert!(matches!(a.wait(WAIT), Err(VaultError::ConnectionTimeout)));
    assert!(correlator.is_pending("b"));
}
