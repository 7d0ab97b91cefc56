//! Tests for operation log records
//!
//! These tests verify:
//! - The comma-tab line format
//! - Expansion of records into single-key mutations
//! - Escaping of separators inside paths and keys
//! - Rejection of malformed lines

use serde_json::json;
use vaultkv::oplog::{Mutation, OpLogRecord};
use vaultkv::protocol::{Entry, Method, Operation, Request};

// =============================================================================
// Helper Functions
// =============================================================================

fn request(path: &str, operation: Operation) -> Request {
    Request {
        request_id: "req-1".to_string(),
        path: path.to_string(),
        operation,
    }
}

fn record(path: &str, operation: Operation) -> OpLogRecord {
    OpLogRecord::from_request(&request(path, operation), 1_700_000_000_000).unwrap()
}

// =============================================================================
// Line Format Tests
// =============================================================================

#[test]
fn test_set_line_format() {
    let record = record(
        "users",
        Operation::Set {
            key: "alice".to_string(),
            value: json!({"age": 30}),
        },
    );

    assert_eq!(
        record.to_line(),
        "1700000000000,\treq-1,\tusers,\tSET,\talice,\t{\"age\":30}\n"
    );
}

#[test]
fn test_delete_line_has_empty_value() {
    let record = record(
        "users",
        Operation::Delete {
            key: "bob".to_string(),
        },
    );

    assert_eq!(record.to_line(), "1700000000000,\treq-1,\tusers,\tDELETE,\tbob,\t\n");
}

#[test]
fn test_parse_inverts_to_line() {
    let original = record(
        "tenants/acme",
        Operation::SetMany {
            data: vec![Entry::new("a", json!(1)), Entry::new("b", json!("x,\ty"))],
        },
    );

    let parsed = OpLogRecord::parse(&original.to_line()).unwrap();

    assert_eq!(parsed, original);
    assert_eq!(parsed.method, Method::SetMany);
    assert!(parsed.key.is_empty());
}

#[test]
fn test_separators_in_key_are_escaped() {
    let original = record(
        "odd\tpath",
        Operation::Set {
            key: "line\nbreak,\tkey\\".to_string(),
            value: json!(null),
        },
    );
    let line = original.to_line();

    assert_eq!(line.matches('\n').count(), 1);
    assert_eq!(OpLogRecord::parse(&line).unwrap(), original);
}

// =============================================================================
// Mutation Expansion Tests
// =============================================================================

#[test]
fn test_mutations_for_each_method() {
    let set = record(
        "p",
        Operation::Set {
            key: "k".to_string(),
            value: json!([1, 2]),
        },
    );
    assert_eq!(
        set.mutations().unwrap(),
        vec![Mutation::Set {
            key: "k".to_string(),
            value: json!([1, 2])
        }]
    );

    let delete_many = record(
        "p",
        Operation::DeleteMany {
            keys: vec!["a".to_string(), "b".to_string()],
        },
    );
    assert_eq!(
        delete_many.mutations().unwrap(),
        vec![
            Mutation::Delete { key: "a".to_string() },
            Mutation::Delete { key: "b".to_string() },
        ]
    );

    let set_many = record(
        "p",
        Operation::SetMany {
            data: vec![Entry::new("x", json!(1)), Entry::new("y", json!(2))],
        },
    );
    assert_eq!(
        set_many.mutations().unwrap(),
        vec![
            Mutation::Set {
                key: "x".to_string(),
                value: json!(1)
            },
            Mutation::Set {
                key: "y".to_string(),
                value: json!(2)
            },
        ]
    );
}

#[test]
fn test_reads_have_no_mutations() {
    let get = record("p", Operation::Get { key: "k".to_string() });
    let all = record("p", Operation::All);

    assert!(get.mutations().unwrap().is_empty());
    assert!(all.mutations().unwrap().is_empty());
}

#[test]
fn test_empty_set_value_is_null() {
    let parsed = OpLogRecord::parse("1,\tr,\tp,\tSET,\tk,\t").unwrap();

    assert_eq!(
        parsed.mutations().unwrap(),
        vec![Mutation::Set {
            key: "k".to_string(),
            value: json!(null)
        }]
    );
}

// =============================================================================
// Malformed Line Tests
// =============================================================================

#[test]
fn test_malformed_lines_are_rejected() {
    let bad = [
        "not a record",
        "1,\tr,\tp,\tSET,\tk",
        "soon,\tr,\tp,\tSET,\tk,\t1",
        "1,\tr,\tp,\tUPSERT,\tk,\t1",
        "1,\tr,\t,\tSET,\tk,\t1",
        "1,\tr,\tp,\tSET,\tk\\q,\t1",
    ];

    for line in bad {
        assert!(OpLogRecord::parse(line).is_err(), "{:?} should not parse", line);
    }
}

#[test]
fn test_bad_json_value_fails_expansion() {
    let parsed = OpLogRecord::parse("1,\tr,\tp,\tSET,\tk,\t{oops").unwrap();

    assert!(parsed.mutations().is_err());
}
