//! Tests for the Key Space Registry
//!
//! These tests verify:
//! - Path normalization and rejection of escaping paths
//! - Lazy, shared opening of key spaces
//! - Flushing and closing every key space

use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;
use vaultkv::storage::{normalize_path, KeySpaceRegistry};
use vaultkv::{StoreOptions, VaultError};

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_registry() -> (TempDir, KeySpaceRegistry) {
    let temp = TempDir::new().unwrap();
    let registry = KeySpaceRegistry::new(temp.path(), StoreOptions::default());
    (temp, registry)
}

// =============================================================================
// Path Normalization Tests
// =============================================================================

#[test]
fn test_normalize_simple_paths() {
    assert_eq!(normalize_path("users").unwrap(), "users");
    assert_eq!(normalize_path("tenants/acme").unwrap(), "tenants/acme");
    assert_eq!(normalize_path("./a/./b/").unwrap(), "a/b");
}

#[test]
fn test_normalize_rejects_escaping_paths() {
    for bad in ["", ".", "/etc", "../outside", "a/../../b", "a/.."] {
        assert!(
            matches!(normalize_path(bad), Err(VaultError::InvalidPath(_))),
            "{:?} should be rejected",
            bad
        );
    }
}

// =============================================================================
// Lookup Tests
// =============================================================================

#[test]
fn test_get_or_open_is_shared() {
    let (temp, registry) = setup_registry();

    let first = registry.get_or_open("users").unwrap();
    let second = registry.get_or_open("./users").unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(registry.len(), 1);
    assert!(temp.path().join("users").is_dir());
}

#[test]
fn test_get_does_not_open() {
    let (_temp, registry) = setup_registry();

    assert!(registry.get("users").is_none());
    assert!(registry.is_empty());

    registry.get_or_open("users").unwrap();
    assert!(registry.get("users").is_some());
}

#[test]
fn test_key_spaces_are_isolated() {
    let (_temp, registry) = setup_registry();
    let users = registry.get_or_open("users").unwrap();
    let orders = registry.get_or_open("orders").unwrap();

    users.set("id", json!("u1")).unwrap();
    orders.set("id", json!("o1")).unwrap();

    assert_eq!(users.get("id"), Some(json!("u1")));
    assert_eq!(orders.get("id"), Some(json!("o1")));
    assert_eq!(registry.paths(), vec!["orders", "users"]);
}

#[test]
fn test_invalid_path_is_not_opened() {
    let (_temp, registry) = setup_registry();

    assert!(registry.get_or_open("../escape").is_err());
    assert!(registry.is_empty());
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_flush_all_writes_every_space() {
    let (temp, registry) = setup_registry();
    registry.get_or_open("a").unwrap().set("k", json!(1)).unwrap();
    registry.get_or_open("b/c").unwrap().set("k", json!(2)).unwrap();

    registry.flush_all().unwrap();

    assert!(temp.path().join("a/data_1.json").exists());
    assert!(temp.path().join("b/c/data_1.json").exists());
}

#[test]
fn test_close_all_then_reopen() {
    let temp = TempDir::new().unwrap();

    {
        let registry = KeySpaceRegistry::new(temp.path(), StoreOptions::default());
        let space = registry.get_or_open("users").unwrap();
        space.set("alice", json!({"role": "admin"})).unwrap();
        registry.close_all().unwrap();
        assert!(space.set("bob", json!({})).is_err());
    }

    let registry = KeySpaceRegistry::new(temp.path(), StoreOptions::default());
    let space = registry.get_or_open("users").unwrap();
    assert_eq!(space.get("alice"), Some(json!({"role": "admin"})));
}
