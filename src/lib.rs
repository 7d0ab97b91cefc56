//! # VaultKV
//!
//! A network-attached, sharded key-value store with:
//! - Named key spaces, each persisted as a directory of bounded JSON shards
//! - Debounced write-back from an in-memory shard cache
//! - An append-only operation log replayed on startup
//! - An authenticated session protocol with request correlation
//! - A client that reconnects and replays requests queued during an outage
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Client (Database proxies)                    │
//! │        correlator ── connection manager ── reconnect         │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │  HELLO / MESSAGE / PING / CLOSE frames
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                TCP Server (one session per client)           │
//! │                auth ──▶ dispatch ──▶ response                │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌───────────────┐
//!   │   Op Log    │          │   Key Space   │
//!   │  (Append)   │          │  Registry     │
//!   └──────┬──────┘          └──────┬────────┘
//!          │ replay on start        │
//!          └──────────▶─────────────┤
//!                                   ▼
//!                           ┌───────────────┐
//!                           │ Shard cache   │
//!                           │ + debounced   │
//!                           │   flush       │
//!                           └───────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod storage;
pub mod oplog;
pub mod protocol;
pub mod network;
pub mod client;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{Result, VaultError};
pub use config::{ClientConfig, Config, StoreOptions};
pub use storage::{KeySpace, KeySpaceRegistry};
pub use network::Server;
pub use client::{Client, ClientEvent, Database};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of VaultKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
