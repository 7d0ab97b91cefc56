//! Client Module
//!
//! Blocking client for a VaultKV server.
//!
//! ## Call path
//! ```text
//! Database::set ──▶ validate ──▶ Client::call
//!                                   │ register request id
//!                                   ▼
//!                           ConnectionManager::send ──▶ socket (or queue)
//!                                   │
//!         supervisor thread ◀── MESSAGE ──┘
//!                │ resolve by request id
//!                ▼
//!         PendingReply::wait ──▶ caller
//! ```
//!
//! ## Example
//! ```no_run
//! use vaultkv::{Client, ClientConfig};
//!
//! let client = Client::connect(ClientConfig::default())?;
//! let users = client.database::<String>("users");
//! users.set("alice", &"admin".to_string())?;
//! assert_eq!(users.get("alice")?, Some("admin".to_string()));
//! # Ok::<(), vaultkv::VaultError>(())
//! ```

mod connection;
mod correlator;
mod database;
mod schema;

pub use connection::{ClientEvent, ConnectionManager, ConnectionState, Delivery};
pub use correlator::{PendingReply, RequestCorrelator};
pub use database::Database;
pub use schema::{RequiredFields, Validator};

use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::Receiver;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::config::ClientConfig;
use crate::error::Result;
use crate::protocol::{Frame, Operation, Request};

/// Handle to a server connection
///
/// Cloning is cheap; all clones share one connection. The connection is
/// closed when the last clone is dropped.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    correlator: Arc<RequestCorrelator>,
    manager: ConnectionManager,
}

impl Client {
    /// Connect and authenticate
    pub fn connect(config: ClientConfig) -> Result<Self> {
        let correlator = Arc::new(RequestCorrelator::new());
        let manager = ConnectionManager::connect(config.clone(), Arc::clone(&correlator))?;

        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                correlator,
                manager,
            }),
        })
    }

    /// Typed proxy for the key space at `path`
    pub fn database<T>(&self, path: impl Into<String>) -> Database<T>
    where
        T: Serialize + DeserializeOwned,
    {
        Database::new(self.clone(), path.into())
    }

    /// Round-trip time, or `None` when the server did not answer in time
    pub fn ping(&self) -> Result<Option<Duration>> {
        self.inner.manager.ping()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.manager.state()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.manager.reconnect_attempts()
    }

    pub fn subscribe(&self) -> Receiver<ClientEvent> {
        self.inner.manager.subscribe()
    }

    /// Requests still waiting for a response
    pub fn in_flight(&self) -> usize {
        self.inner.correlator.len()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Close the connection for every clone of this client
    pub fn close(&self) {
        self.inner.manager.close();
    }

    /// Send one request and wait for its response
    ///
    /// A request queued during an outage gets the longer disconnected
    /// timeout.
    pub(crate) fn call(&self, path: &str, operation: Operation) -> Result<Value> {
        let request = Request::new(path, operation);
        let frame = Frame::message(request.to_bytes()?);

        let pending = self.inner.correlator.register(&request.request_id);
        let timeout = match self.inner.manager.send(&request.request_id, frame)? {
            Delivery::Sent => self.inner.config.request_timeout,
            Delivery::Queued => {
                tracing::debug!("Request {} queued until reconnect", request.request_id);
                self.inner.config.disconnected_timeout
            }
        };

        pending.wait(timeout)
    }
}
