//! Request Correlator
//!
//! Matches responses to the calls that produced them by request id.
//!
//! ## Lifecycle of a pending record
//! ```text
//! register(id) ──▶ pending ──┬── resolve(id) ──▶ caller gets the reply
//!                            ├── wait() times out ──▶ RequestTimeout
//!                            └── fail(id) / fail_all ──▶ caller gets the error
//! ```
//!
//! Whoever removes the record from the table first wins; the loser finds
//! nothing and does nothing. A response for an id with no record (late,
//! duplicate, or unknown) is dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::{Result, VaultError};

type Reply = Result<Value>;
type PendingTable = Arc<Mutex<HashMap<String, Sender<Reply>>>>;

/// Table of in-flight requests
#[derive(Debug, Default)]
pub struct RequestCorrelator {
    pending: PendingTable,
}

impl RequestCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending record for `request_id`
    ///
    /// Registering an id that is already pending replaces the old record;
    /// its waiter then times out.
    pub fn register(&self, request_id: &str) -> PendingReply {
        let (tx, rx) = channel::bounded(1);
        if self
            .pending
            .lock()
            .insert(request_id.to_string(), tx.clone())
            .is_some()
        {
            tracing::warn!("Request id {} registered twice", request_id);
        }

        PendingReply {
            request_id: request_id.to_string(),
            tx,
            rx,
            table: Arc::clone(&self.pending),
        }
    }

    /// Deliver a reply; `false` when no record exists for the id
    pub fn resolve(&self, request_id: &str, reply: Reply) -> bool {
        let slot = self.pending.lock().remove(request_id);
        match slot {
            Some(tx) => {
                let _ = tx.send(reply);
                true
            }
            None => {
                tracing::trace!("Dropping response for unknown request {}", request_id);
                false
            }
        }
    }

    /// Fail one pending request
    pub fn fail(&self, request_id: &str, error: VaultError) -> bool {
        self.resolve(request_id, Err(error))
    }

    /// Fail every pending request, returning how many were failed
    pub fn fail_all(&self, error: impl Fn() -> VaultError) -> usize {
        let drained: Vec<Sender<Reply>> = self.pending.lock().drain().map(|(_, tx)| tx).collect();
        for tx in &drained {
            let _ = tx.send(Err(error()));
        }
        drained.len()
    }

    pub fn is_pending(&self, request_id: &str) -> bool {
        self.pending.lock().contains_key(request_id)
    }

    /// Number of in-flight requests
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The caller's side of a pending record
///
/// Dropping it without waiting removes the record.
#[derive(Debug)]
pub struct PendingReply {
    request_id: String,
    tx: Sender<Reply>,
    rx: Receiver<Reply>,
    table: PendingTable,
}

impl PendingReply {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Block until the reply arrives or `timeout` elapses
    pub fn wait(self, timeout: Duration) -> Result<Value> {
        match self.rx.recv_timeout(timeout) {
            Ok(reply) => reply,
            Err(RecvTimeoutError::Timeout) => {
                let removed = self.table.lock().remove(&self.request_id).is_some();
                if removed {
                    return Err(self.timeout_error());
                }
                // Resolved between the timeout and taking the lock
                self.rx.try_recv().unwrap_or_else(|_| Err(self.timeout_error()))
            }
            Err(RecvTimeoutError::Disconnected) => Err(self.timeout_error()),
        }
    }

    fn timeout_error(&self) -> VaultError {
        VaultError::RequestTimeout {
            request_id: self.request_id.clone(),
        }
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        let mut table = self.table.lock();
        // Only remove our own record; a re-registration may have replaced it
        if table
            .get(&self.request_id)
            .is_some_and(|tx| tx.same_channel(&self.tx))
        {
            table.remove(&self.request_id);
        }
    }
}
