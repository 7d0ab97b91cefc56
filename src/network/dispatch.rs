//! Request dispatch
//!
//! Routes a decoded request to its key space and records served mutations
//! in the operation log, in the order they were applied.

use std::sync::Arc;

use serde_json::Value;

use crate::error::Result;
use crate::oplog::{OpLogRecord, OpLogWriter};
use crate::protocol::{Operation, Request, Response};
use crate::storage::{KeySpace, KeySpaceRegistry};

/// Shared by every session of a server
pub struct Dispatcher {
    registry: Arc<KeySpaceRegistry>,
    oplog: Arc<OpLogWriter>,
    audit_reads: bool,
}

impl Dispatcher {
    pub fn new(registry: Arc<KeySpaceRegistry>, oplog: Arc<OpLogWriter>, audit_reads: bool) -> Self {
        Self {
            registry,
            oplog,
            audit_reads,
        }
    }

    /// Serve a request against its key space and record it
    ///
    /// Failures (bad path, unwritable key space) become error responses; the
    /// connection stays open and nothing is logged.
    ///
    /// A mutation is applied and queued for the operation log under the key
    /// space's write order, so log order matches apply order across
    /// connections. The append itself runs on the log's own thread.
    pub fn handle(&self, request: &Request) -> Response {
        let result = self
            .registry
            .get_or_open(&request.path)
            .and_then(|space| self.execute_and_record(&space, request));

        match result {
            Ok(data) => Response::ok(&request.request_id, data),
            Err(e) => {
                tracing::warn!(
                    "{} {} on {:?} failed: {}",
                    request.method(),
                    request.request_id,
                    request.path,
                    e
                );
                Response::failure(&request.request_id, e.to_string())
            }
        }
    }

    fn execute_and_record(&self, space: &KeySpace, request: &Request) -> Result<Value> {
        if !request.method().is_mutating() {
            let data = Self::execute(space, &request.operation)?;
            if self.audit_reads {
                self.record(request);
            }
            return Ok(data);
        }

        let _order = space.order_writes();
        let data = Self::execute(space, &request.operation)?;
        self.record(request);
        Ok(data)
    }

    /// Queue a served request for the operation log
    fn record(&self, request: &Request) {
        let timestamp = chrono::Utc::now().timestamp_millis();
        match OpLogRecord::from_request(request, timestamp) {
            Ok(record) => self.oplog.append(&record),
            Err(e) => tracing::error!("Could not encode log record for {}: {}", request.request_id, e),
        }
    }

    pub fn registry(&self) -> &Arc<KeySpaceRegistry> {
        &self.registry
    }

    fn execute(space: &KeySpace, operation: &Operation) -> Result<Value> {
        match operation {
            Operation::Get { key } => Ok(space.get(key).unwrap_or(Value::Null)),
            Operation::Set { key, value } => space.set(key, value.clone()),
            Operation::Delete { key } => {
                space.delete(key)?;
                Ok(Value::Null)
            }
            Operation::All => Ok(Value::Object(space.all())),
            Operation::GetMany { keys } => Ok(Value::Array(
                space
                    .get_many(keys)
                    .into_iter()
                    .map(|v| v.unwrap_or(Value::Null))
                    .collect(),
            )),
            Operation::SetMany { data } => {
                let entries = data.iter().map(|e| (e.key.clone(), e.value.clone())).collect();
                Ok(Value::Array(space.set_many(entries)?))
            }
            Operation::DeleteMany { keys } => Ok(Value::Array(
                space
                    .delete_many(keys)?
                    .into_iter()
                    .map(Value::Bool)
                    .collect(),
            )),
        }
    }
}
