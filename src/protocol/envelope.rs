//! Request and response envelopes
//!
//! Envelopes travel as JSON inside `MESSAGE` frames:
//!
//! ```text
//! request:  {"requestId": "...", "path": "users", "method": "SET", "key": "a", "value": 1}
//! response: {"requestId": "...", "data": 1}
//! ```
//!
//! The method field tags a closed sum type, so every dispatch `match` is
//! exhaustive.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Result, VaultError};

/// Request methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Method {
    Get,
    Set,
    Delete,
    All,
    GetMany,
    SetMany,
    DeleteMany,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Set => "SET",
            Method::Delete => "DELETE",
            Method::All => "ALL",
            Method::GetMany => "GET_MANY",
            Method::SetMany => "SET_MANY",
            Method::DeleteMany => "DELETE_MANY",
        }
    }

    /// Whether requests with this method change stored state
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Method::Set | Method::Delete | Method::SetMany | Method::DeleteMany
        )
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "GET" => Ok(Method::Get),
            "SET" => Ok(Method::Set),
            "DELETE" => Ok(Method::Delete),
            "ALL" => Ok(Method::All),
            "GET_MANY" => Ok(Method::GetMany),
            "SET_MANY" => Ok(Method::SetMany),
            "DELETE_MANY" => Ok(Method::DeleteMany),
            other => Err(VaultError::Protocol(format!("Unknown method: {}", other))),
        }
    }
}

/// One key/value pair of a SET_MANY request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub key: String,
    #[serde(default)]
    pub value: Value,
}

impl Entry {
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// Method-specific part of a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    Get {
        key: String,
    },
    Set {
        key: String,
        #[serde(default)]
        value: Value,
    },
    Delete {
        key: String,
    },
    All,
    GetMany {
        keys: Vec<String>,
    },
    SetMany {
        data: Vec<Entry>,
    },
    DeleteMany {
        keys: Vec<String>,
    },
}

impl Operation {
    pub fn method(&self) -> Method {
        match self {
            Operation::Get { .. } => Method::Get,
            Operation::Set { .. } => Method::Set,
            Operation::Delete { .. } => Method::Delete,
            Operation::All => Method::All,
            Operation::GetMany { .. } => Method::GetMany,
            Operation::SetMany { .. } => Method::SetMany,
            Operation::DeleteMany { .. } => Method::DeleteMany,
        }
    }
}

/// A request envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub request_id: String,
    pub path: String,
    #[serde(flatten)]
    pub operation: Operation,
}

impl Request {
    /// Build a request with a fresh UUID v4 request id
    pub fn new(path: impl Into<String>, operation: Operation) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            path: path.into(),
            operation,
        }
    }

    pub fn method(&self) -> Method {
        self.operation.method()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a request; any malformed envelope is a protocol error
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| VaultError::Protocol(format!("Malformed request envelope: {}", e)))
    }
}

/// A response envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub request_id: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    /// Successful response carrying `data`
    pub fn ok(request_id: impl Into<String>, data: Value) -> Self {
        Self {
            request_id: request_id.into(),
            data,
            error: None,
        }
    }

    /// Request-level failure (the connection stays open)
    pub fn failure(request_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            data: Value::Null,
            error: Some(error.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// The payload, or the server's error as `VaultError::Remote`
    pub fn into_result(self) -> Result<Value> {
        match self.error {
            Some(error) => Err(VaultError::Remote(error)),
            None => Ok(self.data),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| VaultError::Protocol(format!("Malformed response envelope: {}", e)))
    }
}
