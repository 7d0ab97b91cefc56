//! Operation log records
//!
//! One line per logged request:
//!
//! ```text
//! timestamp,\trequestId,\tpath,\tmethod,\tkey,\tserializedValue\n
//! ```
//!
//! | method      | key        | serializedValue              |
//! |-------------|------------|------------------------------|
//! | SET         | key        | JSON value                   |
//! | DELETE      | key        | (empty)                      |
//! | SET_MANY    | (empty)    | JSON `[{"key","value"}, ...]`|
//! | DELETE_MANY | (empty)    | JSON `["k1", ...]`           |
//! | GET         | key        | (empty)                      |
//! | GET_MANY    | (empty)    | JSON `["k1", ...]`           |
//! | ALL         | (empty)    | (empty)                      |
//!
//! `path` and `key` escape `\`, tab, CR and LF so a record never spans
//! lines. Compact JSON never contains a raw tab or newline.

use serde_json::Value;

use crate::error::{Result, VaultError};
use crate::protocol::{Entry, Method, Operation, Request};

/// Field separator
pub const SEPARATOR: &str = ",\t";

/// A single operation log record
#[derive(Debug, Clone, PartialEq)]
pub struct OpLogRecord {
    /// Unix milliseconds when the request was served
    pub timestamp: i64,
    pub request_id: String,
    pub path: String,
    pub method: Method,
    pub key: String,
    pub value: String,
}

/// A single-key mutation recovered from a record
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Set { key: String, value: Value },
    Delete { key: String },
}

impl OpLogRecord {
    /// Build the record for a served request
    pub fn from_request(request: &Request, timestamp: i64) -> Result<Self> {
        let (key, value) = match &request.operation {
            Operation::Get { key } | Operation::Delete { key } => (key.clone(), String::new()),
            Operation::Set { key, value } => (key.clone(), serde_json::to_string(value)?),
            Operation::All => (String::new(), String::new()),
            Operation::GetMany { keys } | Operation::DeleteMany { keys } => {
                (String::new(), serde_json::to_string(keys)?)
            }
            Operation::SetMany { data } => (String::new(), serde_json::to_string(data)?),
        };

        Ok(Self {
            timestamp,
            request_id: request.request_id.clone(),
            path: request.path.clone(),
            method: request.method(),
            key,
            value,
        })
    }

    /// Render as one newline-terminated log line
    pub fn to_line(&self) -> String {
        format!(
            "{}{sep}{}{sep}{}{sep}{}{sep}{}{sep}{}\n",
            self.timestamp,
            escape_field(&self.request_id),
            escape_field(&self.path),
            self.method,
            escape_field(&self.key),
            self.value,
            sep = SEPARATOR
        )
    }

    /// Parse one log line (with or without its trailing newline)
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim_end_matches(['\n', '\r']);
        let fields: Vec<&str> = line.splitn(6, SEPARATOR).collect();
        if fields.len() != 6 {
            return Err(VaultError::Protocol(format!(
                "Expected 6 fields, found {}",
                fields.len()
            )));
        }

        let timestamp = fields[0]
            .parse()
            .map_err(|_| VaultError::Protocol(format!("Bad timestamp: {:?}", fields[0])))?;
        let path = unescape_field(fields[2])?;
        if path.is_empty() {
            return Err(VaultError::Protocol("Empty path".to_string()));
        }

        Ok(Self {
            timestamp,
            request_id: unescape_field(fields[1])?,
            path,
            method: fields[3].parse()?,
            key: unescape_field(fields[4])?,
            value: fields[5].to_string(),
        })
    }

    /// The single-key mutations this record stands for, in order
    ///
    /// Non-mutating records yield nothing.
    pub fn mutations(&self) -> Result<Vec<Mutation>> {
        match self.method {
            Method::Set => Ok(vec![Mutation::Set {
                key: self.key.clone(),
                value: self.parse_value()?,
            }]),
            Method::Delete => Ok(vec![Mutation::Delete {
                key: self.key.clone(),
            }]),
            Method::SetMany => {
                let entries: Vec<Entry> = serde_json::from_str(&self.value)?;
                Ok(entries
                    .into_iter()
                    .map(|e| Mutation::Set {
                        key: e.key,
                        value: e.value,
                    })
                    .collect())
            }
            Method::DeleteMany => {
                let keys: Vec<String> = serde_json::from_str(&self.value)?;
                Ok(keys
                    .into_iter()
                    .map(|key| Mutation::Delete { key })
                    .collect())
            }
            Method::Get | Method::All | Method::GetMany => Ok(Vec::new()),
        }
    }

    /// An empty value field stands for `null`
    fn parse_value(&self) -> Result<Value> {
        if self.value.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&self.value)?)
    }
}

// =============================================================================
// Field Escaping
// =============================================================================

fn escape_field(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    for c in field.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}

fn unescape_field(field: &str) -> Result<String> {
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            other => {
                return Err(VaultError::Protocol(format!(
                    "Bad escape sequence: \\{}",
                    other.map(String::from).unwrap_or_default()
                )))
            }
        }
    }
    Ok(out)
}
