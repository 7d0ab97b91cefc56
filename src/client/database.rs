//! Database Proxy
//!
//! Typed view of one key space on the server. Values are converted to and
//! from JSON at this boundary; everything below it speaks `serde_json::Value`.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{Result, VaultError};
use crate::protocol::{Entry, Operation};

use super::schema::Validator;
use super::Client;

/// A key space seen through the client
///
/// Cheap to clone; clones share the connection.
pub struct Database<T = Value> {
    client: Client,
    path: String,
    validator: Option<Arc<dyn Validator>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Database<T> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            path: self.path.clone(),
            validator: self.validator.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Database<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .field("validated", &self.validator.is_some())
            .finish()
    }
}

impl<T> Database<T>
where
    T: Serialize + DeserializeOwned,
{
    pub(crate) fn new(client: Client, path: String) -> Self {
        Self {
            client,
            path,
            validator: None,
            _marker: PhantomData,
        }
    }

    /// Check every value written through this proxy
    pub fn with_validator(mut self, validator: impl Validator + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    // =========================================================================
    // Single-key Operations
    // =========================================================================

    /// `None` when the key is absent
    pub fn get(&self, key: &str) -> Result<Option<T>> {
        let data = self.call(Operation::Get {
            key: key.to_string(),
        })?;
        Ok(serde_json::from_value(data)?)
    }

    /// Whether the key holds a truthy value
    ///
    /// Absent keys, `null`, `false`, `0` and `""` all count as missing.
    pub fn has(&self, key: &str) -> Result<bool> {
        let data = self.call(Operation::Get {
            key: key.to_string(),
        })?;
        Ok(is_truthy(&data))
    }

    /// Store a value, returning what the server stored
    ///
    /// Fails with `Validation` before anything is sent if the value is
    /// rejected.
    pub fn set(&self, key: &str, value: &T) -> Result<T> {
        let value = serde_json::to_value(value)?;
        self.validate(&value)?;

        let stored = self.call(Operation::Set {
            key: key.to_string(),
            value,
        })?;
        Ok(serde_json::from_value(stored)?)
    }

    /// Deleting an absent key succeeds
    pub fn delete(&self, key: &str) -> Result<()> {
        self.call(Operation::Delete {
            key: key.to_string(),
        })?;
        Ok(())
    }

    /// Every key and value in the key space
    pub fn all(&self) -> Result<HashMap<String, T>> {
        match self.call(Operation::All)? {
            Value::Null => Ok(HashMap::new()),
            data => Ok(serde_json::from_value(data)?),
        }
    }

    // =========================================================================
    // Batch Operations
    // =========================================================================

    /// Results are in key order
    pub fn get_many<S: AsRef<str>>(&self, keys: &[S]) -> Result<Vec<Option<T>>> {
        let data = self.call(Operation::GetMany {
            keys: keys.iter().map(|k| k.as_ref().to_string()).collect(),
        })?;
        Ok(serde_json::from_value(data)?)
    }

    /// All values are validated before any is sent
    pub fn set_many<K: Into<String>>(&self, entries: Vec<(K, T)>) -> Result<Vec<T>> {
        let mut data = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let value = serde_json::to_value(&value)?;
            self.validate(&value)?;
            data.push(Entry::new(key, value));
        }

        let stored = self.call(Operation::SetMany { data })?;
        Ok(serde_json::from_value(stored)?)
    }

    /// One flag per key: whether it existed
    pub fn delete_many<S: AsRef<str>>(&self, keys: &[S]) -> Result<Vec<bool>> {
        let data = self.call(Operation::DeleteMany {
            keys: keys.iter().map(|k| k.as_ref().to_string()).collect(),
        })?;
        Ok(serde_json::from_value(data)?)
    }

    fn validate(&self, value: &Value) -> Result<()> {
        match &self.validator {
            Some(validator) => validator.validate(value).map_err(VaultError::Validation),
            None => Ok(()),
        }
    }

    fn call(&self, operation: Operation) -> Result<Value> {
        self.client.call(&self.path, operation)
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
