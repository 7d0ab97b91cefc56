//! Value validation
//!
//! A `Database` can carry a validator that every value passes through
//! before a `set` or `set_many` leaves the process.

use serde_json::Value;

/// Predicate applied to a value before it is written
pub trait Validator: Send + Sync {
    /// `Err` carries a human-readable reason
    fn validate(&self, value: &Value) -> Result<(), String>;
}

impl<F> Validator for F
where
    F: Fn(&Value) -> Result<(), String> + Send + Sync,
{
    fn validate(&self, value: &Value) -> Result<(), String> {
        self(value)
    }
}

/// Requires the value to be an object holding every listed field
#[derive(Debug, Clone)]
pub struct RequiredFields {
    fields: Vec<String>,
}

impl RequiredFields {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }
}

impl Validator for RequiredFields {
    fn validate(&self, value: &Value) -> Result<(), String> {
        let object = value
            .as_object()
            .ok_or_else(|| "expected an object".to_string())?;

        let missing: Vec<&str> = self
            .fields
            .iter()
            .filter(|field| !object.contains_key(field.as_str()))
            .map(String::as_str)
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(format!("missing field(s): {}", missing.join(", ")))
        }
    }
}
