//! Query result types for the forwarder.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// One result row: column name to JSON value, in column order.
pub type JsonRow = Map<String, Value>;

/// Outcome of running a tenant's source query.
///
/// Exactly one of result or error exists for every run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryOutcome {
    /// Serialized JSON array of row objects.
    Success(String),
    /// Human-readable failure description.
    Failed(String),
}

impl QueryOutcome {
    /// Returns true if the query ran and produced a serialized result.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Returns the serialized result, if the query succeeded.
    pub fn result(&self) -> Option<&str> {
        match self {
            Self::Success(json) => Some(json),
            Self::Failed(_) => None,
        }
    }

    /// Returns the error text, if the query failed.
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Success(_) => None,
            Self::Failed(error) => Some(error),
        }
    }
}

/// Converts a float to JSON, stringifying values JSON cannot represent.
pub(crate) fn float_value(v: f64) -> Value {
    Number::from_f64(v)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(v.to_string()))
}

/// Binary columns travel as standard base64.
pub(crate) fn bytes_value(bytes: &[u8]) -> Value {
    Value::String(BASE64.encode(bytes))
}
