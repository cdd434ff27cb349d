//! The `{success, error?, ...fields}` result contract of tracked handlers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::TrackError;

/// Key under which a failure's machine-readable code is stored.
pub const CODE_FIELD: &str = "code";

/// Outcome of one handler invocation.
///
/// Serializes flat: `{"success": true, "rows": 3}` or
/// `{"success": false, "error": "...", "code": "TIMEOUT"}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HandlerResult {
    /// Whether the handler succeeded.
    pub success: bool,
    /// Human-readable reason when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Handler-specific result fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl HandlerResult {
    /// Success with no extra fields.
    pub fn ok() -> Self {
        Self::ok_with(Map::new())
    }

    /// Success carrying result fields.
    pub fn ok_with(fields: Map<String, Value>) -> Self {
        Self {
            success: true,
            error: None,
            fields,
        }
    }

    /// Failure with a reason and no code.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            fields: Map::new(),
        }
    }

    /// Failure derived from a tracker error, tagged with its code.
    pub fn from_error(err: &TrackError) -> Self {
        let mut result = Self::failure(err.to_string());
        let _ = result
            .fields
            .insert(CODE_FIELD.to_owned(), Value::String(err.code().to_owned()));
        result
    }

    /// Normalize whatever a handler returned into the contract.
    ///
    /// An object carrying a boolean `success` is taken as-is. Any other
    /// object becomes the fields of a success. Non-object values are
    /// wrapped under `result`.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) if map.get("success").is_some_and(Value::is_boolean) => {
                serde_json::from_value(Value::Object(map.clone()))
                    .unwrap_or_else(|_| Self::from_object_lossy(map))
            }
            Value::Object(map) => Self::ok_with(map),
            Value::Null => Self::ok(),
            other => {
                let mut fields = Map::new();
                let _ = fields.insert("result".to_owned(), other);
                Self::ok_with(fields)
            }
        }
    }

    // `error` present but not a string: keep it as a field, stringify the reason.
    fn from_object_lossy(mut map: Map<String, Value>) -> Self {
        let success = map
            .remove("success")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let error = map.remove("error").map(|v| match v {
            Value::String(s) => s,
            other => other.to_string(),
        });
        Self {
            success,
            error,
            fields: map,
        }
    }

    /// Whether this is a success.
    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Machine-readable code of a failure, if tagged.
    pub fn code(&self) -> Option<&str> {
        self.fields.get(CODE_FIELD).and_then(Value::as_str)
    }

    /// Look up a result field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}
