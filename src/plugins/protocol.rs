//! Plugin unit protocol definitions
//!
//! Defines the JSON documents exchanged with a plugin unit process: the
//! manifest it prints for `describe`, and the request/response lines of a
//! `call`.

use super::registry::Arguments;
use super::schema::Signature;
use crate::error::ToolError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Self-description of a plugin unit
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnitManifest {
    /// Callables visible in the unit, including imported ones
    #[serde(default)]
    pub functions: Vec<Signature>,
}

/// Request written to a unit's stdin
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitRequest {
    /// Request ID for correlation
    pub id: String,
    /// Tool name to invoke
    pub tool: String,
    /// Arguments passed to the tool
    pub arguments: Arguments,
}

/// Response read from a unit's stdout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitResponse {
    /// Request ID this responds to; units may omit it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Whether the callable returned normally
    pub success: bool,
    /// Return value (if success)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error raised by the callable (if failure)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UnitRequest {
    /// Create a new request
    pub fn new(tool: &str, arguments: Arguments) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tool: tool.to_string(),
            arguments,
        }
    }
}

impl UnitResponse {
    /// Create a success response
    #[cfg(test)]
    pub fn success(id: &str, result: Value) -> Self {
        Self {
            id: Some(id.to_string()),
            success: true,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    #[cfg(test)]
    pub fn error(id: &str, message: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            success: false,
            result: None,
            error: Some(message.to_string()),
        }
    }

    /// Whether this response answers `request_id`
    pub fn answers(&self, request_id: &str) -> bool {
        self.id.as_deref().map_or(true, |id| id == request_id)
    }

    /// Convert into the invocable's result
    pub fn into_result(self) -> Result<Value, ToolError> {
        if self.success {
            Ok(self.result.unwrap_or(Value::Null))
        } else {
            Err(ToolError::Execution(
                self.error
                    .unwrap_or_else(|| "plugin reported a failure".to_string()),
            ))
        }
    }
}
