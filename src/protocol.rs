//! Peer protocol definitions
//!
//! Every frame is one JSON object on its own line. The server writes a
//! handshake frame first, then answers each request frame with exactly one
//! response frame.

use crate::dispatch::{FailureKind, InvocationRequest, InvocationResult};
use crate::plugins::{Arguments, ParameterDef, ToolDescriptor};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Operations the server answers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    ListTools,
    CallTool,
}

/// Every supported operation, in the order advertised
pub const OPERATIONS: [Operation; 2] = [Operation::ListTools, Operation::CallTool];

/// First frame of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Handshake {
    pub server_name: String,
    pub server_version: String,
    pub operations: Vec<Operation>,
}

impl Handshake {
    pub fn new(server_name: &str, server_version: &str) -> Self {
        Self {
            server_name: server_name.to_string(),
            server_version: server_version.to_string(),
            operations: OPERATIONS.to_vec(),
        }
    }
}

/// Raw request frame
#[derive(Debug, Deserialize)]
struct RequestFrame {
    operation: String,
    #[serde(default)]
    tool_name: Option<String>,
    #[serde(default)]
    arguments: Option<Arguments>,
}

/// A decoded request
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Correlation id supplied by the peer, echoed on the response
    pub id: Option<Value>,
    pub kind: RequestKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestKind {
    ListTools,
    CallTool(InvocationRequest),
}

/// A frame that could not be turned into a request
#[derive(Debug, Clone, PartialEq)]
pub struct FrameError {
    pub id: Option<Value>,
    pub message: String,
}

impl FrameError {
    pub fn new(id: Option<Value>, message: impl Into<String>) -> Self {
        Self {
            id,
            message: message.into(),
        }
    }
}

/// Decode one request line
pub fn decode_request(line: &str) -> Result<Request, FrameError> {
    let value: Value = serde_json::from_str(line)
        .map_err(|e| FrameError::new(None, format!("Invalid JSON: {}", e)))?;

    let id = match &value {
        Value::Object(map) => map.get("id").cloned(),
        _ => return Err(FrameError::new(None, "Request must be a JSON object")),
    };

    let frame: RequestFrame = serde_json::from_value(value)
        .map_err(|e| FrameError::new(id.clone(), format!("Invalid request: {}", e)))?;

    let kind = match frame.operation.as_str() {
        "list_tools" => RequestKind::ListTools,
        "call_tool" => {
            let tool_name = frame
                .tool_name
                .filter(|name| !name.is_empty())
                .ok_or_else(|| FrameError::new(id.clone(), "call_tool requires 'tool_name'"))?;
            RequestKind::CallTool(InvocationRequest {
                tool_name,
                arguments: frame.arguments.unwrap_or_default(),
            })
        }
        other => {
            return Err(FrameError::new(
                id,
                format!("Unsupported operation '{}'", other),
            ))
        }
    };

    Ok(Request { id, kind })
}

/// One entry of a `list_tools` response
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolEntry {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ParameterDef>,
    pub input_schema: Value,
}

impl From<&ToolDescriptor> for ToolEntry {
    fn from(descriptor: &ToolDescriptor) -> Self {
        Self {
            name: descriptor.name.clone(),
            description: descriptor.description.clone(),
            parameters: descriptor.parameters.clone(),
            input_schema: descriptor.input_schema(),
        }
    }
}

/// Response frame
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Response {
    Tools {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<Value>,
        tools: Vec<ToolEntry>,
    },
    Call(CallResponse),
}

/// Outcome of a `call_tool`, or of a request that could not be served
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CallResponse {
    Success {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<Value>,
        result: Value,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<Value>,
        error_kind: FailureKind,
        error_message: String,
    },
}

impl Response {
    pub fn tools<'a>(id: Option<Value>, descriptors: impl IntoIterator<Item = &'a ToolDescriptor>) -> Self {
        Response::Tools {
            id,
            tools: descriptors.into_iter().map(ToolEntry::from).collect(),
        }
    }

    pub fn call(id: Option<Value>, result: InvocationResult) -> Self {
        let response = match result {
            InvocationResult::Success(result) => CallResponse::Success { id, result },
            InvocationResult::Failure { kind, message } => CallResponse::Error {
                id,
                error_kind: kind,
                error_message: message,
            },
        };
        Response::Call(response)
    }

    pub fn invalid(error: FrameError) -> Self {
        Response::call(
            error.id,
            InvocationResult::failure(FailureKind::InvalidRequest, error.message),
        )
    }
}

/// Serialize a frame, newline included
pub fn encode_frame<T: Serialize>(frame: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut bytes = serde_json::to_vec(frame)?;
    bytes.push(b'\n');
    Ok(bytes)
}
