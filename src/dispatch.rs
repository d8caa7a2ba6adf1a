//! Tool call dispatch
//!
//! Validates a call's arguments against the tool's schema, runs the tool and
//! folds every outcome into an [`InvocationResult`]. Nothing a tool does can
//! escape this boundary as an error or a panic.

use crate::error::ToolError;
use crate::plugins::{Arguments, RegisteredTool, Registry, ToolDescriptor};
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Why a call did not produce a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    UnknownTool,
    InvalidArguments,
    ExecutionError,
    Timeout,
    InvalidRequest,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::UnknownTool => "unknown_tool",
            FailureKind::InvalidArguments => "invalid_arguments",
            FailureKind::ExecutionError => "execution_error",
            FailureKind::Timeout => "timeout",
            FailureKind::InvalidRequest => "invalid_request",
        };
        f.write_str(s)
    }
}

/// Outcome of one call
#[derive(Debug, Clone, PartialEq)]
pub enum InvocationResult {
    Success(Value),
    Failure { kind: FailureKind, message: String },
}

impl InvocationResult {
    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        InvocationResult::Failure {
            kind,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, InvocationResult::Success(_))
    }
}

/// A call as received from the peer
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationRequest {
    pub tool_name: String,
    pub arguments: Arguments,
}

/// Executes calls against a read-only registry
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Resolve the tool by name and invoke it
    pub async fn dispatch(&self, request: InvocationRequest) -> InvocationResult {
        match self.registry.get(&request.tool_name) {
            Some(tool) => Self::invoke(tool, request.arguments).await,
            None => {
                warn!("Tool '{}' not found", request.tool_name);
                InvocationResult::failure(
                    FailureKind::UnknownTool,
                    format!("Tool '{}' not found", request.tool_name),
                )
            }
        }
    }

    /// Validate `arguments` and run `tool`
    pub async fn invoke(tool: &RegisteredTool, mut arguments: Arguments) -> InvocationResult {
        let name = tool.descriptor.name.clone();

        if let Err(message) = validate_arguments(&tool.descriptor, &mut arguments) {
            warn!("Rejected call to '{}': {}", name, message);
            return InvocationResult::failure(
                FailureKind::InvalidArguments,
                format!("Invalid arguments for tool '{}': {}", name, message),
            );
        }

        debug!("Invoking tool '{}'", name);

        // Own task so a panicking in-process tool cannot take the server down
        let invocable = Arc::clone(&tool.invocable);
        let handle = tokio::spawn(async move { invocable.invoke(arguments).await });

        match handle.await {
            Ok(Ok(value)) => InvocationResult::Success(value),
            Ok(Err(ToolError::Timeout(after))) => {
                warn!("Tool '{}' timed out after {:?}", name, after);
                InvocationResult::failure(
                    FailureKind::Timeout,
                    format!("Tool '{}' timed out after {:?}", name, after),
                )
            }
            Ok(Err(ToolError::Execution(cause))) => {
                warn!("Tool '{}' failed: {}", name, cause);
                InvocationResult::failure(
                    FailureKind::ExecutionError,
                    format!("Failed to execute tool '{}': {}", name, cause),
                )
            }
            Err(join_error) => {
                let cause = if join_error.is_panic() {
                    panic_message(join_error.into_panic())
                } else {
                    join_error.to_string()
                };
                warn!("Tool '{}' aborted: {}", name, cause);
                InvocationResult::failure(
                    FailureKind::ExecutionError,
                    format!("Failed to execute tool '{}': {}", name, cause),
                )
            }
        }
    }
}

/// Reject unknown and missing arguments, then fill in declared defaults
fn validate_arguments(descriptor: &ToolDescriptor, arguments: &mut Arguments) -> Result<(), String> {
    let unknown: Vec<&str> = arguments
        .keys()
        .filter(|key| descriptor.parameter(key).is_none())
        .map(String::as_str)
        .collect();
    let missing: Vec<&str> = descriptor
        .required_parameters()
        .filter(|name| !arguments.contains_key(*name))
        .collect();

    let mut problems = Vec::new();
    if !missing.is_empty() {
        problems.push(format!("missing required argument(s): {}", missing.join(", ")));
    }
    if !unknown.is_empty() {
        problems.push(format!("unknown argument(s): {}", unknown.join(", ")));
    }
    if !problems.is_empty() {
        return Err(problems.join("; "));
    }

    for param in &descriptor.parameters {
        if let Some(default) = &param.default {
            arguments
                .entry(param.name.clone())
                .or_insert_with(|| default.clone());
        }
    }

    Ok(())
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("tool panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("tool panicked: {}", s)
    } else {
        "tool panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::Signature;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn args(pairs: &[(&str, Value)]) -> Arguments {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn call(tool: &str, arguments: Arguments) -> InvocationRequest {
        InvocationRequest {
            tool_name: tool.to_string(),
            arguments,
        }
    }

    fn registry_with_counter(calls: Arc<AtomicUsize>) -> Registry {
        let mut registry = Registry::new();
        let sig = Signature::new("add")
            .doc("Add two integers.")
            .param("a", "int")
            .param("b", "int");
        registry
            .register_fn(&sig, move |args| {
                calls.fetch_add(1, Ordering::SeqCst);
                let a = args["a"].as_i64().unwrap_or_default();
                let b = args["b"].as_i64().unwrap_or_default();
                Ok(json!(a + b))
            })
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn test_dispatch_success() {
        let calls = Arc::new(AtomicUsize::new(0));
        let dispatcher = Dispatcher::new(Arc::new(registry_with_counter(calls.clone())));

        let result = dispatcher
            .dispatch(call("add", args(&[("a", json!(2)), ("b", json!(3))])))
            .await;

        assert_eq!(result, InvocationResult::Success(json!(5)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let dispatcher = Dispatcher::new(Arc::new(Registry::new()));

        let result = dispatcher.dispatch(call("nope", Arguments::new())).await;

        match result {
            InvocationResult::Failure { kind, message } => {
                assert_eq!(kind, FailureKind::UnknownTool);
                assert!(message.contains("nope"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_argument_never_runs_tool() {
        let calls = Arc::new(AtomicUsize::new(0));
        let dispatcher = Dispatcher::new(Arc::new(registry_with_counter(calls.clone())));

        let result = dispatcher
            .dispatch(call("add", args(&[("a", json!(2))])))
            .await;

        match result {
            InvocationResult::Failure { kind, message } => {
                assert_eq!(kind, FailureKind::InvalidArguments);
                assert!(message.contains("missing required argument(s): b"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_argument_never_runs_tool() {
        let calls = Arc::new(AtomicUsize::new(0));
        let dispatcher = Dispatcher::new(Arc::new(registry_with_counter(calls.clone())));

        let result = dispatcher
            .dispatch(call(
                "add",
                args(&[("a", json!(1)), ("b", json!(1)), ("c", json!(1))]),
            ))
            .await;

        assert!(matches!(
            result,
            InvocationResult::Failure {
                kind: FailureKind::InvalidArguments,
                ..
            }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_defaults_are_filled_in() {
        let mut registry = Registry::new();
        let sig = Signature::new("retrieve_documents")
            .param("query", "str")
            .param_with_default("k", "int", json!(4));
        registry
            .register_fn(&sig, |args| Ok(Value::Object(args)))
            .unwrap();
        let dispatcher = Dispatcher::new(Arc::new(registry));

        let result = dispatcher
            .dispatch(call("retrieve_documents", args(&[("query", json!("pip"))])))
            .await;

        assert_eq!(
            result,
            InvocationResult::Success(json!({"query": "pip", "k": 4}))
        );
    }

    #[tokio::test]
    async fn test_execution_error_is_contained() {
        let mut registry = Registry::new();
        registry
            .register_fn(&Signature::new("explode"), |_| {
                Err(ToolError::Execution("Error writing to file out.html".into()))
            })
            .unwrap();
        let dispatcher = Dispatcher::new(Arc::new(registry));

        let result = dispatcher.dispatch(call("explode", Arguments::new())).await;

        assert_eq!(
            result,
            InvocationResult::failure(
                FailureKind::ExecutionError,
                "Failed to execute tool 'explode': Error writing to file out.html"
            )
        );
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let mut registry = Registry::new();
        registry
            .register_fn(&Signature::new("boom"), |_| panic!("index out of range"))
            .unwrap();
        let dispatcher = Dispatcher::new(Arc::new(registry));

        let result = dispatcher.dispatch(call("boom", Arguments::new())).await;

        match result {
            InvocationResult::Failure { kind, message } => {
                assert_eq!(kind, FailureKind::ExecutionError);
                assert!(message.contains("index out of range"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_kind() {
        let mut registry = Registry::new();
        registry
            .register_fn(&Signature::new("hang"), |_| {
                Err(ToolError::Timeout(Duration::from_secs(30)))
            })
            .unwrap();
        let dispatcher = Dispatcher::new(Arc::new(registry));

        let result = dispatcher.dispatch(call("hang", Arguments::new())).await;

        assert!(matches!(
            result,
            InvocationResult::Failure {
                kind: FailureKind::Timeout,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_application_error_is_still_success() {
        let mut registry = Registry::new();
        registry
            .register_fn(&Signature::new("say").param("text", "str"), |_| {
                Ok(json!({"status": "error", "error_message": "Input text cannot be empty."}))
            })
            .unwrap();
        let dispatcher = Dispatcher::new(Arc::new(registry));

        let result = dispatcher
            .dispatch(call("say", args(&[("text", json!(""))])))
            .await;

        assert!(result.is_success());
    }

    #[test]
    fn test_failure_kind_names() {
        assert_eq!(FailureKind::UnknownTool.to_string(), "unknown_tool");
        assert_eq!(
            serde_json::to_string(&FailureKind::InvalidArguments).unwrap(),
            "\"invalid_arguments\""
        );
    }
}
