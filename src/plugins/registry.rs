//! Tool registry
//!
//! Maps tool names to their descriptor and invocable. Filled once during
//! startup, then shared read-only with the protocol server.

use super::descriptor::ToolDescriptor;
#[cfg(test)]
use super::schema::{build_descriptor, Signature};
#[cfg(test)]
use crate::error::RegistrationError;
use crate::error::ToolError;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Arguments passed to a tool
pub type Arguments = Map<String, Value>;

/// Something that can execute a tool call
#[async_trait]
pub trait Invocable: Send + Sync {
    async fn invoke(&self, arguments: Arguments) -> Result<Value, ToolError>;
}

/// In-process invocable backed by a closure
#[cfg(test)]
pub struct FnTool<F>(pub F);

#[cfg(test)]
#[async_trait]
impl<F> Invocable for FnTool<F>
where
    F: Fn(Arguments) -> Result<Value, ToolError> + Send + Sync,
{
    async fn invoke(&self, arguments: Arguments) -> Result<Value, ToolError> {
        (self.0)(arguments)
    }
}

/// A registered tool
#[derive(Clone)]
pub struct RegisteredTool {
    pub descriptor: ToolDescriptor,
    pub invocable: Arc<dyn Invocable>,
}

impl fmt::Debug for RegisteredTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredTool")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Name -> tool mapping that remembers registration order
#[derive(Debug, Default)]
pub struct Registry {
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A tool already registered under the same name is
    /// replaced in place and returned.
    pub fn register(
        &mut self,
        descriptor: ToolDescriptor,
        invocable: Arc<dyn Invocable>,
    ) -> Option<RegisteredTool> {
        let name = descriptor.name.clone();
        let entry = RegisteredTool {
            descriptor,
            invocable,
        };

        match self.index.get(&name) {
            Some(&slot) => {
                warn!(
                    "Tool name collision: '{}' is defined more than once, the later definition wins",
                    name
                );
                Some(std::mem::replace(&mut self.tools[slot], entry))
            }
            None => {
                debug!("Registering tool '{}'", name);
                self.index.insert(name, self.tools.len());
                self.tools.push(entry);
                None
            }
        }
    }

    /// Register a closure, deriving its descriptor from `signature`
    #[cfg(test)]
    pub fn register_fn<F>(&mut self, signature: &Signature, f: F) -> Result<(), RegistrationError>
    where
        F: Fn(Arguments) -> Result<Value, ToolError> + Send + Sync + 'static,
    {
        let descriptor = build_descriptor(signature)?;
        self.register(descriptor, Arc::new(FnTool(f)));
        Ok(())
    }

    /// Look up a tool by name
    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.index.get(name).map(|&slot| &self.tools[slot])
    }

    /// Check if a tool exists
    #[cfg(test)]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// All descriptors, in registration order
    pub fn list(&self) -> Vec<&ToolDescriptor> {
        self.tools.iter().map(|t| &t.descriptor).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn constant(value: Value) -> Arc<dyn Invocable> {
        Arc::new(FnTool(move |_args: Arguments| Ok(value.clone())))
    }

    fn descriptor(name: &str, description: &str) -> ToolDescriptor {
        ToolDescriptor {
            name: name.to_string(),
            description: description.to_string(),
            parameters: vec![],
        }
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = Registry::new();
        assert!(registry.is_empty());

        let replaced = registry.register(descriptor("ping", "Ping."), constant(json!("pong")));

        assert!(replaced.is_none());
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("ping"));
        assert_eq!(registry.get("ping").unwrap().descriptor.description, "Ping.");
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_list_preserves_registration_order() {
        let mut registry = Registry::new();
        for name in ["zeta", "alpha", "mid"] {
            registry.register(descriptor(name, ""), constant(Value::Null));
        }

        let names: Vec<&str> = registry.list().iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    }

    #[tokio::test]
    async fn test_collision_last_wins_in_place() {
        let mut registry = Registry::new();
        registry.register(descriptor("dup", "first"), constant(json!(1)));
        registry.register(descriptor("other", ""), constant(json!(0)));

        let replaced = registry.register(descriptor("dup", "second"), constant(json!(2)));

        assert_eq!(replaced.unwrap().descriptor.description, "first");
        assert_eq!(registry.len(), 2);

        let tool = registry.get("dup").unwrap();
        assert_eq!(tool.descriptor.description, "second");
        assert_eq!(tool.invocable.invoke(Arguments::new()).await, Ok(json!(2)));

        let names: Vec<&str> = registry.list().iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["dup", "other"]);
    }

    #[tokio::test]
    async fn test_register_fn() {
        let mut registry = Registry::new();
        let sig = Signature::new("add")
            .doc("Add two integers.")
            .param("a", "int")
            .param("b", "int");

        registry
            .register_fn(&sig, |args| {
                let a = args.get("a").and_then(Value::as_i64).unwrap_or_default();
                let b = args.get("b").and_then(Value::as_i64).unwrap_or_default();
                Ok(json!(a + b))
            })
            .unwrap();

        let tool = registry.get("add").unwrap();
        assert_eq!(tool.descriptor.parameters.len(), 2);

        let mut args = Arguments::new();
        args.insert("a".into(), json!(2));
        args.insert("b".into(), json!(3));
        assert_eq!(tool.invocable.invoke(args).await, Ok(json!(5)));
    }

    #[test]
    fn test_register_fn_rejects_bad_signature() {
        let mut registry = Registry::new();
        let sig = Signature::new("bad name");

        let result = registry.register_fn(&sig, |_| Ok(Value::Null));

        assert!(result.is_err());
        assert!(registry.is_empty());
    }
}
