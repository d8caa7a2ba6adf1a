//! Plugin system for toolhost
//!
//! Tools come from plugin units: executables in the plugin directory that
//! describe their callables as JSON and answer calls over stdin/stdout.

mod descriptor;
mod executor;
mod loader;
mod protocol;
mod registry;
mod schema;

pub use descriptor::{ParameterDef, ToolDescriptor};
pub use loader::PluginLoader;
pub use registry::{Arguments, RegisteredTool, Registry};

#[cfg(test)]
pub use schema::Signature;
