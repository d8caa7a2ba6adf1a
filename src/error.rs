//! Error types for toolhost

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for toolhost
#[derive(Error, Debug)]
pub enum ToolhostError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// A plugin unit that could not be loaded. The unit is skipped.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("{}: not executable and no interpreter configured for it", .path.display())]
    NotExecutable { path: PathBuf },

    #[error("{}: failed to spawn: {reason}", .path.display())]
    Spawn { path: PathBuf, reason: String },

    #[error("{}: describe exited with {status}: {stderr}", .path.display())]
    DescribeFailed {
        path: PathBuf,
        status: String,
        stderr: String,
    },

    #[error("{}: describe timed out after {timeout:?}", .path.display())]
    DescribeTimeout { path: PathBuf, timeout: Duration },

    #[error("{}: invalid manifest: {reason}", .path.display())]
    Manifest { path: PathBuf, reason: String },
}

/// A callable that could not be turned into a tool descriptor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("invalid tool name '{0}'")]
    InvalidName(String),

    #[error("tool '{tool}': duplicate parameter '{param}'")]
    DuplicateParameter { tool: String, param: String },

    #[error("tool '{tool}': parameter '{param}' has unsupported type '{annotation}'")]
    UnsupportedType {
        tool: String,
        param: String,
        annotation: String,
    },
}

/// Raised by an invocable while executing a tool call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("{0}")]
    Execution(String),

    #[error("tool timed out after {0:?}")]
    Timeout(Duration),
}

/// Stream-level failures that end the serving loop
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to read request frame: {0}")]
    Read(#[source] std::io::Error),

    #[error("Failed to write response frame: {0}")]
    Write(#[source] std::io::Error),

    #[error("Failed to encode response frame: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Result type alias using ToolhostError
pub type Result<T> = std::result::Result<T, ToolhostError>;
