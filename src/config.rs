//! Configuration management for toolhost
//!
//! Handles loading and merging configuration from multiple sources:
//! 1. Compiled defaults
//! 2. User config (~/.config/toolhost/config.toml)
//! 3. Project config (<root>/toolhost.toml)
//! 4. Config file given on the command line
//! 5. Environment variables
//! 6. CLI arguments (applied by the caller)

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Name of the project-level config file inside the server root
pub const PROJECT_CONFIG: &str = "toolhost.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub plugins: PluginConfig,
    pub logging: LoggingConfig,
}

/// Identity advertised in the handshake
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server name; empty means `<root dir name>-mcp-server`
    pub name: String,
    /// Server version
    pub version: String,
}

/// Plugin configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    /// Enable plugins; unset means enabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Plugin directory, relative to the server root
    pub directory: String,
    /// Specific units to load (by file stem); empty loads all
    pub load: Vec<String>,
    /// Per-call timeout in seconds
    pub timeout: u64,
    /// Timeout for a unit's `describe` run, in seconds
    pub describe_timeout: u64,
    /// File extension -> launcher command
    pub interpreters: BTreeMap<String, String>,
}

/// Diagnostics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset
    pub level: String,
    /// Output format: text or json
    pub format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            enabled: None,
            directory: "tool_modules".to_string(),
            load: vec![],
            timeout: 30,
            describe_timeout: 10,
            interpreters: BTreeMap::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

impl PluginConfig {
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn describe_timeout(&self) -> Duration {
        Duration::from_secs(self.describe_timeout)
    }
}

impl Config {
    /// Load configuration from all sources
    pub fn load(root: &Path, cli_config: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        // Load user config
        if let Some(dir) = dirs::config_dir() {
            let user_config = dir.join("toolhost/config.toml");
            if user_config.exists() {
                debug!("Loading user config from {:?}", user_config);
                config.merge_from_file(&user_config)?;
            }
        }

        // Load project config
        let project_config = root.join(PROJECT_CONFIG);
        if project_config.exists() {
            debug!("Loading project config from {:?}", project_config);
            config.merge_from_file(&project_config)?;
        }

        // Load CLI-specified config
        if let Some(path) = cli_config {
            debug!("Loading CLI config from {:?}", path);
            config.merge_from_file(path)?;
        }

        // Apply environment overrides
        config.apply_env_overrides()?;

        Ok(config)
    }

    /// Merge configuration from a file
    fn merge_from_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(format!("{}: {}", path.display(), e)))?;

        let file_config: Config = toml::from_str(&contents)
            .map_err(|e| ConfigError::Parse(format!("{}: {}", path.display(), e)))?;

        self.merge(file_config);
        Ok(())
    }

    /// Merge another config into this one (other takes precedence)
    fn merge(&mut self, other: Config) {
        let server_defaults = ServerConfig::default();
        let plugin_defaults = PluginConfig::default();
        let logging_defaults = LoggingConfig::default();

        // Server config
        if other.server.name != server_defaults.name {
            self.server.name = other.server.name;
        }
        if other.server.version != server_defaults.version {
            self.server.version = other.server.version;
        }

        // Plugin config - only a layer that sets the switch changes it
        if other.plugins.enabled.is_some() {
            self.plugins.enabled = other.plugins.enabled;
        }
        if other.plugins.directory != plugin_defaults.directory {
            self.plugins.directory = other.plugins.directory;
        }
        if !other.plugins.load.is_empty() {
            self.plugins.load = other.plugins.load;
        }
        if other.plugins.timeout != plugin_defaults.timeout {
            self.plugins.timeout = other.plugins.timeout;
        }
        if other.plugins.describe_timeout != plugin_defaults.describe_timeout {
            self.plugins.describe_timeout = other.plugins.describe_timeout;
        }
        self.plugins.interpreters.extend(other.plugins.interpreters);

        // Logging config
        if other.logging.level != logging_defaults.level {
            self.logging.level = other.logging.level;
        }
        if other.logging.format != logging_defaults.format {
            self.logging.format = other.logging.format;
        }
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(dir) = std::env::var("TOOLHOST_PLUGIN_DIR") {
            self.plugins.directory = dir;
        }
        if let Ok(timeout) = std::env::var("TOOLHOST_TIMEOUT") {
            self.plugins.timeout = timeout.parse().map_err(|_| {
                ConfigError::Invalid(format!("TOOLHOST_TIMEOUT is not a number: {}", timeout))
            })?;
        }
        if let Ok(level) = std::env::var("TOOLHOST_LOG") {
            self.logging.level = level;
        }
        if let Ok(name) = std::env::var("TOOLHOST_SERVER_NAME") {
            self.server.name = name;
        }
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.plugins.directory.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "plugins.directory must not be empty".to_string(),
            ));
        }
        if self.plugins.timeout == 0 {
            return Err(ConfigError::Invalid(
                "plugins.timeout must be at least 1 second".to_string(),
            ));
        }
        if self.plugins.describe_timeout == 0 {
            return Err(ConfigError::Invalid(
                "plugins.describe_timeout must be at least 1 second".to_string(),
            ));
        }

        let valid_formats = ["text", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "logging.format must be one of: {:?}",
                valid_formats
            )));
        }

        Ok(())
    }

    /// Server name for the handshake, derived from the root when unset
    pub fn server_name(&self, root: &Path) -> String {
        if !self.server.name.is_empty() {
            return self.server.name.clone();
        }
        let dir = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "toolhost".to_string());
        format!("{}-mcp-server", dir)
    }
}
