//! Plugin loader
//!
//! Discovers plugin units in the plugin directory, asks each one to describe
//! itself and registers the callables it defines as tools.

use super::descriptor::ToolDescriptor;
use super::executor::{describe, Launcher, ProcessTool};
use super::protocol::UnitManifest;
use super::registry::Registry;
use super::schema::{build_descriptor, Signature};
use crate::config::PluginConfig;
use crate::error::LoadError;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Extensions of files that sit next to units but are not units
const NON_UNIT_EXTENSIONS: &[&str] = &["json", "toml", "md", "txt", "lock"];

/// Stems of package initializer stubs
const INITIALIZER_STEMS: &[&str] = &["mod", "init"];

/// A unit that described itself successfully
#[derive(Debug)]
struct LoadedUnit {
    namespace: String,
    tools: Vec<ToolDescriptor>,
    launcher: Launcher,
}

/// Loads plugin units into a registry
pub struct PluginLoader {
    config: PluginConfig,
    root: PathBuf,
}

impl PluginLoader {
    /// Create a loader for the server rooted at `root`
    pub fn new(root: &Path, config: PluginConfig) -> Self {
        Self {
            config,
            root: root.to_path_buf(),
        }
    }

    /// Directory scanned for units
    pub fn plugin_dir(&self) -> PathBuf {
        self.root.join(&self.config.directory)
    }

    /// Build a registry from the plugin directory. Never fails: broken units
    /// and callables are logged and skipped.
    pub async fn load(&self) -> Registry {
        let mut registry = Registry::new();
        self.load_into(&mut registry).await;
        registry
    }

    /// Load every unit into `registry`, returning the number of units loaded
    pub async fn load_into(&self, registry: &mut Registry) -> usize {
        if !self.config.is_enabled() {
            debug!("Plugins disabled in configuration");
            return 0;
        }

        let plugin_dir = self.plugin_dir();
        if !plugin_dir.is_dir() {
            warn!("Tool modules directory not found: {:?}", plugin_dir);
            return 0;
        }

        let units = match self.discover_units(&plugin_dir) {
            Ok(units) => units,
            Err(e) => {
                warn!("Failed to read plugin directory {:?}: {}", plugin_dir, e);
                return 0;
            }
        };

        let mut loaded = 0;
        for path in units {
            match self.load_unit(&path).await {
                Ok(unit) => {
                    info!(
                        "Loaded module: {} ({} tools)",
                        unit.namespace,
                        unit.tools.len()
                    );
                    for descriptor in unit.tools {
                        let name = descriptor.name.clone();
                        let invocable = ProcessTool::new(
                            &name,
                            unit.launcher.clone(),
                            self.config.call_timeout(),
                        );
                        registry.register(descriptor, Arc::new(invocable));
                        info!("Registered tool: {}", name);
                    }
                    loaded += 1;
                }
                Err(e) => warn!("Error loading module: {}", e),
            }
        }

        loaded
    }

    /// Units directly under the plugin directory, sorted by file name
    fn discover_units(&self, plugin_dir: &Path) -> std::io::Result<Vec<PathBuf>> {
        let mut units = Vec::new();

        for entry in fs::read_dir(plugin_dir)?.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }

            let file_name = entry.file_name().to_string_lossy().into_owned();
            if let Some(reason) = skip_reason(&file_name) {
                debug!("Skipping '{}': {}", file_name, reason);
                continue;
            }

            if !self.config.load.is_empty() && !self.config.load.iter().any(|n| *n == stem(&path)) {
                debug!("Skipping '{}': not listed in plugins.load", file_name);
                continue;
            }

            units.push(path);
        }

        units.sort();

        for wanted in &self.config.load {
            if !units.iter().any(|p| stem(p) == *wanted) {
                warn!("Plugin '{}' listed in plugins.load was not found", wanted);
            }
        }

        Ok(units)
    }

    /// Describe one unit and convert its local callables into descriptors
    async fn load_unit(&self, path: &Path) -> Result<LoadedUnit, LoadError> {
        let unit_stem = stem(path);
        let namespace = format!("{}.{}", dir_name(&self.root), unit_stem);
        let launcher = self.launcher_for(path)?;

        let manifest_json = match sidecar_manifest(path) {
            Some(sidecar) => fs::read_to_string(&sidecar).map_err(|e| LoadError::Manifest {
                path: sidecar.clone(),
                reason: e.to_string(),
            })?,
            None => describe(&launcher, self.config.describe_timeout()).await?,
        };

        let manifest: UnitManifest =
            serde_json::from_str(&manifest_json).map_err(|e| LoadError::Manifest {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        let mut tools = Vec::new();
        for signature in &manifest.functions {
            if signature.name.starts_with('_') {
                debug!("Skipping private callable '{}' in {}", signature.name, namespace);
                continue;
            }
            if !is_local(signature, &unit_stem, &namespace) {
                debug!(
                    "Skipping '{}' in {}: imported from {:?}",
                    signature.name, namespace, signature.defined_in
                );
                continue;
            }

            match build_descriptor(signature) {
                Ok(descriptor) => tools.push(descriptor),
                Err(e) => error!("Failed to register {} from {}: {}", signature.name, namespace, e),
            }
        }

        Ok(LoadedUnit {
            namespace,
            tools,
            launcher,
        })
    }

    fn launcher_for(&self, path: &Path) -> Result<Launcher, LoadError> {
        let interpreter = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(|ext| self.config.interpreters.get(ext));

        match interpreter {
            Some(interpreter) => Ok(Launcher::interpreted(interpreter, path)),
            None if is_executable(path) => Ok(Launcher::direct(path)),
            None => Err(LoadError::NotExecutable {
                path: path.to_path_buf(),
            }),
        }
    }
}

/// Why a directory entry is not treated as a unit
fn skip_reason(file_name: &str) -> Option<&'static str> {
    if file_name.starts_with('.') {
        return Some("hidden");
    }
    if file_name.starts_with('_') {
        return Some("private");
    }

    let path = Path::new(file_name);
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        if NON_UNIT_EXTENSIONS.contains(&ext) {
            return Some("not a unit");
        }
    }
    if INITIALIZER_STEMS.contains(&stem(path).as_str()) {
        return Some("initializer stub");
    }
    None
}

/// Whether a callable was defined in the unit that reported it
fn is_local(signature: &Signature, unit_stem: &str, namespace: &str) -> bool {
    match signature.defined_in.as_deref() {
        None => true,
        Some(origin) => origin == unit_stem || origin == namespace,
    }
}

fn sidecar_manifest(path: &Path) -> Option<PathBuf> {
    let sidecar = path.with_extension("json");
    (sidecar != path && sidecar.is_file()).then_some(sidecar)
}

fn stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "toolhost".to_string())
}

/// Check if a file is executable
#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(meta) = fs::metadata(path) {
        let mode = meta.permissions().mode();
        mode & 0o111 != 0
    } else {
        false
    }
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.exists()
}
