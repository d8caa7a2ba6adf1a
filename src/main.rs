//! toolhost - a plugin-hosting tool server
//!
//! This is the main entry point for the toolhost binary.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

mod cli;
mod config;
mod dispatch;
mod error;
mod logging;
mod plugins;
mod protocol;
mod server;

use cli::Args;
use config::Config;
use error::ConfigError;
use plugins::PluginLoader;
use server::{shutdown_signal, CloseReason, ProtocolServer};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    let root = resolve_root(args.root.as_deref())?;

    // Load configuration
    let (config, load_error) = prepare_config(&root, &args).context("Invalid configuration")?;

    // Initialize logging
    logging::init_logging(&config.logging, args.debug);

    if let Some(e) = load_error {
        warn!("Failed to load configuration, using defaults: {}", e);
    }

    info!("Starting toolhost v{}", env!("CARGO_PKG_VERSION"));
    info!("Server root: {:?}", root);

    match serve(&root, &config).await {
        Ok(CloseReason::PeerClosed) => info!("Peer disconnected"),
        Ok(CloseReason::Shutdown) => info!("Terminated by signal"),
        Err(e) => {
            error!("Server error: {}", e);
            std::process::exit(1);
        }
    }

    info!("toolhost exited");
    Ok(())
}

/// Load every config layer, apply CLI flags and validate the result.
/// A layer that fails to load is reported back and defaults are used.
fn prepare_config(root: &Path, args: &Args) -> error::Result<(Config, Option<ConfigError>)> {
    let (mut config, load_error) = match Config::load(root, args.config.as_deref()) {
        Ok(cfg) => (cfg, None),
        Err(e) => (Config::default(), Some(e)),
    };
    apply_cli_overrides(&mut config, args);
    config.validate()?;
    Ok((config, load_error))
}

/// Load plugins and serve the peer on stdin/stdout
async fn serve(root: &Path, config: &Config) -> error::Result<CloseReason> {
    let loader = PluginLoader::new(root, config.plugins.clone());
    let registry = Arc::new(loader.load().await);
    info!(
        "Loaded {} tools from {:?}",
        registry.len(),
        loader.plugin_dir()
    );

    let name = config.server_name(root);
    let mut server = ProtocolServer::new(&name, &config.server.version, registry);

    let reason = server
        .run(tokio::io::stdin(), tokio::io::stdout(), shutdown_signal())
        .await?;
    Ok(reason)
}

/// Absolute server root; defaults to the current directory
fn resolve_root(root: Option<&Path>) -> error::Result<PathBuf> {
    let cwd = std::env::current_dir()?;
    let root = match root {
        Some(path) => cwd.join(path),
        None => cwd,
    };
    Ok(std::fs::canonicalize(&root).unwrap_or(root))
}

/// CLI flags take precedence over every config source
fn apply_cli_overrides(config: &mut Config, args: &Args) {
    if let Some(format) = &args.log_format {
        config.logging.format = format.clone();
    }
    if let Some(dir) = &args.plugin_dir {
        config.plugins.directory = dir.clone();
    }
    if let Some(timeout) = args.timeout {
        config.plugins.timeout = timeout;
    }
}
