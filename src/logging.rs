//! Diagnostics setup
//!
//! Everything goes to stderr; stdout carries protocol frames only.

use crate::config::LoggingConfig;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the logging/tracing subsystem
pub fn init_logging(config: &LoggingConfig, debug: bool) {
    let directive = filter_directive(debug, std::env::var("RUST_LOG").ok(), &config.level);
    let filter = EnvFilter::new(directive);

    if config.format == "json" {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .with(filter)
            .init();
    }
}

/// `--debug` wins, then RUST_LOG, then the configured level
fn filter_directive(debug: bool, rust_log: Option<String>, level: &str) -> String {
    if debug {
        return "debug".to_string();
    }
    match rust_log {
        Some(env) if !env.trim().is_empty() => env,
        _ => level.to_string(),
    }
}
