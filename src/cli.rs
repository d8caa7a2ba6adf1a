//! Command-line argument parsing for toolhost

use clap::Parser;
use std::path::PathBuf;

/// toolhost - serve plugin tools over a line-framed JSON protocol on stdio
#[derive(Parser, Debug)]
#[command(name = "toolhost")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Server root; plugin units live in <ROOT>/tool_modules
    #[arg(value_name = "ROOT")]
    pub root: Option<PathBuf>,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,

    /// Diagnostics format: text or json
    #[arg(long, value_name = "FMT")]
    pub log_format: Option<String>,

    /// Plugin directory name, relative to the root
    #[arg(long, value_name = "NAME")]
    pub plugin_dir: Option<String>,

    /// Per-call timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,
}
