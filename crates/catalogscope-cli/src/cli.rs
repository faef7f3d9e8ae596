//! CLI argument parsing using clap.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// CatalogScope - cached metadata catalog facade
#[derive(Parser, Debug)]
#[command(name = "catalogscope")]
#[command(about = "Serve a cached, provider-agnostic view of a metadata catalog", long_about = None)]
#[command(version)]
pub struct Args {
    /// TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Upstream catalog API base URL (e.g., http://localhost:8585/api)
    #[arg(long, value_name = "URL", conflicts_with = "catalog_file")]
    pub upstream_url: Option<String>,

    /// Name of the environment variable holding the upstream bearer token
    #[arg(long, value_name = "VAR")]
    pub token_env: Option<String>,

    /// Serve a JSON catalog snapshot instead of a live upstream
    #[arg(long, value_name = "FILE")]
    pub catalog_file: Option<PathBuf>,

    /// Address to bind the HTTP server to
    #[arg(long, value_name = "HOST")]
    pub host: Option<String>,

    /// Port for HTTP server (default: 3000)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Log output format
    #[arg(long, default_value = "text", value_enum)]
    pub log_format: LogFormat,

    /// Validate the configuration and exit
    #[arg(long)]
    pub check: bool,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}
