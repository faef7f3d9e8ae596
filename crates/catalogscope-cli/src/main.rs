//! CatalogScope - cached metadata catalog facade

use catalogscope_cli::{logging, server, Args, Config};

use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;

/// Server failed at runtime.
const EXIT_FAILURE: u8 = 1;
/// Configuration error (e.g. no catalog source configured).
const EXIT_CONFIG_ERROR: u8 = 66;

fn main() -> ExitCode {
    let args = Args::parse();

    let config = match Config::from_args(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("catalogscope: error: {e:#}");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    if args.check {
        println!("catalogscope: configuration is valid");
        return ExitCode::SUCCESS;
    }

    if let Err(e) = logging::init_logging(args.log_format) {
        eprintln!("catalogscope: warning: {e:#}");
    }

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            eprintln!("catalogscope: server error: {e:#}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

fn run(config: Config) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
    runtime.block_on(server::run_server(config))
}
