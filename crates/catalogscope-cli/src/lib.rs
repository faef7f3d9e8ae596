//! CatalogScope CLI library.
//!
//! This module exposes internal types for testing purposes.
//! The main entry point is the `catalogscope` binary.

pub mod cli;
pub mod config;
pub mod logging;
pub mod server;
pub mod upstream;

// Re-export commonly used types
pub use cli::Args;
pub use config::Config;
