//! Shared application state for the server.
//!
//! `AppState` owns the cached catalog service. It is built once from the static
//! configuration and shared across handlers via `Arc`.

use std::fs;
use std::sync::Arc;

use anyhow::{Context, Result};
use catalogscope_core::{
    CacheStore, CachedCatalogService, CatalogAdapter, InMemoryAdapter, OpenMetadataAdapter,
    RetryingTransport,
};
use tracing::info;

use crate::config::{CatalogSource, Config};
use crate::upstream::ReqwestTransport;

/// Shared application state.
pub struct AppState {
    pub service: CachedCatalogService,
    /// Short description of the catalog source, reported by `/api/health`.
    pub source: &'static str,
}

impl AppState {
    pub fn new(service: CachedCatalogService, source: &'static str) -> Self {
        Self { service, source }
    }

    /// Builds the adapter selected by the configuration and wraps it in the cache.
    pub fn from_config(config: &Config) -> Result<Self> {
        let (adapter, source): (Arc<dyn CatalogAdapter>, &'static str) = match config.source()? {
            CatalogSource::Snapshot(path) => {
                let text = fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read catalog file {}", path.display()))?;
                let adapter = InMemoryAdapter::from_json(&text, config.adapter_config())
                    .with_context(|| format!("Invalid catalog file {}", path.display()))?;
                info!(path = %path.display(), "server: serving catalog snapshot");
                (Arc::new(adapter), "snapshot")
            }
            CatalogSource::Upstream {
                base_url,
                token_env,
            } => {
                let adapter_config = config.adapter_config();
                let transport = ReqwestTransport::new(
                    &base_url,
                    ReqwestTransport::token_from_env(&token_env),
                    adapter_config.request_timeout,
                )?;
                let transport = RetryingTransport::new(transport, config.retry_policy());
                info!(%base_url, "server: proxying openmetadata upstream");
                (
                    Arc::new(OpenMetadataAdapter::new(transport, adapter_config)),
                    "openmetadata",
                )
            }
        };

        let service =
            CachedCatalogService::new(adapter, CacheStore::in_memory(), config.service_config());
        Ok(Self::new(service, source))
    }
}
