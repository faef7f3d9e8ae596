//! Static configuration.
//!
//! Loaded once at start-up from an optional TOML file, overridden by CLI flags,
//! validated, then converted into the core's [`AdapterConfig`], [`ServiceConfig`]
//! and [`RetryPolicy`]. Nothing re-reads it afterwards.
//!
//! ```toml
//! [upstream]
//! base_url = "http://localhost:8585/api"
//! token_env = "CATALOGSCOPE_TOKEN"
//!
//! [cache]
//! tables_ttl_secs = 60
//!
//! [server]
//! port = 3000
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use catalogscope_core::{AdapterConfig, CacheTtls, RetryPolicy, ServiceConfig};
use serde::Deserialize;

use crate::cli::Args;

pub const DEFAULT_TOKEN_ENV: &str = "CATALOGSCOPE_TOKEN";
const MAX_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Serve this JSON catalog snapshot instead of an upstream.
    pub catalog_file: Option<PathBuf>,
    pub upstream: UpstreamConfig,
    pub cache: CacheConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UpstreamConfig {
    pub base_url: Option<String>,
    /// Environment variable holding the bearer token.
    pub token_env: String,
    pub request_timeout_ms: u64,
    pub page_size: usize,
    pub max_lineage_depth: u32,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    pub datasources_ttl_secs: u64,
    pub datasets_ttl_secs: u64,
    pub tables_ttl_secs: u64,
    pub columns_ttl_secs: u64,
    pub follower_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            token_env: DEFAULT_TOKEN_ENV.to_string(),
            request_timeout_ms: 10_000,
            page_size: 100,
            max_lineage_depth: 5,
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_retries: policy.max_retries,
            initial_backoff_ms: policy.initial_backoff.as_millis() as u64,
            max_backoff_ms: policy.max_backoff.as_millis() as u64,
            multiplier: policy.multiplier,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        let ttls = CacheTtls::default();
        Self {
            datasources_ttl_secs: ttls.datasources.as_secs(),
            datasets_ttl_secs: ttls.datasets.as_secs(),
            tables_ttl_secs: ttls.tables.as_secs(),
            columns_ttl_secs: ttls.columns.as_secs(),
            follower_timeout_ms: 15_000,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

/// Where catalog data comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogSource {
    Upstream { base_url: String, token_env: String },
    Snapshot(PathBuf),
}

impl Config {
    /// Reads a TOML file, or starts from defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("Failed to parse TOML")
    }

    /// Loads, applies CLI overrides and validates.
    pub fn from_args(args: &Args) -> Result<Self> {
        let mut config = Self::load(args.config.as_deref())?;
        config.apply_overrides(args);
        config.validate()?;
        Ok(config)
    }

    /// CLI flags win over file values. Choosing one catalog source clears the other.
    pub fn apply_overrides(&mut self, args: &Args) {
        if let Some(url) = &args.upstream_url {
            self.upstream.base_url = Some(url.clone());
            self.catalog_file = None;
        }
        if let Some(path) = &args.catalog_file {
            self.catalog_file = Some(path.clone());
            self.upstream.base_url = None;
        }
        if let Some(token_env) = &args.token_env {
            self.upstream.token_env = token_env.clone();
        }
        if let Some(host) = &args.host {
            self.server.host = host.clone();
        }
        if let Some(port) = args.port {
            self.server.port = port;
        }
    }

    pub fn validate(&self) -> Result<()> {
        match (&self.upstream.base_url, &self.catalog_file) {
            (None, None) => {
                bail!("No catalog source: set upstream.base_url or catalog_file")
            }
            (Some(_), Some(_)) => {
                bail!("Set either upstream.base_url or catalog_file, not both")
            }
            (Some(url), None) => {
                let parsed = reqwest::Url::parse(url)
                    .with_context(|| format!("Invalid upstream.base_url '{url}'"))?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    bail!("upstream.base_url must use http or https, got '{}'", parsed.scheme());
                }
            }
            (None, Some(_)) => {}
        }

        let upstream = &self.upstream;
        if upstream.request_timeout_ms == 0 {
            bail!("upstream.request_timeout_ms must be greater than zero");
        }
        if !(1..=MAX_PAGE_SIZE).contains(&upstream.page_size) {
            bail!("upstream.page_size must be between 1 and {MAX_PAGE_SIZE}");
        }
        if upstream.token_env.trim().is_empty() {
            bail!("upstream.token_env must not be empty");
        }
        if !(upstream.retry.multiplier.is_finite() && upstream.retry.multiplier >= 1.0) {
            bail!("upstream.retry.multiplier must be at least 1.0");
        }
        if self.cache.follower_timeout_ms == 0 {
            bail!("cache.follower_timeout_ms must be greater than zero");
        }
        if self.server.host.trim().is_empty() {
            bail!("server.host must not be empty");
        }
        Ok(())
    }

    pub fn source(&self) -> Result<CatalogSource> {
        match (&self.upstream.base_url, &self.catalog_file) {
            (Some(base_url), None) => Ok(CatalogSource::Upstream {
                base_url: base_url.trim_end_matches('/').to_string(),
                token_env: self.upstream.token_env.clone(),
            }),
            (None, Some(path)) => Ok(CatalogSource::Snapshot(path.clone())),
            _ => bail!("Exactly one of upstream.base_url and catalog_file must be set"),
        }
    }

    pub fn adapter_config(&self) -> AdapterConfig {
        AdapterConfig {
            request_timeout: Duration::from_millis(self.upstream.request_timeout_ms),
            page_size: self.upstream.page_size,
            max_lineage_depth: self.upstream.max_lineage_depth,
        }
    }

    pub fn service_config(&self) -> ServiceConfig {
        let cache = &self.cache;
        ServiceConfig {
            ttls: CacheTtls {
                datasources: Duration::from_secs(cache.datasources_ttl_secs),
                datasets: Duration::from_secs(cache.datasets_ttl_secs),
                tables: Duration::from_secs(cache.tables_ttl_secs),
                columns: Duration::from_secs(cache.columns_ttl_secs),
            },
            follower_timeout: Duration::from_millis(cache.follower_timeout_ms),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let retry = &self.upstream.retry;
        RetryPolicy {
            max_retries: retry.max_retries,
            initial_backoff: Duration::from_millis(retry.initial_backoff_ms),
            max_backoff: Duration::from_millis(retry.max_backoff_ms),
            multiplier: retry.multiplier,
        }
    }
}
