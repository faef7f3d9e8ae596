//! Cached catalog service.
//!
//! Wraps a [`CatalogAdapter`] with the response cache for the four listing
//! operations. Concurrent misses on the same key share one adapter call through
//! [`SingleFlight`]. Table detail, search and lineage always go to the adapter.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::adapter::{normalize_filter, CatalogAdapter};
use crate::cache::CacheStore;
use crate::error::CatalogResult;
use crate::flight::SingleFlight;
use crate::types::{
    CatalogSearchHit, ColumnSummary, DatasetSummary, DatasourceSummary, LineageDirection,
    LineageGraph, TableDetail, TableSummary,
};

/// Time-to-live for each cached operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheTtls {
    pub datasources: Duration,
    pub datasets: Duration,
    pub tables: Duration,
    pub columns: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            datasources: Duration::from_secs(300),
            datasets: Duration::from_secs(300),
            tables: Duration::from_secs(120),
            columns: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub ttls: CacheTtls,
    /// How long a caller waits on another caller's in-flight fetch.
    pub follower_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            ttls: CacheTtls::default(),
            follower_timeout: Duration::from_secs(15),
        }
    }
}

/// 16 hex chars of SHA-256 over the sorted `name=value` pairs of the present filters.
fn filter_digest(filters: &[(&str, Option<&str>)]) -> Option<String> {
    let mut pairs: Vec<String> = filters
        .iter()
        .filter_map(|(name, value)| normalize_filter(*value).map(|v| format!("{name}={v}")))
        .collect();
    if pairs.is_empty() {
        return None;
    }
    pairs.sort();

    let digest = Sha256::digest(pairs.join("&").as_bytes());
    Some(hex::encode(&digest[..8]))
}

pub fn datasources_key(kind: Option<&str>) -> String {
    match filter_digest(&[("type", kind)]) {
        Some(digest) => format!("datasources:{digest}"),
        None => "datasources".to_string(),
    }
}

pub fn datasets_key(datasource_id: &str) -> String {
    format!("datasets:{datasource_id}")
}

pub fn tables_key(dataset_id: &str, table_type: Option<&str>, search: Option<&str>) -> String {
    match filter_digest(&[("type", table_type), ("search", search)]) {
        Some(digest) => format!("tables:{dataset_id}:{digest}"),
        None => format!("tables:{dataset_id}"),
    }
}

pub fn columns_key(table_id: &str) -> String {
    format!("columns:{table_id}")
}

/// Catalog read operations with read-through caching.
pub struct CachedCatalogService {
    adapter: Arc<dyn CatalogAdapter>,
    cache: CacheStore,
    config: ServiceConfig,
    datasources: SingleFlight<Vec<DatasourceSummary>>,
    datasets: SingleFlight<Vec<DatasetSummary>>,
    tables: SingleFlight<Vec<TableSummary>>,
    columns: SingleFlight<Vec<ColumnSummary>>,
    /// Bumped by every invalidation. A fetch that started under an older
    /// generation returns its value but does not cache it.
    generation: Arc<AtomicU64>,
}

impl std::fmt::Debug for CachedCatalogService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedCatalogService")
            .field("cache", &self.cache)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CachedCatalogService {
    pub fn new(adapter: Arc<dyn CatalogAdapter>, cache: CacheStore, config: ServiceConfig) -> Self {
        let follower_timeout = config.follower_timeout;
        Self {
            adapter,
            cache,
            config,
            datasources: SingleFlight::new(follower_timeout),
            datasets: SingleFlight::new(follower_timeout),
            tables: SingleFlight::new(follower_timeout),
            columns: SingleFlight::new(follower_timeout),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub async fn list_datasources(
        &self,
        kind: Option<&str>,
    ) -> CatalogResult<Vec<DatasourceSummary>> {
        let key = datasources_key(kind);
        let adapter = Arc::clone(&self.adapter);
        let kind = kind.map(str::to_string);
        self.read_through(&key, self.config.ttls.datasources, &self.datasources, || async move {
            adapter.list_datasources(kind.as_deref()).await
        })
        .await
    }

    pub async fn list_datasets(&self, datasource_id: &str) -> CatalogResult<Vec<DatasetSummary>> {
        let key = datasets_key(datasource_id);
        let adapter = Arc::clone(&self.adapter);
        let datasource_id = datasource_id.to_string();
        self.read_through(&key, self.config.ttls.datasets, &self.datasets, || async move {
            adapter.list_datasets(&datasource_id).await
        })
        .await
    }

    pub async fn list_tables(
        &self,
        dataset_id: &str,
        table_type: Option<&str>,
        search: Option<&str>,
    ) -> CatalogResult<Vec<TableSummary>> {
        let key = tables_key(dataset_id, table_type, search);
        let adapter = Arc::clone(&self.adapter);
        let dataset_id = dataset_id.to_string();
        let table_type = table_type.map(str::to_string);
        let search = search.map(str::to_string);
        self.read_through(&key, self.config.ttls.tables, &self.tables, || async move {
            adapter
                .list_tables(&dataset_id, table_type.as_deref(), search.as_deref())
                .await
        })
        .await
    }

    pub async fn list_columns(&self, table_id: &str) -> CatalogResult<Vec<ColumnSummary>> {
        let key = columns_key(table_id);
        let adapter = Arc::clone(&self.adapter);
        let table_id = table_id.to_string();
        self.read_through(&key, self.config.ttls.columns, &self.columns, || async move {
            adapter.list_columns(&table_id).await
        })
        .await
    }

    pub async fn get_table(&self, table_id: &str) -> CatalogResult<TableDetail> {
        self.adapter.get_table(table_id).await
    }

    pub async fn search(
        &self,
        query: &str,
        type_filter: Option<&str>,
        limit: Option<usize>,
    ) -> CatalogResult<Vec<CatalogSearchHit>> {
        self.adapter.search(query, type_filter, limit).await
    }

    pub async fn get_lineage(
        &self,
        table_id: &str,
        direction: LineageDirection,
        depth: u32,
    ) -> CatalogResult<LineageGraph> {
        self.adapter.get_lineage(table_id, direction, depth).await
    }

    /// Removes every cached response whose key matches `pattern`.
    pub async fn invalidate(&self, pattern: &str) -> usize {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let removed = self.cache.invalidate(pattern).await;
        info!(pattern, removed, "service: cache invalidated");
        removed
    }

    /// Drops the datasets of one datasource plus every cached datasource listing.
    pub async fn invalidate_datasource(&self, datasource_id: &str) -> usize {
        self.invalidate(&format!("datasets:{datasource_id}*")).await
            + self.invalidate("datasources*").await
    }

    pub async fn invalidate_dataset(&self, dataset_id: &str) -> usize {
        self.invalidate(&format!("tables:{dataset_id}*")).await
    }

    async fn read_through<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        flight: &SingleFlight<T>,
        fetch: F,
    ) -> CatalogResult<T>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = CatalogResult<T>> + Send + 'static,
    {
        if let Some(value) = cached::<T>(&self.cache, key).await {
            debug!(key, "service: cache hit");
            return Ok(value);
        }
        debug!(key, "service: cache miss");

        let cache = self.cache.clone();
        let generation = Arc::clone(&self.generation);
        let store_key = key.to_string();
        flight
            .run(key, move || {
                let started = generation.load(Ordering::SeqCst);
                async move {
                    // A previous leader may have stored the value after our first lookup.
                    if let Some(value) = cached::<T>(&cache, &store_key).await {
                        debug!(key = %store_key, "service: filled while joining");
                        return Ok(value);
                    }

                    let value = fetch().await?;
                    if generation.load(Ordering::SeqCst) != started {
                        debug!(key = %store_key, "service: invalidated during fetch, not caching");
                        return Ok(value);
                    }
                    match serde_json::to_vec(&value) {
                        Ok(payload) => {
                            cache.set(&store_key, payload, ttl).await;
                            // An invalidation racing the write above must still win.
                            if generation.load(Ordering::SeqCst) != started {
                                cache.remove(&store_key).await;
                            }
                        }
                        Err(err) => warn!(key = %store_key, %err, "service: payload not cacheable"),
                    }
                    Ok(value)
                }
            })
            .await
    }
}

async fn cached<T: DeserializeOwned>(cache: &CacheStore, key: &str) -> Option<T> {
    let payload = cache.get(key).await?;
    match serde_json::from_slice(&payload) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(key, %err, "service: cached payload unreadable, refetching");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unfiltered_keys_are_plain() {
        assert_eq!(datasources_key(None), "datasources");
        assert_eq!(datasources_key(Some("  ")), "datasources");
        assert_eq!(datasets_key("ds-abc123"), "datasets:ds-abc123");
        assert_eq!(tables_key("dset-x", None, Some("")), "tables:dset-x");
        assert_eq!(columns_key("tbl-y"), "columns:tbl-y");
    }

    #[test]
    fn filter_digest_normalizes_values() {
        assert_eq!(
            datasources_key(Some("Postgres")),
            datasources_key(Some("  postgres "))
        );
        assert_ne!(datasources_key(Some("postgres")), datasources_key(Some("mysql")));

        let key = tables_key("dset-x", Some("View"), None);
        let digest = key.strip_prefix("tables:dset-x:").unwrap();
        assert_eq!(digest.len(), 16);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn filter_names_are_part_of_the_digest() {
        assert_ne!(
            tables_key("dset-x", Some("orders"), None),
            tables_key("dset-x", None, Some("orders"))
        );
    }

    #[test]
    fn ids_are_never_case_folded() {
        assert_ne!(datasets_key("ds-ABC"), datasets_key("ds-abc"));
    }
}
