#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use catalogscope_core::{
    CacheBackend, CacheEntry, CacheError, CatalogAdapter, CatalogError, CatalogResult,
    CatalogSearchHit, ColumnSummary, DatasetSummary, DatasourceSummary, KeyPattern,
    LineageDirection, LineageGraph, LineageNode, MemoryCacheBackend, TableDetail, TableSummary,
    Transport, TransportError, UpstreamResponse,
};

/// Adapter double that counts calls per operation and can delay or fail them.
#[derive(Default)]
pub struct CountingAdapter {
    pub calls: Mutex<HashMap<&'static str, usize>>,
    pub delay: Option<Duration>,
    pub fail_with: Option<CatalogError>,
    pub in_flight: AtomicUsize,
}

impl CountingAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn failing(err: CatalogError) -> Self {
        Self {
            fail_with: Some(err),
            ..Self::default()
        }
    }

    pub fn count(&self, op: &str) -> usize {
        self.calls.lock().unwrap().get(op).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    async fn enter(&self, op: &'static str) -> CatalogResult<()> {
        *self.calls.lock().unwrap().entry(op).or_default() += 1;
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        match &self.fail_with {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

pub fn datasource(id: &str, name: &str) -> DatasourceSummary {
    DatasourceSummary {
        id: id.to_string(),
        name: name.to_string(),
        kind: "Postgres".to_string(),
        connector_id: name.to_string(),
        description: None,
        location: None,
        tags: vec![],
    }
}

pub fn dataset(id: &str, datasource_id: &str) -> DatasetSummary {
    DatasetSummary {
        id: id.to_string(),
        name: "public".to_string(),
        datasource_id: datasource_id.to_string(),
        qualified_name: "svc.db.public".to_string(),
        description: None,
        table_count: Some(1),
        last_profiled_at: None,
    }
}

pub fn table(id: &str) -> TableDetail {
    TableDetail {
        id: id.to_string(),
        name: "orders".to_string(),
        dataset_id: "dset-1".to_string(),
        datasource_id: "ds-1".to_string(),
        kind: "Regular".to_string(),
        rows: Some(3),
        owner: None,
        description: None,
        columns: vec![],
        fully_qualified_name: "svc.db.public.orders".to_string(),
        lineage: None,
    }
}

#[async_trait]
impl CatalogAdapter for CountingAdapter {
    async fn list_datasources(&self, _kind: Option<&str>) -> CatalogResult<Vec<DatasourceSummary>> {
        self.enter("list_datasources").await?;
        Ok(vec![datasource("ds-1", "analytics"), datasource("ds-2", "warehouse")])
    }

    async fn list_datasets(&self, datasource_id: &str) -> CatalogResult<Vec<DatasetSummary>> {
        self.enter("list_datasets").await?;
        Ok(vec![dataset("dset-1", datasource_id)])
    }

    async fn list_tables(
        &self,
        dataset_id: &str,
        _table_type: Option<&str>,
        _search: Option<&str>,
    ) -> CatalogResult<Vec<TableSummary>> {
        self.enter("list_tables").await?;
        let mut detail = table("tbl-1");
        detail.dataset_id = dataset_id.to_string();
        Ok(vec![detail.summary()])
    }

    async fn get_table(&self, table_id: &str) -> CatalogResult<TableDetail> {
        self.enter("get_table").await?;
        Ok(table(table_id))
    }

    async fn list_columns(&self, _table_id: &str) -> CatalogResult<Vec<ColumnSummary>> {
        self.enter("list_columns").await?;
        Ok(vec![ColumnSummary {
            id: "col-1".to_string(),
            name: "id".to_string(),
            datatype: "INT".to_string(),
            description: None,
            is_nullable: false,
            is_primary_key: true,
            tags: vec![],
        }])
    }

    async fn search(
        &self,
        query: &str,
        _type_filter: Option<&str>,
        _limit: Option<usize>,
    ) -> CatalogResult<Vec<CatalogSearchHit>> {
        self.enter("search").await?;
        Ok(vec![CatalogSearchHit {
            id: "tbl-1".to_string(),
            kind: "table".to_string(),
            name: query.to_string(),
            display_name: query.to_string(),
            datasource_id: None,
            dataset_id: None,
            path: vec![],
            relevance: 1.0,
        }])
    }

    async fn get_lineage(
        &self,
        table_id: &str,
        _direction: LineageDirection,
        _depth: u32,
    ) -> CatalogResult<LineageGraph> {
        self.enter("get_lineage").await?;
        Ok(LineageGraph {
            nodes: vec![LineageNode {
                id: table_id.to_string(),
                name: "orders".to_string(),
                fully_qualified_name: "svc.db.public.orders".to_string(),
                kind: "table".to_string(),
            }],
            edges: vec![],
        })
    }
}

/// Cache backend that fails every operation.
pub struct BrokenBackend;

#[async_trait]
impl CacheBackend for BrokenBackend {
    async fn get(&self, _key: &str) -> Result<Option<CacheEntry>, CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }

    async fn set(&self, _entry: CacheEntry) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }

    async fn remove(&self, _key: &str) -> Result<bool, CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }

    async fn invalidate(&self, _pattern: &KeyPattern) -> Result<usize, CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }
}

/// Memory backend whose first lookup misses regardless of content, as if the
/// entry landed just after the read.
#[derive(Default)]
pub struct LateFillBackend {
    pub inner: MemoryCacheBackend,
    missed: AtomicBool,
}

#[async_trait]
impl CacheBackend for LateFillBackend {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        if !self.missed.swap(true, Ordering::SeqCst) {
            return Ok(None);
        }
        self.inner.get(key).await
    }

    async fn set(&self, entry: CacheEntry) -> Result<(), CacheError> {
        self.inner.set(entry).await
    }

    async fn remove(&self, key: &str) -> Result<bool, CacheError> {
        self.inner.remove(key).await
    }

    async fn invalidate(&self, pattern: &KeyPattern) -> Result<usize, CacheError> {
        self.inner.invalidate(pattern).await
    }
}

type Handler = Box<dyn Fn(&[(&str, String)]) -> Result<UpstreamResponse, TransportError> + Send + Sync>;

/// Transport double routing by path, recording every request.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Vec<(String, Handler)>,
    pub requests: Mutex<Vec<(String, Vec<(String, String)>)>>,
    pub delay: Option<Duration>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers `path` with a fixed status and JSON body.
    pub fn json(self, path: &str, status: u16, body: serde_json::Value) -> Self {
        let body = body.to_string();
        self.route(path, move |_| Ok(UpstreamResponse::new(status, body.clone())))
    }

    pub fn route<F>(mut self, path: &str, handler: F) -> Self
    where
        F: Fn(&[(&str, String)]) -> Result<UpstreamResponse, TransportError> + Send + Sync + 'static,
    {
        self.routes.push((path.to_string(), Box::new(handler)));
        self
    }

    pub fn request_count(&self, path: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == path)
            .count()
    }
}

pub fn query_value<'a>(query: &'a [(&str, String)], name: &str) -> Option<&'a str> {
    query
        .iter()
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.as_str())
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<UpstreamResponse, TransportError> {
        self.requests.lock().unwrap().push((
            path.to_string(),
            query
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        ));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.routes.iter().find(|(p, _)| p == path) {
            Some((_, handler)) => handler(query),
            None => Ok(UpstreamResponse::new(404, format!("no route for {path}"))),
        }
    }
}

pub fn shared<A: CatalogAdapter + 'static>(adapter: A) -> (Arc<A>, Arc<dyn CatalogAdapter>) {
    let adapter = Arc::new(adapter);
    let dyn_adapter: Arc<dyn CatalogAdapter> = adapter.clone();
    (adapter, dyn_adapter)
}
