//! Catalog adapters.
//!
//! A [`CatalogAdapter`] implements the catalog read operations against one
//! upstream provider. It is the only component that talks to the provider and
//! the only one that classifies failures into [`crate::ErrorKind`]. Everything it
//! returns is normalized: DTOs from [`crate::types`], every identifier produced
//! by [`crate::IdCodec`].
//!
//! Providers are selected at construction time and handed around as
//! `Arc<dyn CatalogAdapter>`.

mod memory;
mod openmetadata;

pub use memory::{
    CatalogSnapshot, InMemoryAdapter, SnapshotColumn, SnapshotDatabase, SnapshotLineageEdge,
    SnapshotSchema, SnapshotService, SnapshotTable,
};
pub use openmetadata::{classify_status, OpenMetadataAdapter};

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{CatalogError, CatalogResult};
use crate::types::{
    CatalogSearchHit, ColumnSummary, DatasetSummary, DatasourceSummary, LineageDirection,
    LineageGraph, TableDetail, TableSummary,
};

/// Default number of search hits when the caller gives no limit.
pub const DEFAULT_SEARCH_LIMIT: usize = 25;
/// Upper bound for search limits.
pub const MAX_SEARCH_LIMIT: usize = 100;

/// Static adapter settings, fixed at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterConfig {
    /// Budget for each upstream call.
    pub request_timeout: Duration,
    /// Page size for paginated upstream listings.
    pub page_size: usize,
    /// Lineage depth requests are clamped to this value.
    pub max_lineage_depth: u32,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            page_size: 100,
            max_lineage_depth: 5,
        }
    }
}

/// The catalog read operations, against one upstream provider.
#[async_trait]
pub trait CatalogAdapter: Send + Sync {
    /// Datasources ordered by name, optionally filtered by provider type.
    async fn list_datasources(&self, kind: Option<&str>) -> CatalogResult<Vec<DatasourceSummary>>;

    async fn list_datasets(&self, datasource_id: &str) -> CatalogResult<Vec<DatasetSummary>>;

    async fn list_tables(
        &self,
        dataset_id: &str,
        table_type: Option<&str>,
        search: Option<&str>,
    ) -> CatalogResult<Vec<TableSummary>>;

    /// Table detail. `lineage` is always left empty; use [`Self::get_lineage`].
    async fn get_table(&self, table_id: &str) -> CatalogResult<TableDetail>;

    async fn list_columns(&self, table_id: &str) -> CatalogResult<Vec<ColumnSummary>>;

    /// Ranked hits in provider relevance order.
    async fn search(
        &self,
        query: &str,
        type_filter: Option<&str>,
        limit: Option<usize>,
    ) -> CatalogResult<Vec<CatalogSearchHit>>;

    /// Lineage around a table. Depth 0 yields the root node alone.
    async fn get_lineage(
        &self,
        table_id: &str,
        direction: LineageDirection,
        depth: u32,
    ) -> CatalogResult<LineageGraph>;
}

/// Validated search arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchArgs {
    pub query: String,
    pub type_filter: Option<String>,
    pub limit: usize,
}

/// Trims the query, clamps the limit to `[1, MAX_SEARCH_LIMIT]` and normalizes the filter.
pub fn validate_search(
    query: &str,
    type_filter: Option<&str>,
    limit: Option<usize>,
) -> CatalogResult<SearchArgs> {
    let query = query.trim();
    if query.is_empty() {
        return Err(CatalogError::invalid_argument(
            "search query must not be empty",
        ));
    }
    Ok(SearchArgs {
        query: query.to_string(),
        type_filter: normalize_filter(type_filter),
        limit: limit
            .unwrap_or(DEFAULT_SEARCH_LIMIT)
            .clamp(1, MAX_SEARCH_LIMIT),
    })
}

/// Trimmed, lower-cased filter value; blank filters count as absent.
pub fn normalize_filter(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_lowercase)
}

/// Orders datasources by case-insensitive name, then by id for stability.
pub fn sort_datasources(datasources: &mut [DatasourceSummary]) {
    datasources.sort_by(|a, b| {
        a.name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Whether a hit of entity type `kind` passes a normalized search type filter.
///
/// Filters accept the facade vocabulary (`dataset`, `datasource`) as well as the
/// upstream entity names.
pub(crate) fn search_kind_matches(filter: Option<&str>, kind: &str) -> bool {
    match filter {
        None => true,
        Some("table") => kind == "table",
        Some("dataset") | Some("databaseschema") | Some("schema") => kind == "databaseSchema",
        Some("database") => kind == "database",
        Some("datasource") | Some("databaseservice") | Some("service") => {
            kind == "databaseService"
        }
        Some(other) => kind.eq_ignore_ascii_case(other),
    }
}

/// Case-insensitive substring match of `needle` (already lower-cased) in any haystack.
pub(crate) fn matches_text(needle: &str, haystacks: &[Option<&str>]) -> bool {
    haystacks
        .iter()
        .flatten()
        .any(|h| h.to_lowercase().contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn search_limit_is_clamped() {
        assert_eq!(validate_search("x", None, None).unwrap().limit, 25);
        assert_eq!(validate_search("x", None, Some(0)).unwrap().limit, 1);
        assert_eq!(validate_search("x", None, Some(500)).unwrap().limit, 100);
    }

    #[test]
    fn blank_query_is_invalid_argument() {
        let err = validate_search("   \t", None, None).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
    }

    #[test]
    fn filters_are_trimmed_and_lowered() {
        let args = validate_search("  revenue ", Some(" Table "), None).unwrap();
        assert_eq!(args.query, "revenue");
        assert_eq!(args.type_filter.as_deref(), Some("table"));
        assert_eq!(normalize_filter(Some("   ")), None);
    }

    #[test]
    fn datasources_sort_by_name_case_insensitively() {
        let mk = |id: &str, name: &str| DatasourceSummary {
            id: id.to_string(),
            name: name.to_string(),
            kind: "Postgres".to_string(),
            connector_id: id.to_string(),
            description: None,
            location: None,
            tags: vec![],
        };
        let mut list = vec![mk("3", "beta"), mk("2", "Alpha"), mk("1", "alpha")];
        sort_datasources(&mut list);
        let ids: Vec<_> = list.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }
}
