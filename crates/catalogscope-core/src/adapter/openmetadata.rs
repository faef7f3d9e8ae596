//! OpenMetadata-backed catalog adapter.
//!
//! Maps the OpenMetadata REST API onto the facade's DTOs:
//!
//! | Facade | OpenMetadata |
//! |--------|--------------|
//! | datasource | database service (`service`) |
//! | dataset | database schema (`service.database.schema`) |
//! | table | table (`service.database.schema.table`) |
//! | column | table column |
//!
//! Listing endpoints are paginated with an `after` cursor. Pages are walked to
//! the end before anything is returned, and a failure on any page fails the
//! whole operation.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{
    matches_text, normalize_filter, search_kind_matches, sort_datasources, validate_search,
    AdapterConfig, CatalogAdapter,
};
use crate::codec::{EntityKind, IdCodec};
use crate::error::{CatalogError, CatalogResult};
use crate::fqn;
use crate::transport::{Transport, TransportError, UpstreamResponse};
use crate::types::{
    CatalogSearchHit, ColumnDetail, ColumnSummary, DatasetSummary, DatasourceSummary,
    LineageDirection, LineageEdge, LineageGraph, LineageNode, TableDetail, TableSummary,
};

const SERVICES_PATH: &str = "/v1/services/databaseServices";
const DATABASES_PATH: &str = "/v1/databases";
const SCHEMAS_PATH: &str = "/v1/databaseSchemas";
const TABLES_PATH: &str = "/v1/tables";
const SEARCH_PATH: &str = "/v1/search/query";
const LINEAGE_PATH: &str = "/v1/lineage/table/name";

const TABLE_LIST_FIELDS: &str = "columns,owners,profile";
const TABLE_DETAIL_FIELDS: &str = "columns,owners,tags,tableConstraints,profile";

// === Wire types ===

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
    #[serde(default)]
    paging: Option<Paging>,
}

#[derive(Debug, Default, Deserialize)]
struct Paging {
    #[serde(default)]
    after: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntityRef {
    #[serde(default)]
    id: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    fully_qualified_name: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TagLabel {
    #[serde(rename = "tagFQN")]
    tag_fqn: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireService {
    id: String,
    name: String,
    #[serde(default)]
    fully_qualified_name: Option<String>,
    service_type: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    tags: Vec<TagLabel>,
    #[serde(default)]
    connection: Option<WireConnection>,
}

#[derive(Debug, Deserialize)]
struct WireConnection {
    #[serde(default)]
    config: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireDatabase {
    name: String,
    #[serde(default)]
    fully_qualified_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSchema {
    name: String,
    fully_qualified_name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    service: Option<EntityRef>,
    #[serde(default)]
    tables: Option<Vec<EntityRef>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTable {
    name: String,
    fully_qualified_name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    table_type: Option<String>,
    #[serde(default)]
    columns: Vec<WireColumn>,
    #[serde(default)]
    owners: Vec<EntityRef>,
    #[serde(default)]
    table_constraints: Vec<WireConstraint>,
    #[serde(default)]
    profile: Option<WireProfile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireColumn {
    name: String,
    #[serde(default)]
    data_type: Option<String>,
    #[serde(default)]
    data_type_display: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    constraint: Option<String>,
    #[serde(default)]
    fully_qualified_name: Option<String>,
    #[serde(default)]
    tags: Vec<TagLabel>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireConstraint {
    #[serde(default)]
    constraint_type: Option<String>,
    #[serde(default)]
    columns: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireProfile {
    #[serde(default)]
    row_count: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WireSearchResponse {
    hits: WireHits,
}

#[derive(Debug, Deserialize)]
struct WireHits {
    #[serde(default)]
    hits: Vec<WireHit>,
}

#[derive(Debug, Deserialize)]
struct WireHit {
    #[serde(default, rename = "_score")]
    score: Option<f64>,
    #[serde(rename = "_source")]
    source: WireSearchSource,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSearchSource {
    name: String,
    fully_qualified_name: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    entity_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireLineage {
    entity: EntityRef,
    #[serde(default)]
    nodes: Vec<EntityRef>,
    #[serde(default)]
    upstream_edges: Vec<WireEdge>,
    #[serde(default)]
    downstream_edges: Vec<WireEdge>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEdge {
    from_entity: String,
    to_entity: String,
}

// === Classification ===

/// Classifies a non-success upstream response.
pub fn classify_status(response: &UpstreamResponse) -> CatalogError {
    let detail = response.body_snippet();
    let err = match response.status {
        401 | 403 => CatalogError::auth(format!(
            "upstream rejected credentials ({}): {detail}",
            response.status
        )),
        404 => CatalogError::not_found(format!("upstream entity not found: {detail}")),
        408 | 504 => CatalogError::timeout(format!(
            "upstream timed out ({}): {detail}",
            response.status
        )),
        status => CatalogError::upstream(format!("upstream returned {status}: {detail}")),
    };
    err.with_request_id(response.request_id.clone())
}

fn classify_transport(err: TransportError) -> CatalogError {
    match err {
        TransportError::Timeout => CatalogError::timeout("upstream request timed out"),
        TransportError::Connect(reason) => {
            CatalogError::upstream(format!("upstream unreachable: {reason}"))
        }
    }
}

fn encode_path(fqn: &str) -> String {
    urlencoding::encode(fqn).into_owned()
}

/// Catalog adapter speaking the OpenMetadata REST API over a [`Transport`].
pub struct OpenMetadataAdapter<T> {
    transport: T,
    config: AdapterConfig,
}

impl<T: Transport> OpenMetadataAdapter<T> {
    pub fn new(transport: T, config: AdapterConfig) -> Self {
        Self { transport, config }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// One upstream call under the request timeout, with status classification.
    async fn fetch(&self, path: &str, query: &[(&str, String)]) -> CatalogResult<UpstreamResponse> {
        let call = self.transport.get(path, query);
        let response = match tokio::time::timeout(self.config.request_timeout, call).await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => return Err(classify_transport(err)),
            Err(_) => {
                return Err(CatalogError::timeout(format!(
                    "upstream did not respond within {:?}",
                    self.config.request_timeout
                )))
            }
        };

        if !response.is_success() {
            return Err(classify_status(&response));
        }
        Ok(response)
    }

    async fn fetch_json<D: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> CatalogResult<D> {
        let response = self.fetch(path, query).await?;
        serde_json::from_slice(&response.body).map_err(|e| {
            CatalogError::upstream(format!("malformed upstream response from {path}: {e}"))
                .with_request_id(response.request_id.clone())
        })
    }

    /// Walks every page of a listing. Any page failure fails the whole walk.
    async fn fetch_all<D: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> CatalogResult<Vec<D>> {
        let mut items = Vec::new();
        let mut seen_cursors = HashSet::new();
        let mut after: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let mut page_query: Vec<(&str, String)> = query.to_vec();
            page_query.push(("limit", self.config.page_size.to_string()));
            if let Some(cursor) = &after {
                page_query.push(("after", cursor.clone()));
            }

            let page: Page<D> = self.fetch_json(path, &page_query).await?;
            pages += 1;
            items.extend(page.data);

            match page.paging.and_then(|p| p.after).filter(|c| !c.is_empty()) {
                Some(cursor) => {
                    if !seen_cursors.insert(cursor.clone()) {
                        return Err(CatalogError::upstream(format!(
                            "upstream pagination for {path} repeated cursor '{cursor}'"
                        )));
                    }
                    after = Some(cursor);
                }
                None => break,
            }
        }

        debug!(path, pages, items = items.len(), "openmetadata: listing complete");
        Ok(items)
    }

    async fn fetch_table(&self, table_fqn: &str, fields: &str) -> CatalogResult<WireTable> {
        let path = format!("{TABLES_PATH}/name/{}", encode_path(table_fqn));
        self.fetch_json(&path, &[("fields", fields.to_string())]).await
    }

    fn datasource_summary(service: WireService) -> DatasourceSummary {
        let service_fqn = service
            .fully_qualified_name
            .unwrap_or_else(|| fqn::quote(&service.name));
        let location = service
            .connection
            .and_then(|c| c.config)
            .and_then(|config| {
                config
                    .get("hostPort")
                    .or_else(|| config.get("host"))
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
            });

        DatasourceSummary {
            id: IdCodec::encode(&service_fqn),
            name: service.name,
            kind: service.service_type,
            connector_id: service.id,
            description: service.description.filter(|d| !d.is_empty()),
            location,
            tags: service.tags.into_iter().map(|t| t.tag_fqn).collect(),
        }
    }

    /// Builds a table detail, or `None` if the upstream name is not a table-level name.
    fn table_detail(table: WireTable) -> Option<TableDetail> {
        let table_fqn = table.fully_qualified_name;
        if fqn::segment_count(&table_fqn) != 4 {
            warn!(fqn = %table_fqn, "openmetadata: dropping table with unexpected name depth");
            return None;
        }
        let dataset_fqn = fqn::ancestor(&table_fqn, 3)?;
        let service_fqn = fqn::ancestor(&table_fqn, 1)?;

        let primary_keys: HashSet<&str> = table
            .table_constraints
            .iter()
            .filter(|c| c.constraint_type.as_deref() == Some("PRIMARY_KEY"))
            .flat_map(|c| c.columns.iter().map(String::as_str))
            .collect();

        let columns = table
            .columns
            .iter()
            .map(|column| {
                let is_primary_key = column.constraint.as_deref() == Some("PRIMARY_KEY")
                    || primary_keys.contains(column.name.as_str());
                let column_fqn = column
                    .fully_qualified_name
                    .clone()
                    .unwrap_or_else(|| fqn::child(&table_fqn, &column.name));
                ColumnDetail {
                    id: IdCodec::encode(&column_fqn),
                    name: column.name.clone(),
                    datatype: column
                        .data_type_display
                        .clone()
                        .or_else(|| column.data_type.clone())
                        .unwrap_or_else(|| "UNKNOWN".to_string()),
                    description: column.description.clone().filter(|d| !d.is_empty()),
                    is_nullable: !is_primary_key
                        && column.constraint.as_deref() != Some("NOT_NULL"),
                    is_primary_key,
                    tags: column.tags.iter().map(|t| t.tag_fqn.clone()).collect(),
                }
            })
            .collect();

        let owner = table
            .owners
            .first()
            .and_then(|o| o.display_name.clone().or_else(|| o.name.clone()));

        Some(TableDetail {
            id: IdCodec::encode(&table_fqn),
            name: table.name,
            dataset_id: IdCodec::encode(&dataset_fqn),
            datasource_id: IdCodec::encode(&service_fqn),
            kind: table.table_type.unwrap_or_else(|| "Regular".to_string()),
            rows: table
                .profile
                .and_then(|p| p.row_count)
                .filter(|r| r.is_finite() && *r >= 0.0)
                .map(|r| r as u64),
            owner,
            description: table.description.filter(|d| !d.is_empty()),
            columns,
            fully_qualified_name: table_fqn,
            lineage: None,
        })
    }

    fn search_index(type_filter: Option<&str>) -> &'static str {
        match type_filter {
            Some("table") => "table_search_index",
            Some("dataset") | Some("databaseschema") | Some("schema") => {
                "database_schema_search_index"
            }
            Some("database") => "database_search_index",
            Some("datasource") | Some("databaseservice") | Some("service") => {
                "database_service_search_index"
            }
            _ => "all",
        }
    }

    /// Entity type implied by FQN depth, for hits that omit `entityType`.
    fn kind_for_depth(depth: usize) -> &'static str {
        match depth {
            1 => "databaseService",
            2 => "database",
            3 => "databaseSchema",
            4 => "table",
            _ => "unknown",
        }
    }

    fn lineage_node(entity: &EntityRef) -> Option<(String, LineageNode)> {
        let upstream_id = entity.id.clone()?;
        let node_fqn = entity.fully_qualified_name.clone()?;
        let node = LineageNode {
            id: IdCodec::encode(&node_fqn),
            name: entity
                .display_name
                .clone()
                .or_else(|| entity.name.clone())
                .unwrap_or_else(|| fqn::leaf_name(&node_fqn)),
            fully_qualified_name: node_fqn,
            kind: entity.kind.clone().unwrap_or_else(|| "table".to_string()),
        };
        Some((upstream_id, node))
    }
}

#[async_trait]
impl<T: Transport> CatalogAdapter for OpenMetadataAdapter<T> {
    async fn list_datasources(&self, kind: Option<&str>) -> CatalogResult<Vec<DatasourceSummary>> {
        let kind = normalize_filter(kind);
        let services: Vec<WireService> = self
            .fetch_all(SERVICES_PATH, &[("fields", "tags".to_string())])
            .await?;

        let mut datasources: Vec<_> = services
            .into_iter()
            .filter(|s| {
                kind.as_deref()
                    .map_or(true, |k| s.service_type.to_lowercase() == k)
            })
            .map(Self::datasource_summary)
            .collect();
        sort_datasources(&mut datasources);
        Ok(datasources)
    }

    async fn list_datasets(&self, datasource_id: &str) -> CatalogResult<Vec<DatasetSummary>> {
        let service_fqn = IdCodec::decode_kind(datasource_id, EntityKind::Datasource)?;
        let service_path = format!("{SERVICES_PATH}/name/{}", encode_path(&service_fqn));
        let _service: WireService = self.fetch_json(&service_path, &[]).await?;
        let service_name = fqn::leaf_name(&service_fqn);

        let databases: Vec<WireDatabase> = self
            .fetch_all(DATABASES_PATH, &[("service", service_fqn.clone())])
            .await?;

        let mut datasets = Vec::new();
        for database in databases {
            let database_fqn = database
                .fully_qualified_name
                .unwrap_or_else(|| fqn::child(&service_fqn, &database.name));
            let schemas: Vec<WireSchema> = self
                .fetch_all(
                    SCHEMAS_PATH,
                    &[("database", database_fqn), ("fields", "tables".to_string())],
                )
                .await?;

            for schema in schemas {
                let owned_by_service = schema.service.as_ref().is_some_and(|svc| {
                    svc.fully_qualified_name.as_deref() == Some(service_fqn.as_str())
                        || svc.name.as_deref() == Some(service_name.as_str())
                });
                let schema_service = fqn::ancestor(&schema.fully_qualified_name, 1);
                if !owned_by_service
                    || schema_service.as_deref() != Some(service_fqn.as_str())
                    || fqn::segment_count(&schema.fully_qualified_name) != 3
                {
                    warn!(
                        schema = %schema.fully_qualified_name,
                        datasource = %service_fqn,
                        "openmetadata: dropping orphaned dataset"
                    );
                    continue;
                }

                datasets.push(DatasetSummary {
                    id: IdCodec::encode(&schema.fully_qualified_name),
                    name: schema.name,
                    datasource_id: IdCodec::encode(&service_fqn),
                    qualified_name: schema.fully_qualified_name,
                    description: schema.description.filter(|d| !d.is_empty()),
                    table_count: schema.tables.map(|t| t.len()),
                    // Schemas carry no profiling timestamp upstream; `updatedAt` is an edit time.
                    last_profiled_at: None,
                });
            }
        }

        datasets.sort_by(|a, b| a.qualified_name.cmp(&b.qualified_name));
        Ok(datasets)
    }

    async fn list_tables(
        &self,
        dataset_id: &str,
        table_type: Option<&str>,
        search: Option<&str>,
    ) -> CatalogResult<Vec<TableSummary>> {
        let schema_fqn = IdCodec::decode_kind(dataset_id, EntityKind::Dataset)?;
        let schema_path = format!("{SCHEMAS_PATH}/name/{}", encode_path(&schema_fqn));
        let _schema: WireSchema = self.fetch_json(&schema_path, &[]).await?;

        let tables: Vec<WireTable> = self
            .fetch_all(
                TABLES_PATH,
                &[
                    ("databaseSchema", schema_fqn),
                    ("fields", TABLE_LIST_FIELDS.to_string()),
                ],
            )
            .await?;

        let table_type = normalize_filter(table_type);
        let search = normalize_filter(search);

        Ok(tables
            .into_iter()
            .filter(|t| {
                table_type.as_deref().map_or(true, |ty| {
                    t.table_type.as_deref().unwrap_or("regular").to_lowercase() == ty
                })
            })
            .filter(|t| {
                search.as_deref().map_or(true, |needle| {
                    matches_text(
                        needle,
                        &[
                            Some(t.name.as_str()),
                            t.display_name.as_deref(),
                            t.description.as_deref(),
                        ],
                    )
                })
            })
            .filter_map(Self::table_detail)
            .map(|detail| detail.summary())
            .collect())
    }

    async fn get_table(&self, table_id: &str) -> CatalogResult<TableDetail> {
        let table_fqn = IdCodec::decode_kind(table_id, EntityKind::Table)?;
        let table = self.fetch_table(&table_fqn, TABLE_DETAIL_FIELDS).await?;
        Self::table_detail(table).ok_or_else(|| {
            CatalogError::upstream(format!("upstream returned a malformed table for '{table_fqn}'"))
        })
    }

    async fn list_columns(&self, table_id: &str) -> CatalogResult<Vec<ColumnSummary>> {
        let table_fqn = IdCodec::decode_kind(table_id, EntityKind::Table)?;
        let table = self
            .fetch_table(&table_fqn, "columns,tableConstraints")
            .await?;
        Self::table_detail(table)
            .map(|detail| detail.columns)
            .ok_or_else(|| {
                CatalogError::upstream(format!(
                    "upstream returned a malformed table for '{table_fqn}'"
                ))
            })
    }

    async fn search(
        &self,
        query: &str,
        type_filter: Option<&str>,
        limit: Option<usize>,
    ) -> CatalogResult<Vec<CatalogSearchHit>> {
        let args = validate_search(query, type_filter, limit)?;
        let index = Self::search_index(args.type_filter.as_deref());
        let response: WireSearchResponse = self
            .fetch_json(
                SEARCH_PATH,
                &[
                    ("q", args.query.clone()),
                    ("index", index.to_string()),
                    ("from", "0".to_string()),
                    ("size", args.limit.to_string()),
                ],
            )
            .await?;

        // The "all" index returns every entity type, so the filter is applied to
        // the hits as well. Upstream relevance order is kept.
        Ok(response
            .hits
            .hits
            .into_iter()
            .map(|hit| {
                let source = hit.source;
                let hit_fqn = source.fully_qualified_name;
                let depth = fqn::segment_count(&hit_fqn);
                let kind = source
                    .entity_type
                    .unwrap_or_else(|| Self::kind_for_depth(depth).to_string());
                CatalogSearchHit {
                    id: IdCodec::encode(&hit_fqn),
                    kind,
                    display_name: source.display_name.unwrap_or_else(|| source.name.clone()),
                    name: source.name,
                    datasource_id: (depth >= 2)
                        .then(|| fqn::ancestor(&hit_fqn, 1))
                        .flatten()
                        .map(|f| IdCodec::encode(&f)),
                    dataset_id: (depth >= 4)
                        .then(|| fqn::ancestor(&hit_fqn, 3))
                        .flatten()
                        .map(|f| IdCodec::encode(&f)),
                    path: fqn::split_fqn(&hit_fqn)
                        .iter()
                        .map(|s| fqn::unquote(s))
                        .collect(),
                    relevance: hit.score.unwrap_or(0.0),
                }
            })
            .filter(|hit| search_kind_matches(args.type_filter.as_deref(), &hit.kind))
            .take(args.limit)
            .collect())
    }

    async fn get_lineage(
        &self,
        table_id: &str,
        direction: LineageDirection,
        depth: u32,
    ) -> CatalogResult<LineageGraph> {
        let table_fqn = IdCodec::decode_kind(table_id, EntityKind::Table)?;
        let depth = depth.min(self.config.max_lineage_depth);
        let upstream_depth = if direction.includes_upstream() { depth } else { 0 };
        let downstream_depth = if direction.includes_downstream() { depth } else { 0 };

        let path = format!("{LINEAGE_PATH}/{}", encode_path(&table_fqn));
        let lineage: WireLineage = self
            .fetch_json(
                &path,
                &[
                    ("upstreamDepth", upstream_depth.to_string()),
                    ("downstreamDepth", downstream_depth.to_string()),
                ],
            )
            .await?;

        let (root_upstream_id, root) = Self::lineage_node(&lineage.entity).ok_or_else(|| {
            CatalogError::upstream(format!("upstream lineage for '{table_fqn}' has no root entity"))
        })?;

        let mut graph = LineageGraph {
            nodes: vec![root.clone()],
            edges: Vec::new(),
        };
        if depth == 0 {
            return Ok(graph);
        }

        let mut by_upstream_id: HashMap<String, LineageNode> = HashMap::new();
        by_upstream_id.insert(root_upstream_id, root.clone());
        for entity in &lineage.nodes {
            match Self::lineage_node(entity) {
                Some((upstream_id, node)) => {
                    by_upstream_id.entry(upstream_id).or_insert(node);
                }
                None => warn!(fqn = %table_fqn, "openmetadata: lineage node without id or name"),
            }
        }

        let mut wire_edges: Vec<&WireEdge> = Vec::new();
        if direction.includes_upstream() {
            wire_edges.extend(&lineage.upstream_edges);
        }
        if direction.includes_downstream() {
            wire_edges.extend(&lineage.downstream_edges);
        }

        let mut seen_edges = HashSet::new();
        let mut seen_nodes: HashSet<String> = HashSet::from([root.id.clone()]);
        for edge in wire_edges {
            let (Some(from), Some(to)) = (
                by_upstream_id.get(&edge.from_entity),
                by_upstream_id.get(&edge.to_entity),
            ) else {
                warn!(
                    from = %edge.from_entity,
                    to = %edge.to_entity,
                    "openmetadata: dropping lineage edge with unknown endpoint"
                );
                continue;
            };

            let facade_edge = LineageEdge {
                from: from.id.clone(),
                to: to.id.clone(),
            };
            if !seen_edges.insert(facade_edge.clone()) {
                continue;
            }
            for node in [from, to] {
                if seen_nodes.insert(node.id.clone()) {
                    graph.nodes.push(node.clone());
                }
            }
            graph.edges.push(facade_edge);
        }

        Ok(graph)
    }
}
