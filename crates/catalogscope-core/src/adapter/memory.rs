//! Catalog adapter over an in-memory catalog snapshot.
//!
//! A snapshot is a JSON document describing services, databases, schemas, tables,
//! columns and table-level lineage edges. The adapter serves it through the same
//! contract as a live provider, which makes it useful both offline and as a
//! deterministic provider in tests.

use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{
    matches_text, normalize_filter, search_kind_matches, sort_datasources, validate_search,
    AdapterConfig, CatalogAdapter,
};
use crate::codec::{EntityKind, IdCodec};
use crate::error::{CatalogError, CatalogResult};
use crate::fqn;
use crate::types::{
    CatalogSearchHit, ColumnSummary, DatasetSummary, DatasourceSummary, LineageDirection,
    LineageEdge, LineageGraph, LineageNode, TableDetail, TableSummary,
};

/// Root of a catalog snapshot document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSnapshot {
    #[serde(default)]
    pub services: Vec<SnapshotService>,
    /// Table-level lineage edges, by fully-qualified table name.
    #[serde(default)]
    pub lineage: Vec<SnapshotLineageEdge>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotService {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Connector identifier; defaults to the service name.
    #[serde(default)]
    pub connector_id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub databases: Vec<SnapshotDatabase>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotDatabase {
    pub name: String,
    #[serde(default)]
    pub schemas: Vec<SnapshotSchema>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSchema {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub last_profiled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tables: Vec<SnapshotTable>,
}

fn default_table_type() -> String {
    "Regular".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotTable {
    pub name: String,
    #[serde(rename = "type", default = "default_table_type")]
    pub kind: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub rows: Option<u64>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub columns: Vec<SnapshotColumn>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotColumn {
    pub name: String,
    pub datatype: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SnapshotLineageEdge {
    pub from: String,
    pub to: String,
}

/// Search candidate with the text it can be matched on.
#[derive(Debug, Clone)]
struct SearchEntry {
    kind: &'static str,
    name: String,
    fqn: String,
    description: Option<String>,
}

/// Adapter serving a [`CatalogSnapshot`].
#[derive(Debug, Clone)]
pub struct InMemoryAdapter {
    config: AdapterConfig,
    datasources: Vec<DatasourceSummary>,
    /// Datasets keyed by service fqn.
    datasets: HashMap<String, Vec<DatasetSummary>>,
    /// Table fqns keyed by schema fqn, in snapshot order.
    schema_tables: HashMap<String, Vec<String>>,
    tables: HashMap<String, TableDetail>,
    search_entries: Vec<SearchEntry>,
    /// `to -> [from]`
    upstream: HashMap<String, Vec<String>>,
    /// `from -> [to]`
    downstream: HashMap<String, Vec<String>>,
}

impl InMemoryAdapter {
    pub fn new(snapshot: CatalogSnapshot, config: AdapterConfig) -> Self {
        let mut adapter = Self {
            config,
            datasources: Vec::new(),
            datasets: HashMap::new(),
            schema_tables: HashMap::new(),
            tables: HashMap::new(),
            search_entries: Vec::new(),
            upstream: HashMap::new(),
            downstream: HashMap::new(),
        };

        for service in snapshot.services {
            adapter.index_service(service);
        }
        sort_datasources(&mut adapter.datasources);

        for edge in snapshot.lineage {
            adapter
                .upstream
                .entry(edge.to.clone())
                .or_default()
                .push(edge.from.clone());
            adapter.downstream.entry(edge.from).or_default().push(edge.to);
        }

        adapter
    }

    /// Parses a snapshot document.
    pub fn from_json(json: &str, config: AdapterConfig) -> Result<Self, serde_json::Error> {
        let snapshot: CatalogSnapshot = serde_json::from_str(json)?;
        Ok(Self::new(snapshot, config))
    }

    fn index_service(&mut self, service: SnapshotService) {
        let service_fqn = fqn::quote(&service.name);
        let datasource_id = IdCodec::encode(&service_fqn);

        self.search_entries.push(SearchEntry {
            kind: "databaseService",
            name: service.name.clone(),
            fqn: service_fqn.clone(),
            description: service.description.clone(),
        });

        let mut datasets = Vec::new();
        for database in &service.databases {
            let database_fqn = fqn::child(&service_fqn, &database.name);
            for schema in &database.schemas {
                let schema_fqn = fqn::child(&database_fqn, &schema.name);
                let dataset_id = IdCodec::encode(&schema_fqn);

                let mut table_fqns = Vec::new();
                for table in &schema.tables {
                    let table_fqn = fqn::child(&schema_fqn, &table.name);
                    let detail = table_detail(table, &table_fqn, &dataset_id, &datasource_id);
                    self.search_entries.push(SearchEntry {
                        kind: "table",
                        name: table.name.clone(),
                        fqn: table_fqn.clone(),
                        description: table.description.clone(),
                    });
                    self.tables.insert(table_fqn.clone(), detail);
                    table_fqns.push(table_fqn);
                }

                self.search_entries.push(SearchEntry {
                    kind: "databaseSchema",
                    name: schema.name.clone(),
                    fqn: schema_fqn.clone(),
                    description: schema.description.clone(),
                });
                datasets.push(DatasetSummary {
                    id: dataset_id,
                    name: schema.name.clone(),
                    datasource_id: datasource_id.clone(),
                    qualified_name: schema_fqn.clone(),
                    description: schema.description.clone(),
                    table_count: Some(table_fqns.len()),
                    last_profiled_at: schema.last_profiled_at,
                });
                self.schema_tables.insert(schema_fqn, table_fqns);
            }
        }

        self.datasources.push(DatasourceSummary {
            id: datasource_id,
            connector_id: service
                .connector_id
                .clone()
                .unwrap_or_else(|| service.name.clone()),
            name: service.name,
            kind: service.kind,
            description: service.description,
            location: service.location,
            tags: service.tags,
        });
        self.datasets.insert(service_fqn, datasets);
    }

    fn table(&self, table_id: &str) -> CatalogResult<&TableDetail> {
        let table_fqn = IdCodec::decode_kind(table_id, EntityKind::Table)?;
        self.tables
            .get(&table_fqn)
            .ok_or_else(|| CatalogError::not_found(format!("table '{table_fqn}' does not exist")))
    }

    fn lineage_node(&self, table_fqn: &str) -> LineageNode {
        match self.tables.get(table_fqn) {
            Some(table) => LineageNode {
                id: table.id.clone(),
                name: table.name.clone(),
                fully_qualified_name: table_fqn.to_string(),
                kind: "table".to_string(),
            },
            None => LineageNode {
                id: IdCodec::encode(table_fqn),
                name: fqn::leaf_name(table_fqn),
                fully_qualified_name: table_fqn.to_string(),
                kind: "table".to_string(),
            },
        }
    }

    /// Breadth-first walk along one direction. The visited set keeps cycles finite.
    fn walk(
        &self,
        root: &str,
        depth: u32,
        upstream: bool,
        graph: &mut LineageGraph,
        seen_nodes: &mut HashSet<String>,
        seen_edges: &mut HashSet<LineageEdge>,
    ) {
        let adjacency = if upstream {
            &self.upstream
        } else {
            &self.downstream
        };
        let mut visited: HashSet<&str> = HashSet::from([root]);
        let mut queue: VecDeque<(&str, u32)> = VecDeque::from([(root, 0)]);

        while let Some((current, level)) = queue.pop_front() {
            if level >= depth {
                continue;
            }
            for neighbour in adjacency.get(current).into_iter().flatten() {
                let (from, to) = if upstream {
                    (neighbour.as_str(), current)
                } else {
                    (current, neighbour.as_str())
                };
                let edge = LineageEdge {
                    from: IdCodec::encode(from),
                    to: IdCodec::encode(to),
                };
                if seen_edges.insert(edge.clone()) {
                    graph.edges.push(edge);
                }
                if seen_nodes.insert(neighbour.clone()) {
                    graph.nodes.push(self.lineage_node(neighbour));
                }
                if visited.insert(neighbour.as_str()) {
                    queue.push_back((neighbour.as_str(), level + 1));
                }
            }
        }
    }
}

fn table_detail(
    table: &SnapshotTable,
    table_fqn: &str,
    dataset_id: &str,
    datasource_id: &str,
) -> TableDetail {
    let columns = table
        .columns
        .iter()
        .map(|column| ColumnSummary {
            id: IdCodec::encode(&fqn::child(table_fqn, &column.name)),
            name: column.name.clone(),
            datatype: column.datatype.clone(),
            description: column.description.clone(),
            is_nullable: column.nullable && !column.primary_key,
            is_primary_key: column.primary_key,
            tags: column.tags.clone(),
        })
        .collect();

    TableDetail {
        id: IdCodec::encode(table_fqn),
        name: table.name.clone(),
        dataset_id: dataset_id.to_string(),
        datasource_id: datasource_id.to_string(),
        kind: table.kind.clone(),
        rows: table.rows,
        owner: table.owner.clone(),
        description: table.description.clone(),
        columns,
        fully_qualified_name: table_fqn.to_string(),
        lineage: None,
    }
}

fn relevance(needle: &str, entry: &SearchEntry) -> Option<f64> {
    let name = entry.name.to_lowercase();
    if name == needle {
        Some(3.0)
    } else if name.starts_with(needle) {
        Some(2.0)
    } else if name.contains(needle) {
        Some(1.0)
    } else if matches_text(needle, &[Some(entry.fqn.as_str()), entry.description.as_deref()]) {
        Some(0.5)
    } else {
        None
    }
}

#[async_trait]
impl CatalogAdapter for InMemoryAdapter {
    async fn list_datasources(&self, kind: Option<&str>) -> CatalogResult<Vec<DatasourceSummary>> {
        let kind = normalize_filter(kind);
        Ok(self
            .datasources
            .iter()
            .filter(|d| kind.as_deref().map_or(true, |k| d.kind.to_lowercase() == k))
            .cloned()
            .collect())
    }

    async fn list_datasets(&self, datasource_id: &str) -> CatalogResult<Vec<DatasetSummary>> {
        let service_fqn = IdCodec::decode_kind(datasource_id, EntityKind::Datasource)?;
        self.datasets.get(&service_fqn).cloned().ok_or_else(|| {
            CatalogError::not_found(format!("datasource '{service_fqn}' does not exist"))
        })
    }

    async fn list_tables(
        &self,
        dataset_id: &str,
        table_type: Option<&str>,
        search: Option<&str>,
    ) -> CatalogResult<Vec<TableSummary>> {
        let schema_fqn = IdCodec::decode_kind(dataset_id, EntityKind::Dataset)?;
        let table_fqns = self.schema_tables.get(&schema_fqn).ok_or_else(|| {
            CatalogError::not_found(format!("dataset '{schema_fqn}' does not exist"))
        })?;

        let table_type = normalize_filter(table_type);
        let search = normalize_filter(search);
        Ok(table_fqns
            .iter()
            .filter_map(|table_fqn| self.tables.get(table_fqn))
            .filter(|t| {
                table_type
                    .as_deref()
                    .map_or(true, |ty| t.kind.to_lowercase() == ty)
            })
            .filter(|t| {
                search.as_deref().map_or(true, |needle| {
                    matches_text(needle, &[Some(t.name.as_str()), t.description.as_deref()])
                })
            })
            .map(TableDetail::summary)
            .collect())
    }

    async fn get_table(&self, table_id: &str) -> CatalogResult<TableDetail> {
        self.table(table_id).cloned()
    }

    async fn list_columns(&self, table_id: &str) -> CatalogResult<Vec<ColumnSummary>> {
        Ok(self.table(table_id)?.columns.clone())
    }

    async fn search(
        &self,
        query: &str,
        type_filter: Option<&str>,
        limit: Option<usize>,
    ) -> CatalogResult<Vec<CatalogSearchHit>> {
        let args = validate_search(query, type_filter, limit)?;
        let needle = args.query.to_lowercase();

        let mut scored: Vec<(f64, &SearchEntry)> = self
            .search_entries
            .iter()
            .filter(|entry| search_kind_matches(args.type_filter.as_deref(), entry.kind))
            .filter_map(|entry| relevance(&needle, entry).map(|score| (score, entry)))
            .collect();
        scored.sort_by(|a, b| {
            b.0.total_cmp(&a.0)
                .then_with(|| a.1.fqn.cmp(&b.1.fqn))
        });

        Ok(scored
            .into_iter()
            .take(args.limit)
            .map(|(score, entry)| {
                let depth = fqn::segment_count(&entry.fqn);
                CatalogSearchHit {
                    id: IdCodec::encode(&entry.fqn),
                    kind: entry.kind.to_string(),
                    name: entry.name.clone(),
                    display_name: entry.name.clone(),
                    datasource_id: (depth >= 2)
                        .then(|| fqn::ancestor(&entry.fqn, 1))
                        .flatten()
                        .map(|f| IdCodec::encode(&f)),
                    dataset_id: (depth >= 4)
                        .then(|| fqn::ancestor(&entry.fqn, 3))
                        .flatten()
                        .map(|f| IdCodec::encode(&f)),
                    path: fqn::split_fqn(&entry.fqn)
                        .iter()
                        .map(|s| fqn::unquote(s))
                        .collect(),
                    relevance: score,
                }
            })
            .collect())
    }

    async fn get_lineage(
        &self,
        table_id: &str,
        direction: LineageDirection,
        depth: u32,
    ) -> CatalogResult<LineageGraph> {
        let root = self.table(table_id)?;
        let root_fqn = root.fully_qualified_name.as_str();
        let depth = depth.min(self.config.max_lineage_depth);

        let mut graph = LineageGraph {
            nodes: vec![self.lineage_node(root_fqn)],
            edges: Vec::new(),
        };
        let mut seen_nodes = HashSet::from([root_fqn.to_string()]);
        let mut seen_edges = HashSet::new();

        if direction.includes_upstream() {
            self.walk(root_fqn, depth, true, &mut graph, &mut seen_nodes, &mut seen_edges);
        }
        if direction.includes_downstream() {
            self.walk(root_fqn, depth, false, &mut graph, &mut seen_nodes, &mut seen_edges);
        }
        Ok(graph)
    }
}
