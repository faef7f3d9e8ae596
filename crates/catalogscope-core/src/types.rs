//! Normalized catalog DTOs returned to consumers.
//!
//! These are built fresh per request from upstream responses and never mutated
//! afterwards. All identifier fields carry [`crate::IdCodec`] ids.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A connection to an external data system (an upstream database service).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DatasourceSummary {
    pub id: String,
    pub name: String,
    /// Provider-defined service type, e.g. `BigQuery` or `Postgres`.
    #[serde(rename = "type")]
    pub kind: String,
    /// The upstream's own identifier for the connector.
    pub connector_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A logical grouping of tables (a database schema).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DatasetSummary {
    pub id: String,
    pub name: String,
    pub datasource_id: String,
    pub qualified_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_profiled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TableSummary {
    pub id: String,
    pub name: String,
    pub dataset_id: String,
    pub datasource_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<u64>,
    /// Number of columns.
    pub columns: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

/// Full table view. Never cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TableDetail {
    pub id: String,
    pub name: String,
    pub dataset_id: String,
    pub datasource_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub columns: Vec<ColumnDetail>,
    pub fully_qualified_name: String,
    /// Only populated by an explicit lineage fetch; `get_table` leaves it empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lineage: Option<LineageGraph>,
}

impl TableDetail {
    pub fn summary(&self) -> TableSummary {
        TableSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            dataset_id: self.dataset_id.clone(),
            datasource_id: self.datasource_id.clone(),
            kind: self.kind.clone(),
            rows: self.rows,
            columns: self.columns.len(),
            owner: self.owner.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ColumnSummary {
    pub id: String,
    pub name: String,
    pub datatype: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub is_nullable: bool,
    pub is_primary_key: bool,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Column detail shares the summary shape.
pub type ColumnDetail = ColumnSummary;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSearchHit {
    pub id: String,
    /// Upstream entity type, e.g. `table` or `databaseSchema`.
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datasource_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_id: Option<String>,
    /// Unquoted fully-qualified name segments, outermost first.
    pub path: Vec<String>,
    /// Provider ranking score. Opaque; only meaningful for ordering within one response.
    pub relevance: f64,
}

/// Which side of a table's lineage to walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum LineageDirection {
    Upstream,
    Downstream,
    #[default]
    Both,
}

impl LineageDirection {
    pub fn includes_upstream(&self) -> bool {
        matches!(self, Self::Upstream | Self::Both)
    }

    pub fn includes_downstream(&self) -> bool {
        matches!(self, Self::Downstream | Self::Both)
    }
}

impl std::str::FromStr for LineageDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "upstream" => Ok(Self::Upstream),
            "downstream" => Ok(Self::Downstream),
            "both" => Ok(Self::Both),
            other => Err(format!(
                "unknown lineage direction '{other}' (expected upstream, downstream or both)"
            )),
        }
    }
}

/// Lineage around one table. Usually a DAG, but cycles in upstream data are tolerated.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LineageGraph {
    pub nodes: Vec<LineageNode>,
    pub edges: Vec<LineageEdge>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LineageNode {
    pub id: String,
    pub name: String,
    pub fully_qualified_name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LineageEdge {
    pub from: String,
    pub to: String,
}
