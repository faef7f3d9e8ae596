//! REST API handlers.
//!
//! Thin translation between HTTP and [`CachedCatalogService`]: query parsing,
//! status mapping, JSON bodies. Malformed queries are answered locally with
//! `invalid_argument` and never reach the service.
//!
//! [`CachedCatalogService`]: catalogscope_core::CachedCatalogService

use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use catalogscope_core::{CatalogError, ErrorKind, LineageDirection};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::AppState;

/// Build the API router with all endpoints.
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .route("/catalog/datasources", get(list_datasources))
        .route("/catalog/datasources/{id}/datasets", get(list_datasets))
        .route("/catalog/datasets/{id}/tables", get(list_tables))
        .route("/catalog/tables/{id}", get(get_table))
        .route("/catalog/tables/{id}/columns", get(list_columns))
        .route("/catalog/tables/{id}/lineage", get(get_lineage))
        .route("/catalog/search", get(search))
        .route("/cache/invalidate", post(invalidate))
}

// === Errors ===

/// A catalog failure rendered as `{"kind", "message", "requestId"?}`.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct ApiError(#[from] pub CatalogError);

impl ApiError {
    fn invalid(message: impl Into<String>) -> Self {
        Self(CatalogError::invalid_argument(message))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody<'a> {
    kind: ErrorKind,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_id: Option<&'a str>,
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Auth => StatusCode::UNAUTHORIZED,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Upstream => StatusCode::BAD_GATEWAY,
        ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status = status_for(err.kind);
        if status.is_server_error() {
            warn!(kind = %err.kind, request_id = ?err.request_id, "api: {}", err.message);
        } else {
            debug!(kind = %err.kind, "api: {}", err.message);
        }

        let body = ErrorBody {
            kind: err.kind,
            message: &err.message,
            request_id: err.request_id.as_deref(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn query<T>(extracted: Result<Query<T>, QueryRejection>) -> Result<T, ApiError> {
    extracted
        .map(|Query(q)| q)
        .map_err(|rejection| ApiError::invalid(rejection.body_text()))
}

// === Request/Response types ===

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    source: &'static str,
}

#[derive(Deserialize)]
struct DatasourcesQuery {
    #[serde(rename = "type")]
    kind: Option<String>,
}

#[derive(Deserialize)]
struct TablesQuery {
    #[serde(rename = "type")]
    table_type: Option<String>,
    search: Option<String>,
}

/// Numeric fields stay strings so parse failures produce our error body.
#[derive(Deserialize)]
struct LineageQuery {
    direction: Option<String>,
    depth: Option<String>,
}

#[derive(Deserialize)]
struct SearchQuery {
    q: Option<String>,
    #[serde(rename = "type")]
    type_filter: Option<String>,
    limit: Option<String>,
}

#[derive(Deserialize)]
struct InvalidateRequest {
    pattern: String,
}

#[derive(Serialize)]
struct InvalidateResponse {
    removed: usize,
}

fn parse_depth(raw: Option<&str>) -> Result<u32, ApiError> {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return Ok(1);
    };
    raw.parse::<u32>()
        .map_err(|_| ApiError::invalid(format!("depth must be a non-negative integer, got '{raw}'")))
}

fn parse_direction(raw: Option<&str>) -> Result<LineageDirection, ApiError> {
    match raw.map(str::trim).filter(|r| !r.is_empty()) {
        None => Ok(LineageDirection::default()),
        Some(raw) => raw.parse().map_err(ApiError::invalid),
    }
}

fn parse_limit(raw: Option<&str>) -> Result<Option<usize>, ApiError> {
    match raw.map(str::trim).filter(|r| !r.is_empty()) {
        None => Ok(None),
        Some(raw) => raw.parse::<usize>().map(Some).map_err(|_| {
            ApiError::invalid(format!("limit must be a non-negative integer, got '{raw}'"))
        }),
    }
}

// === Handlers ===

/// GET /api/health - Health check with version
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        source: state.source,
    })
}

/// GET /api/catalog/datasources?type=
async fn list_datasources(
    State(state): State<Arc<AppState>>,
    params: Result<Query<DatasourcesQuery>, QueryRejection>,
) -> ApiResult<Vec<catalogscope_core::DatasourceSummary>> {
    let params = query(params)?;
    let datasources = state
        .service
        .list_datasources(params.kind.as_deref())
        .await?;
    Ok(Json(datasources))
}

/// GET /api/catalog/datasources/{id}/datasets
async fn list_datasets(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Vec<catalogscope_core::DatasetSummary>> {
    Ok(Json(state.service.list_datasets(&id).await?))
}

/// GET /api/catalog/datasets/{id}/tables?type=&search=
async fn list_tables(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    params: Result<Query<TablesQuery>, QueryRejection>,
) -> ApiResult<Vec<catalogscope_core::TableSummary>> {
    let params = query(params)?;
    let tables = state
        .service
        .list_tables(&id, params.table_type.as_deref(), params.search.as_deref())
        .await?;
    Ok(Json(tables))
}

/// GET /api/catalog/tables/{id}
async fn get_table(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<catalogscope_core::TableDetail> {
    Ok(Json(state.service.get_table(&id).await?))
}

/// GET /api/catalog/tables/{id}/columns
async fn list_columns(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Vec<catalogscope_core::ColumnSummary>> {
    Ok(Json(state.service.list_columns(&id).await?))
}

/// GET /api/catalog/tables/{id}/lineage?direction=both&depth=1
async fn get_lineage(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    params: Result<Query<LineageQuery>, QueryRejection>,
) -> ApiResult<catalogscope_core::LineageGraph> {
    let params = query(params)?;
    let direction = parse_direction(params.direction.as_deref())?;
    let depth = parse_depth(params.depth.as_deref())?;
    Ok(Json(
        state.service.get_lineage(&id, direction, depth).await?,
    ))
}

/// GET /api/catalog/search?q=&type=&limit=
async fn search(
    State(state): State<Arc<AppState>>,
    params: Result<Query<SearchQuery>, QueryRejection>,
) -> ApiResult<Vec<catalogscope_core::CatalogSearchHit>> {
    let params = query(params)?;
    let limit = parse_limit(params.limit.as_deref())?;
    let hits = state
        .service
        .search(
            params.q.as_deref().unwrap_or_default(),
            params.type_filter.as_deref(),
            limit,
        )
        .await?;
    Ok(Json(hits))
}

/// POST /api/cache/invalidate - Drop cached responses matching a key pattern
async fn invalidate(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<InvalidateRequest>, JsonRejection>,
) -> ApiResult<InvalidateResponse> {
    let Json(payload) = payload.map_err(|rejection| ApiError::invalid(rejection.body_text()))?;
    if payload.pattern.trim().is_empty() {
        return Err(ApiError::invalid("pattern must not be empty"));
    }
    let removed = state.service.invalidate(&payload.pattern).await;
    Ok(Json(InvalidateResponse { removed }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_statuses() {
        assert_eq!(status_for(ErrorKind::Auth), StatusCode::UNAUTHORIZED);
        assert_eq!(status_for(ErrorKind::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(status_for(ErrorKind::Timeout), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(status_for(ErrorKind::Upstream), StatusCode::BAD_GATEWAY);
        assert_eq!(
            status_for(ErrorKind::InvalidArgument),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn depth_parsing() {
        assert_eq!(parse_depth(None).unwrap(), 1);
        assert_eq!(parse_depth(Some("0")).unwrap(), 0);
        assert!(parse_depth(Some("-1")).is_err());
        assert!(parse_depth(Some("deep")).is_err());
    }

    #[test]
    fn direction_parsing() {
        assert_eq!(parse_direction(None).unwrap(), LineageDirection::Both);
        assert_eq!(
            parse_direction(Some("upstream")).unwrap(),
            LineageDirection::Upstream
        );
        assert!(parse_direction(Some("sideways")).is_err());
    }
}
