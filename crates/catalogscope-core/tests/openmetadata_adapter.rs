mod common;

use std::time::Duration;

use catalogscope_core::adapter::classify_status;
use catalogscope_core::{
    AdapterConfig, CatalogAdapter, ErrorKind, IdCodec, LineageDirection, OpenMetadataAdapter,
    TransportError, UpstreamResponse,
};
use common::{query_value, ScriptedTransport};
use rstest::rstest;
use serde_json::json;

const SCHEMA_FQN: &str = "warehouse.sales.public";

fn adapter(transport: ScriptedTransport) -> OpenMetadataAdapter<ScriptedTransport> {
    OpenMetadataAdapter::new(transport, AdapterConfig::default())
}

fn wire_table(name: &str) -> serde_json::Value {
    json!({
        "name": name,
        "fullyQualifiedName": format!("{SCHEMA_FQN}.{name}"),
        "tableType": "Regular",
        "columns": [
            {"name": "id", "dataType": "INT", "constraint": "PRIMARY_KEY"},
            {"name": "note", "dataType": "VARCHAR", "dataTypeDisplay": "varchar(64)"}
        ],
        "profile": {"rowCount": 12.0}
    })
}

fn schema_route(transport: ScriptedTransport) -> ScriptedTransport {
    transport.json(
        &format!("/v1/databaseSchemas/name/{SCHEMA_FQN}"),
        200,
        json!({"name": "public", "fullyQualifiedName": SCHEMA_FQN}),
    )
}

/// Five pages of one table each, optionally failing on one of them.
fn paged_tables(fail_on_page: Option<usize>) -> ScriptedTransport {
    schema_route(ScriptedTransport::new()).route("/v1/tables", move |query| {
        let page = match query_value(query, "after") {
            None => 1,
            Some(cursor) => cursor.trim_start_matches('c').parse::<usize>().unwrap() + 1,
        };
        if Some(page) == fail_on_page {
            return Ok(UpstreamResponse::new(500, "internal error"));
        }
        let paging = if page < 5 {
            json!({"after": format!("c{page}")})
        } else {
            json!({})
        };
        let body = json!({"data": [wire_table(&format!("t{page}"))], "paging": paging});
        Ok(UpstreamResponse::new(200, body.to_string()))
    })
}

#[tokio::test]
async fn list_tables_walks_every_page() {
    let adapter = adapter(paged_tables(None));
    let dataset_id = IdCodec::encode(SCHEMA_FQN);

    let tables = adapter.list_tables(&dataset_id, None, None).await.unwrap();
    let names: Vec<_> = tables.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["t1", "t2", "t3", "t4", "t5"]);
    assert_eq!(tables[0].columns, 2);
    assert_eq!(tables[0].rows, Some(12));
    assert_eq!(tables[0].dataset_id, dataset_id);
    assert_eq!(adapter.transport().request_count("/v1/tables"), 5);

    let requests = adapter.transport().requests.lock().unwrap();
    let (_, first_query) = requests.iter().find(|(p, _)| p == "/v1/tables").unwrap();
    assert!(first_query.contains(&("limit".to_string(), "100".to_string())));
    assert!(first_query.contains(&("databaseSchema".to_string(), SCHEMA_FQN.to_string())));
}

#[tokio::test]
async fn failure_on_a_middle_page_fails_the_listing() {
    let adapter = adapter(paged_tables(Some(3)));
    let err = adapter
        .list_tables(&IdCodec::encode(SCHEMA_FQN), None, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Upstream);
    assert_eq!(adapter.transport().request_count("/v1/tables"), 3);
}

#[tokio::test]
async fn repeated_cursor_is_an_upstream_error() {
    let transport = schema_route(ScriptedTransport::new()).json(
        "/v1/tables",
        200,
        json!({"data": [wire_table("loop")], "paging": {"after": "same"}}),
    );
    let err = adapter(transport)
        .list_tables(&IdCodec::encode(SCHEMA_FQN), None, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Upstream);
}

#[tokio::test]
async fn list_tables_filters_locally() {
    let transport = schema_route(ScriptedTransport::new()).json(
        "/v1/tables",
        200,
        json!({"data": [
            wire_table("orders"),
            {"name": "revenue", "fullyQualifiedName": format!("{SCHEMA_FQN}.revenue"),
             "tableType": "View", "description": "Daily revenue"}
        ]}),
    );
    let adapter = adapter(transport);
    let dataset_id = IdCodec::encode(SCHEMA_FQN);

    let views = adapter.list_tables(&dataset_id, Some("view"), None).await.unwrap();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].kind, "View");

    let found = adapter
        .list_tables(&dataset_id, None, Some("DAILY"))
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].name, "revenue");
}

#[rstest]
#[case(401, ErrorKind::Auth)]
#[case(403, ErrorKind::Auth)]
#[case(404, ErrorKind::NotFound)]
#[case(408, ErrorKind::Timeout)]
#[case(504, ErrorKind::Timeout)]
#[case(500, ErrorKind::Upstream)]
#[case(502, ErrorKind::Upstream)]
#[case(429, ErrorKind::Upstream)]
fn statuses_are_classified(#[case] status: u16, #[case] kind: ErrorKind) {
    let err = classify_status(&UpstreamResponse::new(status, "boom"));
    assert_eq!(err.kind, kind);
    assert!(err.message.contains("boom"));
}

#[tokio::test]
async fn upstream_request_id_is_carried_on_errors() {
    let table_fqn = format!("{SCHEMA_FQN}.orders");
    let transport = ScriptedTransport::new().route(
        &format!("/v1/tables/name/{table_fqn}"),
        |_| Ok(UpstreamResponse::new(401, "expired").with_request_id("req-42")),
    );
    let err = adapter(transport)
        .get_table(&IdCodec::encode(&table_fqn))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Auth);
    assert_eq!(err.request_id.as_deref(), Some("req-42"));
}

#[tokio::test]
async fn malformed_body_is_an_upstream_error() {
    let table_fqn = format!("{SCHEMA_FQN}.orders");
    let transport = ScriptedTransport::new().route(
        &format!("/v1/tables/name/{table_fqn}"),
        |_| Ok(UpstreamResponse::new(200, "<html>").with_request_id("req-7")),
    );
    let err = adapter(transport)
        .get_table(&IdCodec::encode(&table_fqn))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Upstream);
    assert_eq!(err.request_id.as_deref(), Some("req-7"));
}

#[tokio::test]
async fn connect_failure_is_an_upstream_error() {
    let table_fqn = format!("{SCHEMA_FQN}.orders");
    let transport = ScriptedTransport::new().route(&format!("/v1/tables/name/{table_fqn}"), |_| {
        Err(TransportError::Connect("refused".into()))
    });
    let err = adapter(transport)
        .list_columns(&IdCodec::encode(&table_fqn))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Upstream);
}

#[tokio::test]
async fn get_table_maps_columns_and_constraints() {
    let table_fqn = format!("{SCHEMA_FQN}.orders");
    let mut body = wire_table("orders");
    body["owners"] = json!([{"name": "data-team", "displayName": "Data Team"}]);
    body["tableConstraints"] = json!([{"constraintType": "PRIMARY_KEY", "columns": ["note"]}]);
    let transport =
        ScriptedTransport::new().json(&format!("/v1/tables/name/{table_fqn}"), 200, body);

    let detail = adapter(transport)
        .get_table(&IdCodec::encode(&table_fqn))
        .await
        .unwrap();
    assert_eq!(detail.fully_qualified_name, table_fqn);
    assert_eq!(detail.owner.as_deref(), Some("Data Team"));
    assert_eq!(detail.datasource_id, IdCodec::encode("warehouse"));
    assert!(detail.lineage.is_none());
    assert!(detail.columns.iter().all(|c| c.is_primary_key && !c.is_nullable));
    assert_eq!(detail.columns[1].datatype, "varchar(64)");
}

#[tokio::test]
async fn malformed_ids_never_reach_upstream() {
    let adapter = adapter(ScriptedTransport::new());
    let err = adapter.list_datasets("ds-abc123").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);

    let dataset_id = IdCodec::encode(SCHEMA_FQN);
    let err = adapter.get_table(&dataset_id).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
    assert!(adapter.transport().requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn list_datasources_sorts_and_filters_by_type() {
    let transport = ScriptedTransport::new().json(
        "/v1/services/databaseServices",
        200,
        json!({"data": [
            {"id": "u2", "name": "warehouse", "serviceType": "BigQuery"},
            {"id": "u1", "name": "Analytics", "serviceType": "Postgres",
             "connection": {"config": {"hostPort": "db:5432"}},
             "tags": [{"tagFQN": "Tier.Gold"}]}
        ]}),
    );
    let adapter = adapter(transport);

    let all = adapter.list_datasources(None).await.unwrap();
    let names: Vec<_> = all.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, vec!["Analytics", "warehouse"]);
    assert_eq!(all[0].location.as_deref(), Some("db:5432"));
    assert_eq!(all[0].connector_id, "u1");
    assert_eq!(all[0].tags, vec!["Tier.Gold"]);

    let bigquery = adapter.list_datasources(Some("bigquery")).await.unwrap();
    assert_eq!(bigquery.len(), 1);
    assert_eq!(IdCodec::decode(&bigquery[0].id).unwrap(), "warehouse");
}

#[tokio::test]
async fn orphaned_datasets_are_dropped() {
    let transport = ScriptedTransport::new()
        .json(
            "/v1/services/databaseServices/name/warehouse",
            200,
            json!({"id": "u1", "name": "warehouse", "serviceType": "BigQuery"}),
        )
        .json(
            "/v1/databases",
            200,
            json!({"data": [{"name": "sales", "fullyQualifiedName": "warehouse.sales"}]}),
        )
        .json(
            "/v1/databaseSchemas",
            200,
            json!({"data": [
                {"name": "public", "fullyQualifiedName": SCHEMA_FQN,
                 "service": {"name": "warehouse", "fullyQualifiedName": "warehouse"},
                 "tables": [{"name": "orders"}, {"name": "items"}],
                 "updatedAt": 1700000000000_i64},
                {"name": "stray", "fullyQualifiedName": "other.sales.stray",
                 "service": {"name": "other", "fullyQualifiedName": "other"}}
            ]}),
        );
    let datasource_id = IdCodec::encode("warehouse");
    let datasets = adapter(transport).list_datasets(&datasource_id).await.unwrap();

    assert_eq!(datasets.len(), 1);
    assert_eq!(datasets[0].qualified_name, SCHEMA_FQN);
    assert_eq!(datasets[0].datasource_id, datasource_id);
    assert_eq!(datasets[0].table_count, Some(2));
    // An edit timestamp is not a profiling timestamp.
    assert_eq!(datasets[0].last_profiled_at, None);
}

#[tokio::test]
async fn unknown_datasource_is_not_found() {
    let err = adapter(ScriptedTransport::new())
        .list_datasets(&IdCodec::encode("missing"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
}

fn lineage_transport(table_fqn: &str) -> ScriptedTransport {
    let node = |id: &str, name: &str| {
        json!({"id": id, "type": "table", "name": name,
               "fullyQualifiedName": format!("{SCHEMA_FQN}.{name}")})
    };
    ScriptedTransport::new().json(
        &format!("/v1/lineage/table/name/{table_fqn}"),
        200,
        json!({
            "entity": node("u-orders", "orders"),
            "nodes": [node("u-raw", "raw_orders"), node("u-rev", "revenue")],
            "upstreamEdges": [
                {"fromEntity": "u-raw", "toEntity": "u-orders"},
                {"fromEntity": "u-rev", "toEntity": "u-raw"}
            ],
            "downstreamEdges": [
                {"fromEntity": "u-orders", "toEntity": "u-rev"},
                {"fromEntity": "u-orders", "toEntity": "u-rev"},
                {"fromEntity": "u-orders", "toEntity": "u-ghost"}
            ]
        }),
    )
}

#[tokio::test]
async fn lineage_at_depth_zero_is_root_only() {
    let table_fqn = format!("{SCHEMA_FQN}.orders");
    let adapter = adapter(lineage_transport(&table_fqn));
    let table_id = IdCodec::encode(&table_fqn);

    let graph = adapter
        .get_lineage(&table_id, LineageDirection::Both, 0)
        .await
        .unwrap();
    assert_eq!(graph.nodes.len(), 1);
    assert!(graph.edges.is_empty());
    assert_eq!(graph.nodes[0].id, table_id);
}

#[tokio::test]
async fn lineage_cycles_and_duplicates_collapse() {
    let table_fqn = format!("{SCHEMA_FQN}.orders");
    let adapter = adapter(lineage_transport(&table_fqn));

    let graph = adapter
        .get_lineage(&IdCodec::encode(&table_fqn), LineageDirection::Both, 3)
        .await
        .unwrap();
    assert_eq!(graph.nodes.len(), 3);
    assert_eq!(graph.edges.len(), 3);

    let upstream = adapter
        .get_lineage(&IdCodec::encode(&table_fqn), LineageDirection::Upstream, 3)
        .await
        .unwrap();
    assert_eq!(upstream.edges.len(), 2);
}

#[tokio::test]
async fn lineage_depth_is_clamped() {
    let table_fqn = format!("{SCHEMA_FQN}.orders");
    let adapter = adapter(lineage_transport(&table_fqn));
    adapter
        .get_lineage(&IdCodec::encode(&table_fqn), LineageDirection::Downstream, 50)
        .await
        .unwrap();

    let requests = adapter.transport().requests.lock().unwrap();
    let query = &requests[0].1;
    assert!(query.contains(&("downstreamDepth".to_string(), "5".to_string())));
    assert!(query.contains(&("upstreamDepth".to_string(), "0".to_string())));
}

#[tokio::test]
async fn search_validates_and_maps_hits() {
    let transport = ScriptedTransport::new().json(
        "/v1/search/query",
        200,
        json!({"hits": {"hits": [
            {"_score": 7.5, "_source": {"name": "revenue",
                "fullyQualifiedName": format!("{SCHEMA_FQN}.revenue"),
                "entityType": "table"}}
        ]}}),
    );
    let adapter = adapter(transport);

    let err = adapter.search("   ", None, None).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidArgument);
    assert!(adapter.transport().requests.lock().unwrap().is_empty());

    let hits = adapter.search(" revenue ", Some("table"), Some(500)).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].relevance, 7.5);
    assert_eq!(hits[0].display_name, "revenue");
    assert_eq!(hits[0].path, vec!["warehouse", "sales", "public", "revenue"]);
    assert_eq!(hits[0].dataset_id, Some(IdCodec::encode(SCHEMA_FQN)));
    assert_eq!(hits[0].datasource_id, Some(IdCodec::encode("warehouse")));

    let requests = adapter.transport().requests.lock().unwrap();
    let query = &requests[0].1;
    assert!(query.contains(&("size".to_string(), "100".to_string())));
    assert!(query.contains(&("q".to_string(), "revenue".to_string())));
    assert!(query.contains(&("index".to_string(), "table_search_index".to_string())));
}

fn mixed_hits_transport() -> ScriptedTransport {
    ScriptedTransport::new().json(
        "/v1/search/query",
        200,
        json!({"hits": {"hits": [
            {"_score": 1.5, "_source": {"name": "revenue",
                "fullyQualifiedName": format!("{SCHEMA_FQN}.revenue"),
                "entityType": "table"}},
            {"_score": 9.0, "_source": {"name": "revenue_total",
                "fullyQualifiedName": format!("{SCHEMA_FQN}.orders.revenue_total"),
                "entityType": "column"}},
            {"_score": 4.25, "_source": {"name": "revenue_daily",
                "fullyQualifiedName": format!("{SCHEMA_FQN}.revenue_daily")}},
            {"_score": 3.0, "_source": {"name": "public",
                "fullyQualifiedName": SCHEMA_FQN,
                "entityType": "databaseSchema"}}
        ]}}),
    )
}

#[tokio::test]
async fn search_filters_hits_from_the_shared_index() {
    let adapter = adapter(mixed_hits_transport());

    let columns = adapter.search("revenue", Some("column"), None).await.unwrap();
    let kinds: Vec<&str> = columns.iter().map(|h| h.kind.as_str()).collect();
    assert_eq!(kinds, vec!["column"]);
    assert_eq!(columns[0].name, "revenue_total");

    let requests = adapter.transport().requests.lock().unwrap();
    assert!(requests[0]
        .1
        .contains(&("index".to_string(), "all".to_string())));
}

#[tokio::test]
async fn search_keeps_upstream_relevance_order() {
    let adapter = adapter(mixed_hits_transport());

    let hits = adapter.search("revenue", None, None).await.unwrap();
    let names: Vec<&str> = hits.iter().map(|h| h.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["revenue", "revenue_total", "revenue_daily", "public"]
    );
    let scores: Vec<f64> = hits.iter().map(|h| h.relevance).collect();
    assert_eq!(scores, vec![1.5, 9.0, 4.25, 3.0]);

    // A hit without an entity type is typed by its depth.
    assert_eq!(hits[2].kind, "table");

    let tables = adapter.search("revenue", Some("table"), None).await.unwrap();
    let names: Vec<&str> = tables.iter().map(|h| h.name.as_str()).collect();
    assert_eq!(names, vec!["revenue", "revenue_daily"]);
}

#[tokio::test(start_paused = true)]
async fn slow_upstream_times_out() {
    let mut transport = ScriptedTransport::new().json(
        "/v1/services/databaseServices",
        200,
        json!({"data": []}),
    );
    transport.delay = Some(Duration::from_secs(30));
    let config = AdapterConfig {
        request_timeout: Duration::from_secs(2),
        ..AdapterConfig::default()
    };
    let adapter = OpenMetadataAdapter::new(transport, config);

    let err = adapter.list_datasources(None).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Timeout);
}
