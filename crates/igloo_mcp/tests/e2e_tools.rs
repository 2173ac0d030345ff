//! End-to-End tests for MCP tools
//!
//! These tests exercise the full JSON-RPC pipeline with REAL files and a
//! scripted warehouse. No filesystem mocks - actual tool execution is
//! verified end to end.

use igloo_core::Config;
use igloo_mcp::protocol::{methods, JsonRpcRequest, RequestId, JSONRPC_VERSION};
use igloo_mcp::server::{McpServer, McpServerConfig};
use igloo_mcp::state::AppState;
use igloo_warehouse::mock::{int_rows, Script, ScriptedWarehouse};
use igloo_warehouse::{Profile, RowSet, SessionContext};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn test_config(root: &Path) -> Config {
    let vars: std::collections::HashMap<String, String> = [
        ("IGLOO_MCP_QUERY_HISTORY", root.join("doc.jsonl")),
        ("IGLOO_MCP_ARTIFACT_ROOT", root.join("artifacts")),
        ("IGLOO_MCP_CACHE_ROOT", root.join("cache")),
        ("IGLOO_MCP_CATALOG_ROOT", root.join("catalogs")),
        ("IGLOO_MCP_REPORTS_ROOT", root.join("reports")),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string_lossy().into_owned()))
    .collect();
    Config::from_lookup(|key| vars.get(key).cloned())
}

fn scripted_warehouse() -> Arc<ScriptedWarehouse> {
    let wh = Arc::new(ScriptedWarehouse::new());
    wh.script("FROM A.B.C", Script::Rows(int_rows("id", &[1, 2, 3])));
    wh.script(
        "ANALYTICS.INFORMATION_SCHEMA.SCHEMATA",
        Script::Rows(RowSet::new(
            vec!["SCHEMA_NAME".to_string()],
            vec![vec![json!("PUBLIC")]],
        )),
    );
    wh.script(
        "ANALYTICS.INFORMATION_SCHEMA.COLUMNS",
        Script::Rows(RowSet::new(
            vec![
                "TABLE_NAME".to_string(),
                "COLUMN_NAME".to_string(),
                "DATA_TYPE".to_string(),
                "ORDINAL_POSITION".to_string(),
            ],
            vec![vec![json!("ORDERS"), json!("ID"), json!("NUMBER"), json!(1)]],
        )),
    );
    wh.script(
        "ANALYTICS.INFORMATION_SCHEMA.TABLES",
        Script::Rows(RowSet::new(
            vec![
                "TABLE_NAME".to_string(),
                "TABLE_TYPE".to_string(),
                "ROW_COUNT".to_string(),
                "LAST_ALTERED".to_string(),
                "COMMENT".to_string(),
            ],
            vec![vec![
                json!("ORDERS"),
                json!("BASE TABLE"),
                json!(10),
                json!(null),
                json!(null),
            ]],
        )),
    );
    wh.script(
        "GET_DDL",
        Script::Rows(RowSet::new(
            vec!["DDL".to_string()],
            vec![vec![json!("CREATE TABLE ORDERS (ID NUMBER)")]],
        )),
    );
    wh
}

fn server_with(temp: &TempDir, warehouse: Arc<ScriptedWarehouse>) -> McpServer {
    let state = AppState::new(
        warehouse,
        Profile {
            name: "e2e".to_string(),
            session: SessionContext {
                warehouse: Some("WH".to_string()),
                database: Some("ANALYTICS".to_string()),
                schema: Some("PUBLIC".to_string()),
                role: None,
            },
        },
        test_config(temp.path()),
    );
    let mut server = McpServer::new(McpServerConfig::default(), state);

    let init = server.handle_request(JsonRpcRequest {
        jsonrpc: JSONRPC_VERSION.to_string(),
        id: Some(RequestId::Number(0)),
        method: methods::INITIALIZE.to_string(),
        params: Some(json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": { "name": "e2e", "version": "0" }
        })),
    });
    assert!(init.error.is_none());
    server
}

fn call(server: &mut McpServer, id: i64, tool: &str, arguments: Value) -> Value {
    let response = server.handle_request(JsonRpcRequest {
        jsonrpc: JSONRPC_VERSION.to_string(),
        id: Some(RequestId::Number(id)),
        method: methods::TOOLS_CALL.to_string(),
        params: Some(json!({ "name": tool, "arguments": arguments })),
    });
    assert!(response.error.is_none(), "JSON-RPC fault for {}", tool);
    let result = response.result.unwrap();
    let text = result["content"][0]["text"].as_str().unwrap();
    serde_json::from_str(text).unwrap()
}

#[test]
fn test_query_cache_hit_preserves_attribution() {
    let temp = TempDir::new().unwrap();
    let wh = scripted_warehouse();
    let mut server = server_with(&temp, wh.clone());

    let args = json!({
        "statement": "SELECT * FROM A.B.C LIMIT 10",
        "reason": "attribution check"
    });
    let first = call(&mut server, 1, "execute_query", args.clone());
    assert_eq!(first["status"], "success");
    assert_eq!(first["total_rows"], 3);

    let second = call(&mut server, 2, "execute_query", args);
    assert_eq!(second["status"], "cache_hit");
    assert_eq!(second["source_databases"][0], "A");
    assert_eq!(second["tables"][0], "A.B.C");
    assert_eq!(wh.submissions().len(), 1);

    // Both requests are in the history file.
    let history = std::fs::read_to_string(temp.path().join("doc.jsonl")).unwrap();
    assert_eq!(history.lines().count(), 2);
    assert!(history.lines().nth(1).unwrap().contains("cache_hit"));
}

#[test]
fn test_denied_statement_envelope() {
    let temp = TempDir::new().unwrap();
    let mut server = server_with(&temp, scripted_warehouse());

    let envelope = call(
        &mut server,
        1,
        "execute_query",
        json!({ "statement": "TRUNCATE TABLE a.b.c", "reason": "cleanup attempt" }),
    );
    assert_eq!(envelope["status"], "error");
    assert_eq!(envelope["error"]["kind"], "denied");
    assert!(envelope["error"]["safe_alternatives"].as_array().unwrap().len() >= 1);
}

#[test]
fn test_comment_prefixed_show_allowed() {
    let temp = TempDir::new().unwrap();
    let mut server = server_with(&temp, scripted_warehouse());

    let envelope = call(
        &mut server,
        1,
        "execute_query",
        json!({ "statement": "-- note\n  SHOW TABLES IN SCHEMA X.Y", "reason": "audit listing" }),
    );
    assert_eq!(envelope["status"], "success");
}

#[test]
fn test_catalog_build_then_search_and_graph() {
    let temp = TempDir::new().unwrap();
    let mut server = server_with(&temp, scripted_warehouse());

    let built = call(
        &mut server,
        1,
        "build_catalog",
        json!({ "database": "ANALYTICS" }),
    );
    assert_eq!(built["status"], "success");
    assert_eq!(built["totals"]["tables"], 1);

    let summary = call(
        &mut server,
        2,
        "get_catalog_summary",
        json!({ "database": "ANALYTICS" }),
    );
    assert_eq!(summary["summary"]["database"], "ANALYTICS");

    let hits = call(
        &mut server,
        3,
        "search_catalog",
        json!({ "query": "orders", "database": "ANALYTICS" }),
    );
    assert_eq!(hits["returned"], 1);

    let graph = call(
        &mut server,
        4,
        "build_dependency_graph",
        json!({ "database": "ANALYTICS", "format": "json" }),
    );
    assert_eq!(graph["node_count"], 1);
}

#[test]
fn test_report_lifecycle_with_citations_and_render() {
    let temp = TempDir::new().unwrap();
    let mut server = server_with(&temp, scripted_warehouse());

    let created = call(
        &mut server,
        1,
        "create_report",
        json!({ "title": "Weekly", "template": "analyst_v1", "tags": ["weekly"] }),
    );
    let report_id = created["report_id"].as_str().unwrap().to_string();

    // Citation-less insight is rejected for analyst_v1.
    let rejected = call(
        &mut server,
        2,
        "evolve_report",
        json!({
            "report_selector": report_id,
            "instruction": "no citation",
            "proposed_changes": {
                "sections_to_add": [{
                    "title": "Network Activity",
                    "insights": [{ "summary": "uncited", "importance": 5 }]
                }]
            }
        }),
    );
    assert_eq!(rejected["status"], "validation_failed");
    assert!(rejected["errors"][0]["schema_example"].is_object());

    let accepted = call(
        &mut server,
        3,
        "evolve_report",
        json!({
            "report_selector": report_id,
            "instruction": "cited insight",
            "proposed_changes": {
                "sections_to_add": [{
                    "title": "Network Activity",
                    "insights": [{
                        "summary": "Inflows doubled",
                        "importance": 9,
                        "citations": [{
                            "source": "query",
                            "provider": "snowflake",
                            "execution_id": "exec-1"
                        }]
                    }]
                }]
            }
        }),
    );
    assert_eq!(accepted["status"], "success");
    assert_eq!(accepted["outline_version"], 2);
    assert_eq!(accepted["summary"]["insights_added"], 1);

    let citations = call(
        &mut server,
        4,
        "search_citations",
        json!({ "execution_id": "exec-1" }),
    );
    assert_eq!(citations["matches_found"], 1);
    assert_eq!(citations["citations"][0]["report_id"], report_id);

    let rendered = call(
        &mut server,
        5,
        "render_report",
        json!({ "report_selector": report_id, "format": "md" }),
    );
    assert_eq!(rendered["status"], "success");
    let preview = rendered["preview"].as_str().unwrap();
    assert!(preview.contains("Inflows doubled [1]"));
    assert!(preview.contains("Appendix: Query References"));
}

#[test]
fn test_version_conflict_over_jsonrpc() {
    let temp = TempDir::new().unwrap();
    let mut server = server_with(&temp, scripted_warehouse());

    let created = call(&mut server, 1, "create_report", json!({ "title": "T" }));
    let report_id = created["report_id"].as_str().unwrap().to_string();

    call(
        &mut server,
        2,
        "evolve_report",
        json!({
            "report_selector": report_id,
            "instruction": "first",
            "proposed_changes": { "sections_to_add": [{ "title": "A" }] }
        }),
    );

    let conflicted = call(
        &mut server,
        3,
        "evolve_report",
        json!({
            "report_selector": report_id,
            "instruction": "stale",
            "proposed_changes": { "sections_to_add": [{ "title": "B" }] },
            "expected_outline_version": 1
        }),
    );
    assert_eq!(conflicted["status"], "error");
    assert_eq!(conflicted["error"]["kind"], "version_conflict");
    assert_eq!(conflicted["error"]["current_version"], 2);
}

#[test]
fn test_health_check_reports_subsystems() {
    let temp = TempDir::new().unwrap();
    let mut server = server_with(&temp, scripted_warehouse());

    let health = call(&mut server, 1, "health_check", json!({}));
    assert_eq!(health["status"], "success");
    assert_eq!(health["overall"], "healthy");
    assert_eq!(health["connectivity"]["ok"], true);
    assert_eq!(health["profile"]["name"], "e2e");
}

#[test]
fn test_request_id_propagates_to_history() {
    let temp = TempDir::new().unwrap();
    let mut server = server_with(&temp, scripted_warehouse());

    let envelope = call(
        &mut server,
        1,
        "execute_query",
        json!({
            "statement": "SELECT * FROM A.B.C LIMIT 10",
            "reason": "request id check",
            "request_id": "req-fixed-1"
        }),
    );
    assert_eq!(envelope["request_id"], "req-fixed-1");

    let history = std::fs::read_to_string(temp.path().join("doc.jsonl")).unwrap();
    assert!(history.contains("req-fixed-1"));
}
