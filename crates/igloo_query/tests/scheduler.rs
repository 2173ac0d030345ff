//! End-to-end scheduler tests with real files and a scripted warehouse.

use igloo_core::config::{CacheMode, Config};
use igloo_core::sha256_hex;
use igloo_query::{
    ArtifactStore, AsyncState, CancellationToken, QueryError, QueryRequest, QueryResponse,
    QueryService,
};
use igloo_query::service::SchedulerTiming;
use igloo_sql::SqlError;
use igloo_warehouse::mock::{int_rows, Script, ScriptedWarehouse};
use igloo_warehouse::{Profile, SessionContext};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn test_config(root: &Path) -> Config {
    let vars: HashMap<String, String> = [
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

fn profile() -> Profile {
    Profile {
        name: "test".to_string(),
        session: SessionContext {
            warehouse: Some("WH".into()),
            database: Some("DB".into()),
            schema: Some("PUBLIC".into()),
            role: None,
        },
    }
}

fn request(statement: &str) -> QueryRequest {
    QueryRequest {
        statement: statement.to_string(),
        reason: "integration test".to_string(),
        timeout_seconds: 30,
        overrides: SessionContext::default(),
        cache_mode: CacheMode::Enabled,
        request_id: None,
    }
}

fn fast_timing() -> SchedulerTiming {
    SchedulerTiming {
        rpc_budget: Duration::from_secs(10),
        safety_margin: Duration::ZERO,
        poll_interval: Duration::from_millis(5),
    }
}

fn history_lines(root: &Path) -> Vec<serde_json::Value> {
    let content = std::fs::read_to_string(root.join("doc.jsonl")).unwrap_or_default();
    content
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[test]
fn test_success_records_artifact_and_history() {
    let temp = TempDir::new().unwrap();
    let warehouse = Arc::new(ScriptedWarehouse::new());
    warehouse.script("FROM orders", Script::Rows(int_rows("id", &[1, 2])));

    let service = QueryService::new(warehouse.clone(), profile(), &test_config(temp.path()))
        .with_timing(fast_timing());

    let sql = "SELECT * FROM orders";
    let response = service
        .execute(request(sql), CancellationToken::new())
        .unwrap();

    let QueryResponse::Success { result } = response else {
        panic!("expected success");
    };
    assert_eq!(result.data.total_rows, 2);
    assert!(result.query_id.is_some());

    // Artifact round-trip, byte for byte.
    let store = ArtifactStore::new(&temp.path().join("artifacts"));
    assert_eq!(store.read(&sha256_hex(sql.as_bytes())).unwrap(), sql);

    // Exactly one history line with status success.
    let lines = history_lines(temp.path());
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["status"], "success");
    assert_eq!(lines[0]["rowcount"], 2);

    // The submitted statement carried the reason in its tag.
    let (_, tag) = &warehouse.submissions()[0];
    assert_eq!(tag.reason, "integration test");
}

#[test]
fn test_cache_hit_preserves_source_attribution() {
    let temp = TempDir::new().unwrap();
    let warehouse = Arc::new(ScriptedWarehouse::new());
    warehouse.script("FROM A.B.C", Script::Rows(int_rows("id", &[1])));

    let service = QueryService::new(warehouse.clone(), profile(), &test_config(temp.path()))
        .with_timing(fast_timing());

    let sql = "SELECT * FROM A.B.C LIMIT 10";
    let first = service
        .execute(request(sql), CancellationToken::new())
        .unwrap();
    assert!(matches!(first, QueryResponse::Success { .. }));

    let second = service
        .execute(request(sql), CancellationToken::new())
        .unwrap();
    let QueryResponse::CacheHit {
        source_databases,
        tables,
        data,
        ..
    } = second
    else {
        panic!("expected cache hit");
    };
    assert_eq!(source_databases, vec!["A".to_string()]);
    assert_eq!(tables, vec!["A.B.C".to_string()]);
    assert_eq!(data.total_rows, 1);

    // Only one warehouse submission happened.
    assert_eq!(warehouse.submissions().len(), 1);

    let lines = history_lines(temp.path());
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[1]["status"], "cache_hit");
    assert_eq!(lines[1]["source_databases"][0], "A");
}

#[test]
fn test_refresh_mode_bypasses_lookup() {
    let temp = TempDir::new().unwrap();
    let warehouse = Arc::new(ScriptedWarehouse::new());
    warehouse.script("FROM t", Script::Rows(int_rows("id", &[1])));

    let service = QueryService::new(warehouse.clone(), profile(), &test_config(temp.path()))
        .with_timing(fast_timing());

    let mut req = request("SELECT * FROM t");
    service.execute(req.clone(), CancellationToken::new()).unwrap();

    req.cache_mode = CacheMode::Refresh;
    let second = service.execute(req, CancellationToken::new()).unwrap();
    assert!(matches!(second, QueryResponse::Success { .. }));
    assert_eq!(warehouse.submissions().len(), 2);
}

#[test]
fn test_comment_prefixed_show_is_allowed() {
    let temp = TempDir::new().unwrap();
    let warehouse = Arc::new(ScriptedWarehouse::new());

    let service = QueryService::new(warehouse, profile(), &test_config(temp.path()))
        .with_timing(fast_timing());

    let response = service
        .execute(
            request("-- note\n  SHOW TABLES IN SCHEMA X.Y"),
            CancellationToken::new(),
        )
        .unwrap();
    assert!(matches!(response, QueryResponse::Success { .. }));
}

#[test]
fn test_denied_statement_leaves_only_history() {
    let temp = TempDir::new().unwrap();
    let warehouse = Arc::new(ScriptedWarehouse::new());

    let service = QueryService::new(warehouse.clone(), profile(), &test_config(temp.path()))
        .with_timing(fast_timing());

    let sql = "TRUNCATE TABLE orders";
    let err = service
        .execute(request(sql), CancellationToken::new())
        .unwrap_err();

    match err {
        QueryError::Sql(SqlError::Denied {
            safe_alternatives, ..
        }) => {
            assert!(!safe_alternatives.is_empty());
        }
        other => panic!("expected denial, got {:?}", other),
    }

    // Nothing was submitted, no artifact was written.
    assert!(warehouse.submissions().is_empty());
    let store = ArtifactStore::new(&temp.path().join("artifacts"));
    assert!(!store.contains(&sha256_hex(sql.as_bytes())));

    let lines = history_lines(temp.path());
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["status"], "error");
}

#[test]
fn test_short_reason_is_rejected() {
    let temp = TempDir::new().unwrap();
    let service = QueryService::new(
        Arc::new(ScriptedWarehouse::new()),
        profile(),
        &test_config(temp.path()),
    );

    let mut req = request("SELECT 1");
    req.reason = "ok".to_string();
    let err = service.execute(req, CancellationToken::new()).unwrap_err();
    assert!(matches!(err, QueryError::ReasonLength { length: 2, .. }));
}

#[test]
fn test_timeout_cancels_and_guides() {
    let temp = TempDir::new().unwrap();
    let warehouse = Arc::new(ScriptedWarehouse::new());
    warehouse.script(
        "SYSTEM$WAIT",
        Script::RunsFor {
            runtime: Duration::from_secs(60),
            rows: int_rows("id", &[1]),
        },
    );

    let service = QueryService::new(warehouse.clone(), profile(), &test_config(temp.path()))
        .with_timing(fast_timing());

    let mut req = request("SELECT SYSTEM$WAIT(60)");
    req.timeout_seconds = 1;
    let response = service.execute(req, CancellationToken::new()).unwrap();

    let QueryResponse::Timeout {
        query_id, guidance, ..
    } = response
    else {
        panic!("expected timeout");
    };

    // Guidance ordering: catalog filtering, clustering, then raise timeout.
    assert_eq!(guidance.len(), 3);
    assert!(guidance[0].contains("search_catalog"));
    assert!(guidance[1].contains("clustering"));
    assert!(guidance[2].contains("timeout_seconds"));

    // The server-side cancel went out.
    let cancelled = warehouse.cancelled_queries();
    assert_eq!(cancelled.len(), 1);
    assert_eq!(cancelled[0].0, query_id.unwrap());

    let lines = history_lines(temp.path());
    assert_eq!(lines[0]["status"], "timeout");
}

#[test]
fn test_inline_budget_exhaustion_transitions_to_async() {
    let temp = TempDir::new().unwrap();
    let warehouse = Arc::new(ScriptedWarehouse::new());
    warehouse.script(
        "SLOW",
        Script::RunsFor {
            runtime: Duration::from_millis(150),
            rows: int_rows("id", &[7]),
        },
    );

    let timing = SchedulerTiming {
        rpc_budget: Duration::from_millis(40),
        safety_margin: Duration::ZERO,
        poll_interval: Duration::from_millis(5),
    };
    let service = QueryService::new(warehouse, profile(), &test_config(temp.path()))
        .with_timing(timing);

    let response = service
        .execute(request("SELECT SLOW()"), CancellationToken::new())
        .unwrap();

    let QueryResponse::Pending { execution_id, .. } = response else {
        panic!("expected pending");
    };

    // The background poller finishes the query.
    let mut state = None;
    for _ in 0..100 {
        match service.fetch_async(&execution_id) {
            Some(AsyncState::Success { result }) => {
                state = Some(result);
                break;
            }
            Some(_) => std::thread::sleep(Duration::from_millis(10)),
            None => panic!("execution vanished from the registry"),
        }
    }
    let result = state.expect("async execution never completed");
    assert_eq!(result.data.total_rows, 1);

    let lines = history_lines(temp.path());
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["status"], "success");
}

#[test]
fn test_cancellation_token_cancels_server_side() {
    let temp = TempDir::new().unwrap();
    let warehouse = Arc::new(ScriptedWarehouse::new());
    warehouse.script(
        "SLOW",
        Script::RunsFor {
            runtime: Duration::from_secs(60),
            rows: int_rows("id", &[1]),
        },
    );

    let service = QueryService::new(warehouse.clone(), profile(), &test_config(temp.path()))
        .with_timing(fast_timing());

    let cancel = CancellationToken::new();
    cancel.cancel();

    let response = service
        .execute(request("SELECT SLOW()"), cancel)
        .unwrap();
    assert!(matches!(response, QueryResponse::Cancelled { .. }));
    assert_eq!(warehouse.cancelled_queries().len(), 1);

    let lines = history_lines(temp.path());
    assert_eq!(lines[0]["status"], "timeout");
    assert_eq!(lines[0]["error"], "cancelled");
}

#[test]
fn test_warehouse_failure_is_classified() {
    let temp = TempDir::new().unwrap();
    let warehouse = Arc::new(ScriptedWarehouse::new());
    warehouse.script("FROM broken", Script::Fail("Table does not exist".to_string()));

    let service = QueryService::new(warehouse, profile(), &test_config(temp.path()))
        .with_timing(fast_timing());

    let err = service
        .execute(request("SELECT * FROM broken"), CancellationToken::new())
        .unwrap_err();
    match err {
        QueryError::Execution { message, query_id } => {
            assert!(message.contains("does not exist"));
            assert!(query_id.is_some());
        }
        other => panic!("expected execution error, got {:?}", other),
    }

    let lines = history_lines(temp.path());
    assert_eq!(lines[0]["status"], "error");
}

#[test]
fn test_timeout_clamped_into_bounds() {
    let temp = TempDir::new().unwrap();
    let warehouse = Arc::new(ScriptedWarehouse::new());
    let service = QueryService::new(warehouse, profile(), &test_config(temp.path()))
        .with_timing(fast_timing());

    let mut req = request("SELECT 1");
    req.timeout_seconds = 0;
    // Clamped up to the 1s minimum rather than rejected.
    let response = service.execute(req, CancellationToken::new()).unwrap();
    assert!(matches!(response, QueryResponse::Success { .. }));
}
