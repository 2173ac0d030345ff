//! Catalog build tests against a scripted warehouse and real files.

use igloo_catalog::{
    load_summary, CatalogBuildRequest, CatalogBuilder, CatalogFormat, CatalogScope, ObjectType,
};
use igloo_catalog::summary::load_objects;
use igloo_warehouse::mock::{Script, ScriptedWarehouse};
use igloo_warehouse::RowSet;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

fn rows(columns: &[&str], data: Vec<Vec<serde_json::Value>>) -> RowSet {
    RowSet::new(columns.iter().map(|c| c.to_string()).collect(), data)
}

/// A warehouse scripted with one database, one schema, two tables and a
/// view, one user-defined function next to a built-in.
fn scripted() -> Arc<ScriptedWarehouse> {
    let wh = Arc::new(ScriptedWarehouse::new());

    wh.script(
        "ANALYTICS.INFORMATION_SCHEMA.SCHEMATA",
        Script::Rows(rows(&["SCHEMA_NAME"], vec![vec![json!("PUBLIC")]])),
    );
    wh.script(
        "ANALYTICS.INFORMATION_SCHEMA.COLUMNS",
        Script::Rows(rows(
            &["TABLE_NAME", "COLUMN_NAME", "DATA_TYPE", "ORDINAL_POSITION"],
            vec![
                vec![json!("ORDERS"), json!("ID"), json!("NUMBER"), json!(1)],
                vec![json!("ORDERS"), json!("AMOUNT"), json!("FLOAT"), json!(2)],
                vec![json!("ORDERS_V"), json!("ID"), json!("NUMBER"), json!(1)],
            ],
        )),
    );
    wh.script(
        "ANALYTICS.INFORMATION_SCHEMA.TABLES",
        Script::Rows(rows(
            &["TABLE_NAME", "TABLE_TYPE", "ROW_COUNT", "LAST_ALTERED", "COMMENT"],
            vec![
                vec![
                    json!("ORDERS"),
                    json!("BASE TABLE"),
                    json!(120),
                    json!("2026-01-10T00:00:00Z"),
                    json!(null),
                ],
                vec![
                    json!("ORDERS_V"),
                    json!("VIEW"),
                    json!(null),
                    json!("2026-01-11T00:00:00Z"),
                    json!("daily view"),
                ],
            ],
        )),
    );
    wh.script(
        "GET_DDL('TABLE', 'ANALYTICS.PUBLIC.ORDERS')",
        Script::Rows(rows(
            &["DDL"],
            vec![vec![json!("CREATE TABLE ORDERS (ID NUMBER, AMOUNT FLOAT)")]],
        )),
    );
    wh.script(
        "GET_DDL('VIEW', 'ANALYTICS.PUBLIC.ORDERS_V')",
        Script::Rows(rows(
            &["DDL"],
            vec![vec![json!(
                "CREATE VIEW ORDERS_V AS SELECT ID FROM ANALYTICS.PUBLIC.ORDERS"
            )]],
        )),
    );
    wh.script(
        "ANALYTICS.INFORMATION_SCHEMA.FUNCTIONS",
        Script::Rows(rows(
            &["FUNCTION_NAME", "DATA_TYPE", "LAST_ALTERED", "IS_BUILTIN"],
            vec![
                vec![json!("MY_UDF"), json!("NUMBER"), json!(null), json!("NO")],
                vec![json!("SQRT"), json!("FLOAT"), json!(null), json!("YES")],
            ],
        )),
    );
    wh.script(
        "ANALYTICS.INFORMATION_SCHEMA.PROCEDURES",
        Script::Rows(rows(&["PROCEDURE_NAME", "LAST_ALTERED"], vec![])),
    );

    wh
}

fn builder(wh: Arc<ScriptedWarehouse>, root: &std::path::Path) -> CatalogBuilder {
    CatalogBuilder::new(wh, root, 4, 2)
}

#[test]
fn test_database_build_writes_three_files() {
    let temp = TempDir::new().unwrap();
    let wh = scripted();
    let result = builder(wh.clone(), temp.path())
        .build(&CatalogBuildRequest {
            scope: CatalogScope::Database("ANALYTICS".to_string()),
            output_dir: None,
            format: CatalogFormat::Json,
            incremental: false,
        })
        .unwrap();

    assert_eq!(result.databases, vec!["ANALYTICS".to_string()]);
    assert_eq!(result.totals.tables, 1);
    assert_eq!(result.totals.views, 1);
    assert_eq!(result.totals.functions, 1);
    assert_eq!(result.totals.schemas, 1);
    assert_eq!(result.totals.columns, 3);
    assert!(result.warnings.is_empty());

    let dir = temp.path().join("analytics");
    assert!(dir.join("catalog.json").exists());
    assert!(dir.join("catalog_summary.json").exists());
    assert!(dir.join("_catalog_metadata.json").exists());

    let objects = load_objects(&dir).unwrap();
    assert_eq!(objects.len(), 3);
    let orders = objects
        .iter()
        .find(|o| o.name == "ORDERS" && o.object_type == ObjectType::Table)
        .unwrap();
    assert_eq!(orders.columns.len(), 2);
    assert!(orders.ddl.as_ref().unwrap().contains("CREATE TABLE"));

    // Built-in functions are excluded.
    assert!(!objects.iter().any(|o| o.name == "SQRT"));

    let summary = load_summary(&dir).unwrap();
    assert_eq!(summary.database, "ANALYTICS");
    assert_eq!(summary.per_schema.get("PUBLIC"), Some(&3));
}

#[test]
fn test_jsonl_format_streams_objects() {
    let temp = TempDir::new().unwrap();
    let wh = scripted();
    builder(wh, temp.path())
        .build(&CatalogBuildRequest {
            scope: CatalogScope::Database("ANALYTICS".to_string()),
            output_dir: None,
            format: CatalogFormat::Jsonl,
            incremental: false,
        })
        .unwrap();

    let dir = temp.path().join("analytics");
    let content = std::fs::read_to_string(dir.join("catalog.jsonl")).unwrap();
    assert_eq!(content.lines().count(), 3);
    // Each line parses on its own.
    for line in content.lines() {
        let value: serde_json::Value = serde_json::from_str(line).unwrap();
        assert!(value["name"].is_string());
    }
    let objects = load_objects(&dir).unwrap();
    assert_eq!(objects.len(), 3);
}

#[test]
fn test_current_scope_writes_under_current() {
    let temp = TempDir::new().unwrap();
    let wh = scripted();
    builder(wh, temp.path())
        .build(&CatalogBuildRequest {
            scope: CatalogScope::Current("ANALYTICS".to_string()),
            output_dir: None,
            format: CatalogFormat::Json,
            incremental: false,
        })
        .unwrap();

    assert!(temp.path().join("current/catalog.json").exists());
}

#[test]
fn test_incremental_reuses_unchanged_objects() {
    let temp = TempDir::new().unwrap();
    let wh = scripted();
    let builder = builder(wh.clone(), temp.path());
    let req = CatalogBuildRequest {
        scope: CatalogScope::Database("ANALYTICS".to_string()),
        output_dir: None,
        format: CatalogFormat::Json,
        incremental: false,
    };
    builder.build(&req).unwrap();

    let ddl_calls_after_first = wh
        .submissions()
        .iter()
        .filter(|(sql, _)| sql.contains("GET_DDL"))
        .count();
    assert_eq!(ddl_calls_after_first, 2);

    // Everything's LAST_ALTERED predates the first build, so the second,
    // incremental build fetches no DDL at all.
    let result = builder
        .build(&CatalogBuildRequest {
            incremental: true,
            ..req
        })
        .unwrap();
    assert_eq!(result.reused_objects, 2);

    let ddl_calls_after_second = wh
        .submissions()
        .iter()
        .filter(|(sql, _)| sql.contains("GET_DDL"))
        .count();
    assert_eq!(ddl_calls_after_second, 2);

    // The reused objects are still present in the fresh output.
    let objects = load_objects(&temp.path().join("analytics")).unwrap();
    assert_eq!(objects.len(), 3);
}

#[test]
fn test_ddl_failure_is_a_warning_not_an_error() {
    let temp = TempDir::new().unwrap();
    let wh = Arc::new(ScriptedWarehouse::new());
    wh.script(
        "ANALYTICS.INFORMATION_SCHEMA.SCHEMATA",
        Script::Rows(rows(&["SCHEMA_NAME"], vec![vec![json!("PUBLIC")]])),
    );
    wh.script(
        "ANALYTICS.INFORMATION_SCHEMA.COLUMNS",
        Script::Rows(rows(
            &["TABLE_NAME", "COLUMN_NAME", "DATA_TYPE", "ORDINAL_POSITION"],
            vec![],
        )),
    );
    wh.script(
        "ANALYTICS.INFORMATION_SCHEMA.TABLES",
        Script::Rows(rows(
            &["TABLE_NAME", "TABLE_TYPE", "ROW_COUNT", "LAST_ALTERED", "COMMENT"],
            vec![vec![
                json!("ORDERS"),
                json!("BASE TABLE"),
                json!(1),
                json!(null),
                json!(null),
            ]],
        )),
    );
    wh.script("GET_DDL", Script::Fail("insufficient privileges".to_string()));

    let result = builder(wh, temp.path())
        .build(&CatalogBuildRequest {
            scope: CatalogScope::Database("ANALYTICS".to_string()),
            output_dir: None,
            format: CatalogFormat::Json,
            incremental: false,
        })
        .unwrap();

    assert_eq!(result.totals.tables, 1);
    assert_eq!(result.warnings.len(), 1);
    assert_eq!(result.warnings[0].code, "ddl_failed");
    assert!(result.warnings[0].message.contains("insufficient privileges"));

    // Object is present, just without DDL.
    let objects = load_objects(&temp.path().join("analytics")).unwrap();
    assert!(objects[0].ddl.is_none());
}

#[test]
fn test_account_scope_enumerates_databases() {
    let temp = TempDir::new().unwrap();
    let wh = scripted();
    wh.script(
        "SNOWFLAKE.INFORMATION_SCHEMA.DATABASES",
        Script::Rows(rows(&["DATABASE_NAME"], vec![vec![json!("ANALYTICS")]])),
    );

    let result = builder(wh, temp.path())
        .build(&CatalogBuildRequest {
            scope: CatalogScope::Account,
            output_dir: None,
            format: CatalogFormat::Json,
            incremental: false,
        })
        .unwrap();
    assert_eq!(result.databases, vec!["ANALYTICS".to_string()]);
    assert!(temp.path().join("analytics/catalog.json").exists());
}
