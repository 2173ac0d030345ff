//! Catalog build orchestration.
//!
//! Phase 1 (sequential): enumerate databases and schemas. Phase 2: a
//! bounded pool of worker threads crawls one schema at a time, fetching
//! object lists, columns, and DDL. DDL calls additionally pass through a
//! permit gate capped at `max_ddl_concurrency` so the warehouse side
//! never sees unbounded overlapping GET_DDL requests.

use crate::model::{
    CatalogFormat, CatalogMetadata, CatalogObject, CatalogSummary, CatalogTotals, CatalogWarning,
    ColumnInfo, ObjectType, WarningSeverity,
};
use crate::CatalogError;
use chrono::{DateTime, Utc};
use igloo_core::fsio;
use igloo_warehouse::{QueryStatus, QueryTag, RowSet, WarehouseClient};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// What to crawl.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogScope {
    /// Every database visible to the role.
    Account,
    /// One named database.
    Database(String),
    /// The profile's current database, written under `current/`.
    Current(String),
}

#[derive(Debug, Clone)]
pub struct CatalogBuildRequest {
    pub scope: CatalogScope,
    /// Overrides the configured catalog root when set.
    pub output_dir: Option<PathBuf>,
    pub format: CatalogFormat,
    pub incremental: bool,
}

/// Outcome of one build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogBuildResult {
    pub databases: Vec<String>,
    pub output_dir: PathBuf,
    pub format: CatalogFormat,
    pub incremental: bool,
    pub totals: CatalogTotals,
    pub warnings: Vec<CatalogWarning>,
    pub duration_ms: u64,
    /// Objects reused from the previous build (incremental only).
    pub reused_objects: usize,
}

pub struct CatalogBuilder {
    client: Arc<dyn WarehouseClient>,
    catalog_root: PathBuf,
    concurrency: usize,
    max_ddl_concurrency: usize,
}

impl CatalogBuilder {
    pub fn new(
        client: Arc<dyn WarehouseClient>,
        catalog_root: &Path,
        concurrency: usize,
        max_ddl_concurrency: usize,
    ) -> Self {
        Self {
            client,
            catalog_root: catalog_root.to_path_buf(),
            concurrency: concurrency.max(1),
            max_ddl_concurrency: max_ddl_concurrency.max(1),
        }
    }

    pub fn build(&self, req: &CatalogBuildRequest) -> Result<CatalogBuildResult, CatalogError> {
        let started = Instant::now();
        let root = req
            .output_dir
            .clone()
            .unwrap_or_else(|| self.catalog_root.clone());

        let mut warnings = Vec::new();
        let databases = self.plan_databases(&req.scope, &mut warnings)?;
        info!("Catalog build plan: {} database(s)", databases.len());

        let mut totals = CatalogTotals::default();
        let mut reused_total = 0;
        for database in &databases {
            let dir = match &req.scope {
                CatalogScope::Current(_) => root.join("current"),
                _ => root.join(database.to_lowercase()),
            };
            let (db_totals, reused) =
                self.crawl_database(database, &dir, req.format, req.incremental, &mut warnings)?;
            totals.schemas += db_totals.schemas;
            totals.tables += db_totals.tables;
            totals.views += db_totals.views;
            totals.functions += db_totals.functions;
            totals.procedures += db_totals.procedures;
            totals.columns += db_totals.columns;
            reused_total += reused;
        }

        Ok(CatalogBuildResult {
            databases,
            output_dir: root,
            format: req.format,
            incremental: req.incremental,
            totals,
            warnings,
            duration_ms: started.elapsed().as_millis() as u64,
            reused_objects: reused_total,
        })
    }

    fn plan_databases(
        &self,
        scope: &CatalogScope,
        warnings: &mut Vec<CatalogWarning>,
    ) -> Result<Vec<String>, CatalogError> {
        match scope {
            CatalogScope::Database(name) | CatalogScope::Current(name) => Ok(vec![name.clone()]),
            CatalogScope::Account => {
                let rows = run_query(
                    self.client.as_ref(),
                    "SELECT DATABASE_NAME FROM SNOWFLAKE.INFORMATION_SCHEMA.DATABASES ORDER BY DATABASE_NAME",
                )?;
                let idx = column_index(&rows, "DATABASE_NAME").ok_or_else(|| {
                    CatalogError::Data("DATABASES result is missing DATABASE_NAME".to_string())
                })?;
                let names: Vec<String> = rows
                    .rows
                    .iter()
                    .filter_map(|row| value_str(row, idx))
                    .collect();
                if names.is_empty() {
                    warnings.push(CatalogWarning {
                        code: "no_databases".to_string(),
                        message: "The account scope returned no databases".to_string(),
                        severity: WarningSeverity::Warning,
                        context: "account".to_string(),
                    });
                }
                Ok(names)
            }
        }
    }

    /// Crawl one database with the worker pool and write its three files.
    fn crawl_database(
        &self,
        database: &str,
        dir: &Path,
        format: CatalogFormat,
        incremental: bool,
        warnings: &mut Vec<CatalogWarning>,
    ) -> Result<(CatalogTotals, usize), CatalogError> {
        let previous = if incremental {
            load_previous(dir)
        } else {
            None
        };
        let since = previous.as_ref().map(|(meta, _)| meta.last_build);

        let schemas = self.list_schemas(database, warnings)?;
        debug!("{}: {} schema(s)", database, schemas.len());

        let ddl_gate = Semaphore::new(self.max_ddl_concurrency);
        let (task_tx, task_rx) = mpsc::channel::<String>();
        let task_rx = Arc::new(Mutex::new(task_rx));
        let (msg_tx, msg_rx) = mpsc::channel::<WorkerMsg>();

        for schema in &schemas {
            task_tx
                .send(schema.clone())
                .expect("task channel closed before work was queued");
        }
        drop(task_tx);

        let worker_count = self.concurrency.min(schemas.len().max(1));
        let reused = std::thread::scope(|scope| {
            for _ in 0..worker_count {
                let task_rx = Arc::clone(&task_rx);
                let msg_tx = msg_tx.clone();
                let ddl_gate = &ddl_gate;
                let client = self.client.as_ref();
                let prev_objects = previous.as_ref().map(|(_, objects)| objects);
                scope.spawn(move || {
                    loop {
                        let schema = {
                            let rx = task_rx.lock().unwrap();
                            rx.recv()
                        };
                        let Ok(schema) = schema else { break };
                        crawl_schema(
                            client,
                            database,
                            &schema,
                            since,
                            prev_objects,
                            ddl_gate,
                            &msg_tx,
                        );
                    }
                });
            }
            drop(msg_tx);

            // The writer runs on this thread, streaming as results arrive.
            self.write_outputs(database, dir, format, msg_rx, warnings, incremental)
        })?;

        Ok(reused)
    }

    fn list_schemas(
        &self,
        database: &str,
        warnings: &mut Vec<CatalogWarning>,
    ) -> Result<Vec<String>, CatalogError> {
        let sql = format!(
            "SELECT SCHEMA_NAME FROM {}.INFORMATION_SCHEMA.SCHEMATA \
             WHERE SCHEMA_NAME <> 'INFORMATION_SCHEMA' ORDER BY SCHEMA_NAME",
            database
        );
        // A failed schema listing degrades to an empty database with a
        // warning; other databases in the plan still build.
        let rows = match run_query(self.client.as_ref(), &sql) {
            Ok(rows) => rows,
            Err(e) => {
                warnings.push(CatalogWarning {
                    code: "schema_list_failed".to_string(),
                    message: e.to_string(),
                    severity: WarningSeverity::Error,
                    context: database.to_string(),
                });
                return Ok(vec![]);
            }
        };
        let Some(idx) = column_index(&rows, "SCHEMA_NAME") else {
            warnings.push(CatalogWarning {
                code: "schema_list_failed".to_string(),
                message: "SCHEMATA result is missing SCHEMA_NAME".to_string(),
                severity: WarningSeverity::Error,
                context: database.to_string(),
            });
            return Ok(vec![]);
        };
        Ok(rows.rows.iter().filter_map(|r| value_str(r, idx)).collect())
    }

    /// Drain worker messages into the output files. Returns totals plus
    /// the reused-object count.
    fn write_outputs(
        &self,
        database: &str,
        dir: &Path,
        format: CatalogFormat,
        msg_rx: Receiver<WorkerMsg>,
        warnings: &mut Vec<CatalogWarning>,
        incremental: bool,
    ) -> Result<(CatalogTotals, usize), CatalogError> {
        std::fs::create_dir_all(dir)?;
        let catalog_path = dir.join(format.file_name());
        let tmp_path = fsio::tmp_path_for(&catalog_path);

        let mut totals = CatalogTotals::default();
        let mut per_schema: BTreeMap<String, usize> = BTreeMap::new();
        let mut schema_seen: std::collections::BTreeSet<String> = Default::default();
        let mut reused = 0;

        let mut jsonl = match format {
            CatalogFormat::Jsonl => Some(BufWriter::new(File::create(&tmp_path)?)),
            CatalogFormat::Json => None,
        };
        let mut buffered: Vec<CatalogObject> = Vec::new();

        for msg in msg_rx {
            match msg {
                WorkerMsg::Object { object, was_reused } => {
                    if was_reused {
                        reused += 1;
                    }
                    schema_seen.insert(object.schema.clone());
                    *per_schema.entry(object.schema.clone()).or_insert(0) += 1;
                    match object.object_type {
                        ObjectType::Table => totals.tables += 1,
                        ObjectType::View => totals.views += 1,
                        ObjectType::Function => totals.functions += 1,
                        ObjectType::Procedure => totals.procedures += 1,
                    }
                    totals.columns += object.columns.len();

                    match (&mut jsonl, format) {
                        (Some(writer), CatalogFormat::Jsonl) => {
                            let line = serde_json::to_string(&object)
                                .map_err(|e| CatalogError::Data(e.to_string()))?;
                            writeln!(writer, "{}", line)?;
                        }
                        _ => buffered.push(object),
                    }
                }
                WorkerMsg::Warning(warning) => warnings.push(warning),
            }
        }
        totals.schemas = schema_seen.len();

        match format {
            CatalogFormat::Jsonl => {
                let mut writer = jsonl.expect("jsonl writer must exist");
                writer.flush()?;
                writer.get_ref().sync_all()?;
                drop(writer);
                std::fs::rename(&tmp_path, &catalog_path)?;
            }
            CatalogFormat::Json => {
                fsio::atomic_write_json(&catalog_path, &buffered)?;
            }
        }

        let now = Utc::now();
        let last_full_refresh = if incremental {
            load_metadata(dir).map(|m| m.last_full_refresh).unwrap_or(now)
        } else {
            now
        };
        fsio::atomic_write_json(
            &dir.join("catalog_summary.json"),
            &CatalogSummary {
                database: database.to_string(),
                totals: totals.clone(),
                per_schema,
                last_build: now,
            },
        )?;
        fsio::atomic_write_json(
            &dir.join("_catalog_metadata.json"),
            &CatalogMetadata {
                database: database.to_string(),
                last_build: now,
                last_full_refresh,
                format,
            },
        )?;

        Ok((totals, reused))
    }
}

enum WorkerMsg {
    Object {
        object: CatalogObject,
        was_reused: bool,
    },
    Warning(CatalogWarning),
}

/// Crawl one schema: tables/views with columns and DDL, user-defined
/// functions, procedures. Failures degrade to warnings.
fn crawl_schema(
    client: &dyn WarehouseClient,
    database: &str,
    schema: &str,
    since: Option<DateTime<Utc>>,
    previous: Option<&HashMap<String, CatalogObject>>,
    ddl_gate: &Semaphore,
    msg_tx: &Sender<WorkerMsg>,
) {
    let context = format!("{}.{}", database, schema);

    // Columns first so tables can be hydrated in one pass.
    let mut columns_by_table: HashMap<String, Vec<ColumnInfo>> = HashMap::new();
    let columns_sql = format!(
        "SELECT TABLE_NAME, COLUMN_NAME, DATA_TYPE, ORDINAL_POSITION \
         FROM {}.INFORMATION_SCHEMA.COLUMNS WHERE TABLE_SCHEMA = '{}' \
         ORDER BY TABLE_NAME, ORDINAL_POSITION",
        database, schema
    );
    match run_query(client, &columns_sql) {
        Ok(rows) => {
            let table_idx = column_index(&rows, "TABLE_NAME");
            let name_idx = column_index(&rows, "COLUMN_NAME");
            let type_idx = column_index(&rows, "DATA_TYPE");
            let pos_idx = column_index(&rows, "ORDINAL_POSITION");
            if let (Some(ti), Some(ni), Some(dti)) = (table_idx, name_idx, type_idx) {
                for row in &rows.rows {
                    let (Some(table), Some(name), Some(data_type)) =
                        (value_str(row, ti), value_str(row, ni), value_str(row, dti))
                    else {
                        continue;
                    };
                    let position = pos_idx
                        .and_then(|pi| row.get(pi))
                        .and_then(|v| v.as_u64())
                        .unwrap_or(0) as u32;
                    columns_by_table.entry(table).or_default().push(ColumnInfo {
                        name,
                        data_type,
                        position,
                    });
                }
            }
        }
        Err(e) => send_warning(msg_tx, "columns_failed", &context, &e),
    }

    // Tables and views.
    let tables_sql = format!(
        "SELECT TABLE_NAME, TABLE_TYPE, ROW_COUNT, LAST_ALTERED, COMMENT \
         FROM {}.INFORMATION_SCHEMA.TABLES WHERE TABLE_SCHEMA = '{}' ORDER BY TABLE_NAME",
        database, schema
    );
    match run_query(client, &tables_sql) {
        Ok(rows) => {
            let name_idx = column_index(&rows, "TABLE_NAME");
            let type_idx = column_index(&rows, "TABLE_TYPE");
            let rowc_idx = column_index(&rows, "ROW_COUNT");
            let altered_idx = column_index(&rows, "LAST_ALTERED");
            let comment_idx = column_index(&rows, "COMMENT");
            if let (Some(ni), Some(ti)) = (name_idx, type_idx) {
                for row in &rows.rows {
                    let (Some(name), Some(table_type)) = (value_str(row, ni), value_str(row, ti))
                    else {
                        continue;
                    };
                    let object_type = if table_type.eq_ignore_ascii_case("VIEW") {
                        ObjectType::View
                    } else {
                        ObjectType::Table
                    };
                    let last_altered = altered_idx
                        .and_then(|i| value_str(row, i))
                        .and_then(|s| parse_timestamp(&s));

                    let qualified = format!("{}.{}.{}", database, schema, name);
                    // Incremental: reuse unchanged objects from the last build.
                    if let (Some(since), Some(prev)) = (since, previous) {
                        let unchanged = last_altered.map(|la| la <= since).unwrap_or(false);
                        if unchanged {
                            if let Some(existing) = prev.get(&qualified) {
                                let _ = msg_tx.send(WorkerMsg::Object {
                                    object: existing.clone(),
                                    was_reused: true,
                                });
                                continue;
                            }
                        }
                    }

                    let ddl = {
                        let _permit = ddl_gate.acquire();
                        let kind = match object_type {
                            ObjectType::View => "VIEW",
                            _ => "TABLE",
                        };
                        let ddl_sql =
                            format!("SELECT GET_DDL('{}', '{}') AS DDL", kind, qualified);
                        match run_query(client, &ddl_sql) {
                            Ok(ddl_rows) => ddl_rows
                                .rows
                                .first()
                                .and_then(|r| r.first())
                                .and_then(|v| v.as_str().map(|s| s.to_string())),
                            Err(e) => {
                                send_warning(
                                    msg_tx,
                                    "ddl_failed",
                                    &format!("{} ddl", qualified),
                                    &e,
                                );
                                None
                            }
                        }
                    };

                    let object = CatalogObject {
                        database: database.to_string(),
                        schema: schema.to_string(),
                        name: name.clone(),
                        object_type,
                        columns: columns_by_table.remove(&name).unwrap_or_default(),
                        ddl,
                        last_altered,
                        row_count: rowc_idx.and_then(|i| row.get(i)).and_then(|v| v.as_u64()),
                        comment: comment_idx.and_then(|i| value_str(row, i)),
                    };
                    let _ = msg_tx.send(WorkerMsg::Object {
                        object,
                        was_reused: false,
                    });
                }
            }
        }
        Err(e) => send_warning(msg_tx, "table_list_failed", &context, &e),
    }

    // User-defined functions only; built-ins are excluded.
    let functions_sql = format!(
        "SELECT FUNCTION_NAME, DATA_TYPE, LAST_ALTERED, IS_BUILTIN \
         FROM {}.INFORMATION_SCHEMA.FUNCTIONS WHERE FUNCTION_SCHEMA = '{}'",
        database, schema
    );
    match run_query(client, &functions_sql) {
        Ok(rows) => {
            let name_idx = column_index(&rows, "FUNCTION_NAME");
            let builtin_idx = column_index(&rows, "IS_BUILTIN");
            let altered_idx = column_index(&rows, "LAST_ALTERED");
            if let Some(ni) = name_idx {
                for row in &rows.rows {
                    let Some(name) = value_str(row, ni) else { continue };
                    let is_builtin = builtin_idx
                        .and_then(|i| value_str(row, i))
                        .map(|v| v.eq_ignore_ascii_case("YES"))
                        .unwrap_or(false);
                    if is_builtin {
                        continue;
                    }
                    let _ = msg_tx.send(WorkerMsg::Object {
                        object: CatalogObject {
                            database: database.to_string(),
                            schema: schema.to_string(),
                            name,
                            object_type: ObjectType::Function,
                            columns: vec![],
                            ddl: None,
                            last_altered: altered_idx
                                .and_then(|i| value_str(row, i))
                                .and_then(|s| parse_timestamp(&s)),
                            row_count: None,
                            comment: None,
                        },
                        was_reused: false,
                    });
                }
            }
        }
        Err(e) => send_warning(msg_tx, "function_list_failed", &context, &e),
    }

    let procedures_sql = format!(
        "SELECT PROCEDURE_NAME, LAST_ALTERED \
         FROM {}.INFORMATION_SCHEMA.PROCEDURES WHERE PROCEDURE_SCHEMA = '{}'",
        database, schema
    );
    match run_query(client, &procedures_sql) {
        Ok(rows) => {
            if let Some(ni) = column_index(&rows, "PROCEDURE_NAME") {
                let altered_idx = column_index(&rows, "LAST_ALTERED");
                for row in &rows.rows {
                    let Some(name) = value_str(row, ni) else { continue };
                    let _ = msg_tx.send(WorkerMsg::Object {
                        object: CatalogObject {
                            database: database.to_string(),
                            schema: schema.to_string(),
                            name,
                            object_type: ObjectType::Procedure,
                            columns: vec![],
                            ddl: None,
                            last_altered: altered_idx
                                .and_then(|i| value_str(row, i))
                                .and_then(|s| parse_timestamp(&s)),
                            row_count: None,
                            comment: None,
                        },
                        was_reused: false,
                    });
                }
            }
        }
        Err(e) => send_warning(msg_tx, "procedure_list_failed", &context, &e),
    }
}

fn send_warning(tx: &Sender<WorkerMsg>, code: &str, context: &str, error: &CatalogError) {
    warn!("Catalog {}: {}: {}", code, context, error);
    let _ = tx.send(WorkerMsg::Warning(CatalogWarning {
        code: code.to_string(),
        message: error.to_string(),
        severity: WarningSeverity::Warning,
        context: context.to_string(),
    }));
}

/// Synchronous submit → poll → fetch against the warehouse seam.
fn run_query(client: &dyn WarehouseClient, sql: &str) -> Result<RowSet, CatalogError> {
    let tag = QueryTag {
        reason: "catalog build".to_string(),
        execution_id: String::new(),
    };
    let query_id = client.submit(sql, &tag)?;
    loop {
        match client.poll(&query_id)? {
            QueryStatus::Complete { .. } => return Ok(client.fetch(&query_id)?),
            QueryStatus::Failed { message } => {
                return Err(CatalogError::Data(message));
            }
            QueryStatus::Running => std::thread::sleep(Duration::from_millis(10)),
        }
    }
}

fn column_index(rows: &RowSet, name: &str) -> Option<usize> {
    rows.columns
        .iter()
        .position(|c| c.eq_ignore_ascii_case(name))
}

fn value_str(row: &[serde_json::Value], idx: usize) -> Option<String> {
    row.get(idx).and_then(|v| match v {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Null => None,
        other => Some(other.to_string()),
    })
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

fn load_metadata(dir: &Path) -> Option<CatalogMetadata> {
    let bytes = std::fs::read(dir.join("_catalog_metadata.json")).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Previous metadata + objects keyed by qualified name, for incremental.
fn load_previous(dir: &Path) -> Option<(CatalogMetadata, HashMap<String, CatalogObject>)> {
    let meta = load_metadata(dir)?;
    let objects = crate::summary::load_objects(dir).ok()?;
    let map = objects
        .into_iter()
        .map(|o| (o.qualified_name(), o))
        .collect();
    Some((meta, map))
}

/// Counting semaphore (Mutex + Condvar); MSRV predates std::sync versions.
pub(crate) struct Semaphore {
    permits: Mutex<usize>,
    cv: Condvar,
}

impl Semaphore {
    pub(crate) fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits),
            cv: Condvar::new(),
        }
    }

    pub(crate) fn acquire(&self) -> SemaphoreGuard<'_> {
        let mut permits = self.permits.lock().unwrap();
        while *permits == 0 {
            permits = self.cv.wait(permits).unwrap();
        }
        *permits -= 1;
        SemaphoreGuard { sem: self }
    }
}

pub(crate) struct SemaphoreGuard<'a> {
    sem: &'a Semaphore,
}

impl Drop for SemaphoreGuard<'_> {
    fn drop(&mut self) {
        let mut permits = self.sem.permits.lock().unwrap();
        *permits += 1;
        self.sem.cv.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_semaphore_bounds_concurrency() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let sem = Arc::new(Semaphore::new(2));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let sem = Arc::clone(&sem);
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            handles.push(std::thread::spawn(move || {
                let _permit = sem.acquire();
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(10));
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn test_column_index_case_insensitive() {
        let rows = RowSet::new(vec!["Schema_Name".to_string()], vec![]);
        assert_eq!(column_index(&rows, "SCHEMA_NAME"), Some(0));
        assert_eq!(column_index(&rows, "MISSING"), None);
    }

    #[test]
    fn test_parse_timestamp() {
        assert!(parse_timestamp("2026-07-01T10:00:00Z").is_some());
        assert!(parse_timestamp("not a time").is_none());
    }
}
