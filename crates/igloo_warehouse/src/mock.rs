//! Scripted in-memory warehouse for tests.
//!
//! Responses are keyed by SQL substring; the first matching script wins.
//! A script can complete immediately, fail, or stay running for a fixed
//! duration so scheduler tests can exercise the inline-wait / async-poll
//! transition without a real warehouse. Cancel calls are recorded.

use crate::{
    QueryId, QueryStatus, QueryTag, RowSet, SessionContext, WarehouseClient, WarehouseError,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// What a matching statement should do.
#[derive(Debug, Clone)]
pub enum Script {
    /// Complete immediately with these rows.
    Rows(RowSet),
    /// Fail immediately with this message.
    Fail(String),
    /// Report Running until `runtime` has elapsed, then complete.
    RunsFor { runtime: Duration, rows: RowSet },
}

struct InFlight {
    script: Script,
    submitted_at: Instant,
    cancelled: bool,
}

/// Scripted [`WarehouseClient`] implementation.
#[derive(Default)]
pub struct ScriptedWarehouse {
    scripts: Mutex<Vec<(String, Script)>>,
    in_flight: Mutex<HashMap<QueryId, InFlight>>,
    cancelled: Mutex<Vec<QueryId>>,
    session_log: Mutex<Vec<SessionContext>>,
    submitted: Mutex<Vec<(String, QueryTag)>>,
    counter: AtomicU64,
    ping_ok: std::sync::atomic::AtomicBool,
}

impl ScriptedWarehouse {
    pub fn new() -> Self {
        let wh = Self::default();
        wh.ping_ok.store(true, Ordering::SeqCst);
        wh
    }

    /// Register a script matched by SQL substring.
    pub fn script(&self, sql_contains: impl Into<String>, script: Script) {
        self.scripts.lock().unwrap().push((sql_contains.into(), script));
    }

    /// Make `ping` fail (connectivity tests).
    pub fn set_offline(&self) {
        self.ping_ok.store(false, Ordering::SeqCst);
    }

    /// Query ids that received a cancel call.
    pub fn cancelled_queries(&self) -> Vec<QueryId> {
        self.cancelled.lock().unwrap().clone()
    }

    /// Session contexts applied via `set_session_context`, in order.
    pub fn session_history(&self) -> Vec<SessionContext> {
        self.session_log.lock().unwrap().clone()
    }

    /// Statements submitted, with their tags, in order.
    pub fn submissions(&self) -> Vec<(String, QueryTag)> {
        self.submitted.lock().unwrap().clone()
    }

    fn find_script(&self, sql: &str) -> Script {
        let scripts = self.scripts.lock().unwrap();
        for (needle, script) in scripts.iter() {
            if sql.contains(needle.as_str()) {
                return script.clone();
            }
        }
        Script::Rows(RowSet::default())
    }
}

impl WarehouseClient for ScriptedWarehouse {
    fn set_session_context(&self, ctx: &SessionContext) -> Result<(), WarehouseError> {
        self.session_log.lock().unwrap().push(ctx.clone());
        Ok(())
    }

    fn submit(&self, sql: &str, tag: &QueryTag) -> Result<QueryId, WarehouseError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let query_id = QueryId::new(format!("mock-q-{}", n));
        let script = self.find_script(sql);

        self.submitted
            .lock()
            .unwrap()
            .push((sql.to_string(), tag.clone()));
        self.in_flight.lock().unwrap().insert(
            query_id.clone(),
            InFlight {
                script,
                submitted_at: Instant::now(),
                cancelled: false,
            },
        );
        Ok(query_id)
    }

    fn poll(&self, query_id: &QueryId) -> Result<QueryStatus, WarehouseError> {
        let in_flight = self.in_flight.lock().unwrap();
        let entry = in_flight
            .get(query_id)
            .ok_or_else(|| WarehouseError::UnknownQuery(query_id.clone()))?;

        if entry.cancelled {
            return Ok(QueryStatus::Failed {
                message: "Query was cancelled".to_string(),
            });
        }

        Ok(match &entry.script {
            Script::Rows(rows) => QueryStatus::Complete {
                row_count: rows.row_count(),
            },
            Script::Fail(message) => QueryStatus::Failed {
                message: message.clone(),
            },
            Script::RunsFor { runtime, rows } => {
                if entry.submitted_at.elapsed() >= *runtime {
                    QueryStatus::Complete {
                        row_count: rows.row_count(),
                    }
                } else {
                    QueryStatus::Running
                }
            }
        })
    }

    fn fetch(&self, query_id: &QueryId) -> Result<RowSet, WarehouseError> {
        let in_flight = self.in_flight.lock().unwrap();
        let entry = in_flight
            .get(query_id)
            .ok_or_else(|| WarehouseError::UnknownQuery(query_id.clone()))?;

        match &entry.script {
            Script::Rows(rows) => Ok(rows.clone()),
            Script::RunsFor { runtime, rows } => {
                if entry.submitted_at.elapsed() >= *runtime && !entry.cancelled {
                    Ok(rows.clone())
                } else {
                    Err(WarehouseError::QueryFailed {
                        query_id: query_id.clone(),
                        message: "Query has not completed".to_string(),
                    })
                }
            }
            Script::Fail(message) => Err(WarehouseError::QueryFailed {
                query_id: query_id.clone(),
                message: message.clone(),
            }),
        }
    }

    fn cancel(&self, query_id: &QueryId) -> Result<(), WarehouseError> {
        self.cancelled.lock().unwrap().push(query_id.clone());
        if let Some(entry) = self.in_flight.lock().unwrap().get_mut(query_id) {
            entry.cancelled = true;
        }
        Ok(())
    }

    fn ping(&self) -> Result<(), WarehouseError> {
        if self.ping_ok.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(WarehouseError::Connection("scripted offline".to_string()))
        }
    }
}

/// Convenience: a one-column RowSet of integers.
pub fn int_rows(column: &str, values: &[i64]) -> RowSet {
    RowSet::new(
        vec![column.to_string()],
        values.iter().map(|v| vec![serde_json::json!(v)]).collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag() -> QueryTag {
        QueryTag {
            reason: "test".to_string(),
            execution_id: "e-1".to_string(),
        }
    }

    #[test]
    fn test_immediate_rows() {
        let wh = ScriptedWarehouse::new();
        wh.script("FROM t", Script::Rows(int_rows("id", &[1, 2, 3])));

        let qid = wh.submit("SELECT * FROM t", &tag()).unwrap();
        assert_eq!(
            wh.poll(&qid).unwrap(),
            QueryStatus::Complete { row_count: 3 }
        );
        assert_eq!(wh.fetch(&qid).unwrap().row_count(), 3);
    }

    #[test]
    fn test_slow_query_transitions() {
        let wh = ScriptedWarehouse::new();
        wh.script(
            "SLOW",
            Script::RunsFor {
                runtime: Duration::from_millis(50),
                rows: int_rows("id", &[1]),
            },
        );

        let qid = wh.submit("SELECT SLOW()", &tag()).unwrap();
        assert_eq!(wh.poll(&qid).unwrap(), QueryStatus::Running);
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(
            wh.poll(&qid).unwrap(),
            QueryStatus::Complete { row_count: 1 }
        );
    }

    #[test]
    fn test_cancel_recorded() {
        let wh = ScriptedWarehouse::new();
        wh.script(
            "SLOW",
            Script::RunsFor {
                runtime: Duration::from_secs(60),
                rows: RowSet::default(),
            },
        );

        let qid = wh.submit("SELECT SLOW()", &tag()).unwrap();
        wh.cancel(&qid).unwrap();
        assert_eq!(wh.cancelled_queries(), vec![qid.clone()]);
        assert!(matches!(wh.poll(&qid).unwrap(), QueryStatus::Failed { .. }));
    }

    #[test]
    fn test_unmatched_sql_returns_empty() {
        let wh = ScriptedWarehouse::new();
        let qid = wh.submit("SELECT 1", &tag()).unwrap();
        assert_eq!(
            wh.poll(&qid).unwrap(),
            QueryStatus::Complete { row_count: 0 }
        );
    }
}
