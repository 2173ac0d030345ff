//! Append-only query history.
//!
//! One JSON object per line. Writes are best-effort: a history failure is
//! logged and swallowed, never surfaced to the caller. The writer is
//! protected by a mutex so concurrent requests append whole lines.
//!
//! # Log Format
//!
//! ```json
//! {"execution_id":"...","ts":"2026-07-01T10:30:00Z","status":"success","rowcount":42,...}
//! ```

use chrono::{DateTime, Utc};
use igloo_warehouse::SessionContext;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::warn;

/// Terminal status of one query request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOutcome {
    Success,
    Timeout,
    Error,
    CacheHit,
}

/// One history line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryEvent {
    pub execution_id: String,
    pub ts: DateTime<Utc>,
    pub profile: String,
    pub session_context: SessionContext,
    /// First 200 chars of the statement.
    pub statement_preview: String,
    pub sql_sha256: String,
    pub timeout_seconds: u64,
    pub reason: String,
    pub source_databases: Vec<String>,
    pub tables: Vec<String>,
    pub status: QueryOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rowcount: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

pub const STATEMENT_PREVIEW_CHARS: usize = 200;

/// Truncate a statement to its history preview.
pub fn statement_preview(statement: &str) -> String {
    statement.chars().take(STATEMENT_PREVIEW_CHARS).collect()
}

/// Best-effort JSONL history writer.
///
/// Constructed with `None` when history is disabled; every record call is
/// then a no-op.
#[derive(Debug)]
pub struct HistoryLog {
    inner: Option<HistoryInner>,
}

#[derive(Debug)]
struct HistoryInner {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl HistoryLog {
    /// Open (or disable, with `None`) the history log.
    ///
    /// Open failures degrade to disabled with a warning; history must
    /// never block query execution.
    pub fn open(path: Option<PathBuf>) -> Self {
        let inner = path.and_then(|path| {
            if let Some(parent) = path.parent() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    warn!("History disabled, cannot create {}: {}", parent.display(), e);
                    return None;
                }
            }
            match OpenOptions::new().create(true).append(true).open(&path) {
                Ok(file) => Some(HistoryInner {
                    path,
                    writer: Mutex::new(BufWriter::new(file)),
                }),
                Err(e) => {
                    warn!("History disabled, cannot open {}: {}", path.display(), e);
                    None
                }
            }
        });
        Self { inner }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    pub fn path(&self) -> Option<&PathBuf> {
        self.inner.as_ref().map(|i| &i.path)
    }

    /// Append one event. Best-effort: failures are logged and swallowed.
    pub fn record(&self, event: &QueryEvent) {
        let Some(inner) = &self.inner else {
            return;
        };
        let json = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize history event: {}", e);
                return;
            }
        };
        let Ok(mut writer) = inner.writer.lock() else {
            warn!("History writer lock poisoned");
            return;
        };
        if let Err(e) = writeln!(writer, "{}", json).and_then(|_| writer.flush()) {
            warn!("Failed to append history event: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn event(status: QueryOutcome) -> QueryEvent {
        QueryEvent {
            execution_id: "e-1".to_string(),
            ts: Utc::now(),
            profile: "dev".to_string(),
            session_context: SessionContext::default(),
            statement_preview: "SELECT 1".to_string(),
            sql_sha256: "abc".to_string(),
            timeout_seconds: 30,
            reason: "testing".to_string(),
            source_databases: vec![],
            tables: vec![],
            status,
            rowcount: Some(1),
            duration_ms: Some(12),
            query_id: Some("q-1".to_string()),
            error: None,
            request_id: None,
        }
    }

    #[test]
    fn test_appends_one_line_per_event() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("logs/doc.jsonl");
        let log = HistoryLog::open(Some(path.clone()));
        assert!(log.is_enabled());

        log.record(&event(QueryOutcome::Success));
        log.record(&event(QueryOutcome::Timeout));

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"status\":\"success\""));
        assert!(lines[1].contains("\"status\":\"timeout\""));
    }

    #[test]
    fn test_disabled_log_is_a_noop() {
        let log = HistoryLog::open(None);
        assert!(!log.is_enabled());
        log.record(&event(QueryOutcome::Error));
    }

    #[test]
    fn test_statement_preview_truncates() {
        let long = "S".repeat(500);
        assert_eq!(statement_preview(&long).len(), STATEMENT_PREVIEW_CHARS);
        assert_eq!(statement_preview("SELECT 1"), "SELECT 1");
    }
}
