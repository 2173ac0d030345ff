//! Query tools: execute_query and fetch_async_query_result.

use super::McpTool;
use crate::envelope::{
    coerce_u64, optional_bool, optional_str, require_str, ToolError, ToolOutput,
};
use crate::state::AppState;
use igloo_core::config::CacheMode;
use igloo_query::{CancellationToken, QueryError, QueryRequest};
use igloo_warehouse::SessionContext;
use serde_json::{json, Map, Value};

const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
/// Compact error budget when verbose_errors is off.
const COMPACT_ERROR_CHARS: usize = 300;

pub struct ExecuteQueryTool;

impl McpTool for ExecuteQueryTool {
    fn name(&self) -> &'static str {
        "execute_query"
    }

    fn description(&self) -> &'static str {
        "Execute a SQL statement against the warehouse with validation, caching, and timeout handling"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "statement": {
                    "type": "string",
                    "description": "A single SQL statement"
                },
                "reason": {
                    "type": "string",
                    "description": "Why this query is being run (5-200 chars, goes into QUERY_TAG and history)"
                },
                "timeout_seconds": {
                    "type": ["integer", "string"],
                    "default": 30,
                    "description": "Accepts an integer or numeric string; clamped to the configured bounds"
                },
                "warehouse": { "type": "string" },
                "database": { "type": "string" },
                "schema": { "type": "string" },
                "role": { "type": "string" },
                "verbose_errors": { "type": "boolean", "default": false },
                "cache_mode": {
                    "enum": ["enabled", "refresh", "read_only", "disabled"]
                },
                "request_id": { "type": "string" }
            },
            "required": ["statement", "reason"],
            "additionalProperties": false
        })
    }

    fn execute(
        &self,
        args: &Value,
        state: &AppState,
        request_id: &str,
    ) -> Result<ToolOutput, ToolError> {
        let statement = require_str(args, "statement")?;
        let reason = require_str(args, "reason")?;
        let timeout_seconds = coerce_u64(args, "timeout_seconds")?.unwrap_or(DEFAULT_TIMEOUT_SECONDS);
        let verbose_errors = optional_bool(args, "verbose_errors", false);

        let cache_mode = match optional_str(args, "cache_mode") {
            Some(raw) => raw
                .parse::<CacheMode>()
                .map_err(|e| ToolError::Params(format!("cache_mode: {}", e)))?,
            None => state.config.cache_mode,
        };

        let request = QueryRequest {
            statement: statement.to_string(),
            reason: reason.to_string(),
            timeout_seconds,
            overrides: SessionContext {
                warehouse: optional_str(args, "warehouse").map(|s| s.to_string()),
                database: optional_str(args, "database").map(|s| s.to_string()),
                schema: optional_str(args, "schema").map(|s| s.to_string()),
                role: optional_str(args, "role").map(|s| s.to_string()),
            },
            cache_mode,
            request_id: Some(request_id.to_string()),
        };

        let response = state
            .query
            .execute(request, CancellationToken::new())
            .map_err(|e| compact_execution_error(e, verbose_errors))?;

        let value = serde_json::to_value(&response)
            .map_err(|e| ToolError::Params(format!("response serialization failed: {}", e)))?;
        Ok(from_tagged(value))
    }
}

pub struct FetchAsyncQueryResultTool;

impl McpTool for FetchAsyncQueryResultTool {
    fn name(&self) -> &'static str {
        "fetch_async_query_result"
    }

    fn description(&self) -> &'static str {
        "Fetch the outcome of a query that outlived its inline budget"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "execution_id": { "type": "string" },
                "request_id": { "type": "string" }
            },
            "required": ["execution_id"],
            "additionalProperties": false
        })
    }

    fn execute(
        &self,
        args: &Value,
        state: &AppState,
        _request_id: &str,
    ) -> Result<ToolOutput, ToolError> {
        let execution_id = require_str(args, "execution_id")?;

        let Some(async_state) = state.query.fetch_async(execution_id) else {
            return Err(ToolError::Params(format!(
                "unknown execution_id: {} (async results are kept for the server's lifetime)",
                execution_id
            )));
        };

        let mut value = serde_json::to_value(&async_state)
            .map_err(|e| ToolError::Params(format!("response serialization failed: {}", e)))?;
        if let Some(map) = value.as_object_mut() {
            map.insert(
                "execution_id".to_string(),
                Value::String(execution_id.to_string()),
            );
        }
        Ok(from_tagged(value))
    }
}

/// Pull the serde `status` tag out of a tagged value and use it as the
/// envelope status, keeping the remaining fields as the body.
fn from_tagged(value: Value) -> ToolOutput {
    let mut map = match value {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("data".to_string(), other);
            map
        }
    };
    let status = map
        .remove("status")
        .and_then(|v| v.as_str().map(|s| s.to_string()))
        .unwrap_or_else(|| "success".to_string());
    ToolOutput::with_status(status, Value::Object(map))
}

/// Without verbose_errors, warehouse error text is clipped to its first
/// line and a compact budget.
fn compact_execution_error(error: QueryError, verbose: bool) -> ToolError {
    if verbose {
        return ToolError::Query(error);
    }
    match error {
        QueryError::Execution { query_id, message } => {
            let first_line = message.lines().next().unwrap_or("").to_string();
            let compact: String = first_line.chars().take(COMPACT_ERROR_CHARS).collect();
            ToolError::Query(QueryError::Execution {
                query_id,
                message: compact,
            })
        }
        other => ToolError::Query(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_state;
    use igloo_warehouse::mock::{int_rows, Script, ScriptedWarehouse};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_execute_query_success_via_tool() {
        let temp = TempDir::new().unwrap();
        let warehouse = Arc::new(ScriptedWarehouse::new());
        warehouse.script("FROM t", Script::Rows(int_rows("id", &[1, 2])));
        let state = test_state(temp.path(), warehouse);

        let args = json!({
            "statement": "SELECT * FROM t",
            "reason": "tool-level test",
            "timeout_seconds": "30"
        });
        let output = ExecuteQueryTool.execute(&args, &state, "req-1").unwrap();
        assert_eq!(output.status, "success");
        assert_eq!(output.body["total_rows"], 2);
        assert!(output.body["execution_id"].is_string());
    }

    #[test]
    fn test_execute_query_rejects_suffixed_timeout() {
        let temp = TempDir::new().unwrap();
        let state = test_state(temp.path(), Arc::new(ScriptedWarehouse::new()));

        let args = json!({
            "statement": "SELECT 1",
            "reason": "tool-level test",
            "timeout_seconds": "30s"
        });
        let err = ExecuteQueryTool.execute(&args, &state, "req-1").unwrap_err();
        assert!(matches!(err, ToolError::Params(_)));
    }

    #[test]
    fn test_execute_query_denied_propagates() {
        let temp = TempDir::new().unwrap();
        let state = test_state(temp.path(), Arc::new(ScriptedWarehouse::new()));

        let args = json!({
            "statement": "DROP TABLE t",
            "reason": "tool-level test"
        });
        let err = ExecuteQueryTool.execute(&args, &state, "req-1").unwrap_err();
        assert!(matches!(
            err,
            ToolError::Query(QueryError::Sql(igloo_sql::SqlError::Denied { .. }))
        ));
    }

    #[test]
    fn test_compact_error_clips_to_first_line() {
        let err = QueryError::Execution {
            query_id: None,
            message: "line one is the summary\nstack frame 1\nstack frame 2".to_string(),
        };
        let ToolError::Query(QueryError::Execution { message, .. }) =
            compact_execution_error(err, false)
        else {
            panic!("expected execution error");
        };
        assert_eq!(message, "line one is the summary");
    }

    #[test]
    fn test_fetch_async_unknown_id() {
        let temp = TempDir::new().unwrap();
        let state = test_state(temp.path(), Arc::new(ScriptedWarehouse::new()));
        let err = FetchAsyncQueryResultTool
            .execute(&json!({"execution_id": "nope"}), &state, "req-1")
            .unwrap_err();
        assert!(matches!(err, ToolError::Params(_)));
    }
}
