//! Connectivity and health tools.

use super::McpTool;
use crate::envelope::{optional_bool, ToolError, ToolOutput};
use crate::health::{HealthMonitor, HealthOptions};
use crate::state::AppState;
use igloo_query::QueryError;
use serde_json::{json, Value};
use std::time::Instant;

pub struct TestConnectionTool;

impl McpTool for TestConnectionTool {
    fn name(&self) -> &'static str {
        "test_connection"
    }

    fn description(&self) -> &'static str {
        "Ping the warehouse and report round-trip latency"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "request_id": { "type": "string" }
            },
            "additionalProperties": false
        })
    }

    fn execute(
        &self,
        _args: &Value,
        state: &AppState,
        _request_id: &str,
    ) -> Result<ToolOutput, ToolError> {
        let started = Instant::now();
        state
            .warehouse
            .ping()
            .map_err(|e| ToolError::Query(QueryError::Warehouse(e)))?;
        Ok(ToolOutput::success(json!({
            "profile": state.profile.name,
            "latency_ms": started.elapsed().as_millis() as u64,
        })))
    }
}

pub struct HealthCheckTool;

impl McpTool for HealthCheckTool {
    fn name(&self) -> &'static str {
        "health_check"
    }

    fn description(&self) -> &'static str {
        "Aggregate profile, connectivity, catalog, and report-index status"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "include_profile": { "type": "boolean", "default": true },
                "include_catalog": { "type": "boolean", "default": true },
                "include_cortex": { "type": "boolean", "default": false },
                "request_id": { "type": "string" }
            },
            "additionalProperties": false
        })
    }

    fn execute(
        &self,
        args: &Value,
        state: &AppState,
        _request_id: &str,
    ) -> Result<ToolOutput, ToolError> {
        let report = HealthMonitor::check(
            state,
            HealthOptions {
                include_profile: optional_bool(args, "include_profile", true),
                include_catalog: optional_bool(args, "include_catalog", true),
                include_cortex: optional_bool(args, "include_cortex", false),
            },
        );
        Ok(ToolOutput::success(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offline::UnconfiguredWarehouse;
    use crate::state::test_state;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_test_connection_offline_errors() {
        let temp = TempDir::new().unwrap();
        let state = test_state(temp.path(), Arc::new(UnconfiguredWarehouse));
        let err = TestConnectionTool
            .execute(&json!({}), &state, "r")
            .unwrap_err();
        assert!(matches!(err, ToolError::Query(_)));
    }

    #[test]
    fn test_health_check_always_succeeds() {
        let temp = TempDir::new().unwrap();
        let state = test_state(temp.path(), Arc::new(UnconfiguredWarehouse));
        let output = HealthCheckTool.execute(&json!({}), &state, "r").unwrap();
        assert_eq!(output.status, "success");
        assert_eq!(output.body["overall"], "degraded");
    }
}
