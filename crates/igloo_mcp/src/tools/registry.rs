//! Tool Registry - Tool Discovery and Dispatch
//!
//! Maintains the list of available tools and dispatches calls by name,
//! wrapping every result in the response envelope.

use super::{catalog, health, query, report, search, McpTool};
use crate::envelope::{self, ToolError};
use crate::protocol::ToolDefinition;
use crate::state::AppState;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Instant;
use tracing::debug;

/// Registry of available MCP tools
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn McpTool>>,
}

impl ToolRegistry {
    /// Create a new tool registry with all tools registered
    pub fn new() -> Self {
        let mut registry = Self {
            tools: HashMap::new(),
        };

        registry.register(Box::new(query::ExecuteQueryTool));
        registry.register(Box::new(query::FetchAsyncQueryResultTool));

        registry.register(Box::new(catalog::BuildCatalogTool));
        registry.register(Box::new(catalog::GetCatalogSummaryTool));
        registry.register(Box::new(catalog::SearchCatalogTool));
        registry.register(Box::new(catalog::BuildDependencyGraphTool));

        registry.register(Box::new(report::CreateReportTool));
        registry.register(Box::new(report::EvolveReportTool));
        registry.register(Box::new(report::EvolveReportBatchTool));
        registry.register(Box::new(report::GetReportTool));
        registry.register(Box::new(report::GetReportSchemaTool));
        registry.register(Box::new(report::RenderReportTool));
        registry.register(Box::new(report::RevertReportTool));

        registry.register(Box::new(search::SearchReportTool));
        registry.register(Box::new(search::SearchCitationsTool));

        registry.register(Box::new(health::TestConnectionTool));
        registry.register(Box::new(health::HealthCheckTool));

        debug!("Registered {} tools", registry.tools.len());

        registry
    }

    /// Register a tool
    fn register(&mut self, tool: Box<dyn McpTool>) {
        let name = tool.name().to_string();
        debug!("Registering tool: {}", name);
        self.tools.insert(name, tool);
    }

    /// List all available tools
    pub fn list_tools(&self) -> Vec<ToolDefinition> {
        let mut tools: Vec<ToolDefinition> = self.tools.values().map(|t| t.definition()).collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    /// Call a tool by name, producing the response envelope. Unknown
    /// tool names are the caller's error (a JSON-RPC fault), everything
    /// else lands in the envelope.
    pub fn call_tool(&self, name: &str, args: &Value, state: &AppState) -> Option<Value> {
        let tool = self.tools.get(name)?;

        let request_id = envelope::request_id_from(args);
        let started = Instant::now();
        let result = validate_args(args).and_then(|args| tool.execute(args, state, &request_id));
        let duration_ms = started.elapsed().as_millis() as u64;

        Some(envelope::envelope(result, &request_id, duration_ms))
    }

    /// Check if a tool exists
    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }
}

fn validate_args(args: &Value) -> Result<&Value, ToolError> {
    if args.is_object() || args.is_null() {
        Ok(args)
    } else {
        Err(ToolError::Params(
            "tool arguments must be a JSON object".to_string(),
        ))
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_has_every_tool() {
        let registry = ToolRegistry::new();

        for name in [
            "execute_query",
            "fetch_async_query_result",
            "build_catalog",
            "get_catalog_summary",
            "search_catalog",
            "build_dependency_graph",
            "create_report",
            "evolve_report",
            "evolve_report_batch",
            "get_report",
            "get_report_schema",
            "render_report",
            "revert_report",
            "search_report",
            "search_citations",
            "test_connection",
            "health_check",
        ] {
            assert!(registry.has_tool(name), "missing tool {}", name);
        }
    }

    #[test]
    fn test_every_schema_declares_closed_object() {
        let registry = ToolRegistry::new();
        for tool in registry.list_tools() {
            assert_eq!(tool.input_schema["type"], "object", "{}", tool.name);
            assert_eq!(
                tool.input_schema["additionalProperties"], false,
                "{} must set additionalProperties: false",
                tool.name
            );
            assert!(!tool.description.is_empty());
        }
    }
}
