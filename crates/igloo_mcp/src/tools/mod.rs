//! MCP Tool Implementations
//!
//! Each tool exposes one gateway capability. Tools are registered in the
//! ToolRegistry and dispatched by name; every response is wrapped in the
//! uniform envelope from [`crate::envelope`].
//!
//! # Tool Categories
//!
//! - **Query**: execute_query, fetch_async_query_result
//! - **Catalog**: build_catalog, get_catalog_summary, search_catalog,
//!   build_dependency_graph
//! - **Reports**: create_report, evolve_report, evolve_report_batch,
//!   get_report, get_report_schema, render_report, revert_report
//! - **Search**: search_report, search_citations
//! - **Health**: test_connection, health_check

mod catalog;
mod health;
mod query;
mod registry;
mod report;
mod search;

pub use registry::ToolRegistry;

use crate::envelope::{ToolError, ToolOutput};
use crate::protocol::ToolDefinition;
use crate::state::AppState;
use serde_json::Value;

/// Trait for MCP tools.
///
/// All tool execution is synchronous; long-running work hands off to
/// background threads inside the services and returns an id to poll.
pub trait McpTool: Send + Sync {
    /// Tool name (e.g., "execute_query")
    fn name(&self) -> &'static str;

    /// Human-readable description
    fn description(&self) -> &'static str;

    /// JSON Schema for input parameters (additionalProperties: false)
    fn input_schema(&self) -> Value;

    /// Execute the tool. `request_id` is already resolved and must be
    /// propagated into downstream log entries.
    fn execute(
        &self,
        args: &Value,
        state: &AppState,
        request_id: &str,
    ) -> Result<ToolOutput, ToolError>;

    /// Get the tool definition for tools/list
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}
