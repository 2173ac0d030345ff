//! Catalog tools: build, summarize, search, dependency graph.

use super::McpTool;
use crate::envelope::{coerce_u64, optional_bool, optional_str, require_str, ToolError, ToolOutput};
use crate::state::AppState;
use igloo_catalog::{
    load_summary, search, CatalogBuildRequest, CatalogError, CatalogFormat, CatalogScope,
    DependencyGraph, GraphFormat, ObjectType,
};
use serde_json::{json, Value};
use std::path::PathBuf;

const DEFAULT_SEARCH_LIMIT: u64 = 20;

fn parse_format(raw: Option<&str>) -> Result<CatalogFormat, ToolError> {
    match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        None | Some("json") => Ok(CatalogFormat::Json),
        Some("jsonl") => Ok(CatalogFormat::Jsonl),
        Some(other) => Err(ToolError::Params(format!(
            "format must be json or jsonl, got {}",
            other
        ))),
    }
}

fn parse_kind(raw: Option<&str>) -> Result<Option<ObjectType>, ToolError> {
    match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        None => Ok(None),
        Some("table") => Ok(Some(ObjectType::Table)),
        Some("view") => Ok(Some(ObjectType::View)),
        Some("function") => Ok(Some(ObjectType::Function)),
        Some("procedure") => Ok(Some(ObjectType::Procedure)),
        Some(other) => Err(ToolError::Params(format!(
            "kind must be table|view|function|procedure, got {}",
            other
        ))),
    }
}

/// Which catalog directory a read-side tool should look at.
fn catalog_dir(state: &AppState, args: &Value) -> PathBuf {
    if let Some(dir) = optional_str(args, "catalog_dir") {
        return PathBuf::from(dir);
    }
    if let Some(database) = optional_str(args, "database") {
        return state.config.paths.catalog_root.join(database.to_lowercase());
    }
    state.config.paths.catalog_root.join("current")
}

fn scope_from_args(state: &AppState, args: &Value) -> Result<CatalogScope, ToolError> {
    if optional_bool(args, "account", false) {
        return Ok(CatalogScope::Account);
    }
    if let Some(database) = optional_str(args, "database") {
        return Ok(CatalogScope::Database(database.to_string()));
    }
    match &state.profile.session.database {
        Some(database) => Ok(CatalogScope::Current(database.clone())),
        None => Err(ToolError::Params(
            "no database in the active profile; pass database or account=true".to_string(),
        )),
    }
}

pub struct BuildCatalogTool;

impl McpTool for BuildCatalogTool {
    fn name(&self) -> &'static str {
        "build_catalog"
    }

    fn description(&self) -> &'static str {
        "Crawl the information schema into a local catalog (tables, views, columns, DDL)"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "database": { "type": "string" },
                "account": { "type": "boolean", "default": false },
                "output_dir": { "type": "string" },
                "format": { "enum": ["json", "jsonl"], "default": "json" },
                "incremental": { "type": "boolean", "default": false },
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
        let request = CatalogBuildRequest {
            scope: scope_from_args(state, args)?,
            output_dir: optional_str(args, "output_dir").map(PathBuf::from),
            format: parse_format(optional_str(args, "format"))?,
            incremental: optional_bool(args, "incremental", false),
        };

        let result = state.catalog.build(&request)?;
        let warnings: Vec<String> = result
            .warnings
            .iter()
            .map(|w| format!("{}: {} ({})", w.code, w.message, w.context))
            .collect();

        Ok(ToolOutput::success(json!({
            "databases": result.databases,
            "output_dir": result.output_dir,
            "format": result.format,
            "incremental": result.incremental,
            "totals": result.totals,
            "reused_objects": result.reused_objects,
            "build_duration_ms": result.duration_ms,
        }))
        .warn(warnings))
    }
}

pub struct GetCatalogSummaryTool;

impl McpTool for GetCatalogSummaryTool {
    fn name(&self) -> &'static str {
        "get_catalog_summary"
    }

    fn description(&self) -> &'static str {
        "Read the summary of a previously built catalog"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "catalog_dir": { "type": "string" },
                "database": { "type": "string" },
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
        let dir = catalog_dir(state, args);
        let summary = load_summary(&dir)?;
        Ok(ToolOutput::success(json!({
            "catalog_dir": dir,
            "summary": summary,
        })))
    }
}

pub struct SearchCatalogTool;

impl McpTool for SearchCatalogTool {
    fn name(&self) -> &'static str {
        "search_catalog"
    }

    fn description(&self) -> &'static str {
        "Search a built catalog by object name (exact, prefix, then substring matches)"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "kind": { "enum": ["table", "view", "function", "procedure"] },
                "limit": { "type": ["integer", "string"], "default": 20 },
                "catalog_dir": { "type": "string" },
                "database": { "type": "string" },
                "request_id": { "type": "string" }
            },
            "required": ["query"],
            "additionalProperties": false
        })
    }

    fn execute(
        &self,
        args: &Value,
        state: &AppState,
        _request_id: &str,
    ) -> Result<ToolOutput, ToolError> {
        let query = require_str(args, "query")?;
        let kind = parse_kind(optional_str(args, "kind"))?;
        let limit = coerce_u64(args, "limit")?.unwrap_or(DEFAULT_SEARCH_LIMIT) as usize;
        let dir = catalog_dir(state, args);

        let hits = search(&dir, query, kind, limit)?;
        Ok(ToolOutput::success(json!({
            "catalog_dir": dir,
            "query": query,
            "returned": hits.len(),
            "hits": hits,
        })))
    }
}

pub struct BuildDependencyGraphTool;

impl McpTool for BuildDependencyGraphTool {
    fn name(&self) -> &'static str {
        "build_dependency_graph"
    }

    fn description(&self) -> &'static str {
        "Derive object dependencies from catalog DDL, as JSON or DOT"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "database": { "type": "string" },
                "schema": { "type": "string" },
                "account": { "type": "boolean", "default": false },
                "format": { "enum": ["json", "dot"], "default": "json" },
                "catalog_dir": { "type": "string" },
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
        let format = match optional_str(args, "format").map(|s| s.to_ascii_lowercase()).as_deref()
        {
            None | Some("json") => GraphFormat::Json,
            Some("dot") => GraphFormat::Dot,
            Some(other) => {
                return Err(ToolError::Params(format!(
                    "format must be json or dot, got {}",
                    other
                )))
            }
        };

        let mut objects = Vec::new();
        if optional_bool(args, "account", false) {
            // Merge every built catalog under the root.
            let root = &state.config.paths.catalog_root;
            let entries = std::fs::read_dir(root)
                .map_err(|_| ToolError::Catalog(CatalogError::NotBuilt(root.clone())))?;
            for entry in entries.filter_map(|e| e.ok()) {
                if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                    if let Ok(mut loaded) = igloo_catalog::summary::load_objects(&entry.path()) {
                        objects.append(&mut loaded);
                    }
                }
            }
            if objects.is_empty() {
                return Err(ToolError::Catalog(CatalogError::NotBuilt(root.clone())));
            }
        } else {
            let dir = catalog_dir(state, args);
            objects = igloo_catalog::summary::load_objects(&dir)?;
        }

        if let Some(schema) = optional_str(args, "schema") {
            objects.retain(|o| o.schema.eq_ignore_ascii_case(schema));
        }

        let graph = DependencyGraph::derive(&objects);
        let body = match format {
            GraphFormat::Json => json!({
                "format": "json",
                "node_count": graph.nodes.len(),
                "edge_count": graph.edges.len(),
                "graph": graph,
            }),
            GraphFormat::Dot => json!({
                "format": "dot",
                "node_count": graph.nodes.len(),
                "edge_count": graph.edges.len(),
                "dot": graph.render(GraphFormat::Dot),
            }),
        };
        Ok(ToolOutput::success(body))
    }
}
