//! Cross-report search tools.

use super::McpTool;
use crate::envelope::{coerce_u64, optional_str, optional_str_vec, ToolError, ToolOutput};
use crate::state::AppState;
use igloo_reports::citations::{CitationFilters, CitationGroupBy};
use igloo_reports::ReportStatus;
use serde_json::{json, Value};

pub struct SearchReportTool;

impl McpTool for SearchReportTool {
    fn name(&self) -> &'static str {
        "search_report"
    }

    fn description(&self) -> &'static str {
        "Find reports by title fragment, tags, or status"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "title": { "type": "string", "description": "Case-insensitive substring" },
                "tags": { "type": "array", "items": { "type": "string" } },
                "status": { "enum": ["active", "archived", "deleted"] },
                "fields": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Project each match down to these index fields"
                },
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
        let status = match optional_str(args, "status") {
            None => None,
            Some("active") => Some(ReportStatus::Active),
            Some("archived") => Some(ReportStatus::Archived),
            Some("deleted") => Some(ReportStatus::Deleted),
            Some(other) => {
                return Err(ToolError::Params(format!(
                    "status must be active|archived|deleted, got {}",
                    other
                )))
            }
        };
        let tags = optional_str_vec(args, "tags");
        let fields = optional_str_vec(args, "fields");

        let entries =
            state
                .reports
                .search_reports(optional_str(args, "title"), &tags, status)?;

        let reports: Vec<Value> = entries
            .iter()
            .map(|entry| {
                let full = json!({
                    "report_id": entry.report_id,
                    "title": entry.current_title,
                    "status": entry.status,
                    "tags": entry.tags,
                    "template": entry.template.as_str(),
                    "created_at": entry.created_at,
                    "updated_at": entry.updated_at,
                    "path": entry.path,
                });
                if fields.is_empty() {
                    return full;
                }
                let mut projected = serde_json::Map::new();
                if let Value::Object(map) = full {
                    for field in &fields {
                        if let Some(value) = map.get(field) {
                            projected.insert(field.clone(), value.clone());
                        }
                    }
                }
                Value::Object(projected)
            })
            .collect();

        Ok(ToolOutput::success(json!({
            "matches_found": reports.len(),
            "reports": reports,
        })))
    }
}

pub struct SearchCitationsTool;

impl McpTool for SearchCitationsTool {
    fn name(&self) -> &'static str {
        "search_citations"
    }

    fn description(&self) -> &'static str {
        "Search citations across all reports with filters, grouping, and pagination"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "source_type": {
                    "enum": ["query", "api", "url", "observation", "document"]
                },
                "provider": { "type": "string" },
                "url_contains": { "type": "string" },
                "description_contains": { "type": "string" },
                "execution_id": { "type": "string" },
                "group_by": { "enum": ["source", "provider"] },
                "limit": { "type": ["integer", "string"], "default": 50 },
                "offset": { "type": ["integer", "string"], "default": 0 },
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
        let filters = CitationFilters {
            source_type: optional_str(args, "source_type").map(|s| s.to_string()),
            provider: optional_str(args, "provider").map(|s| s.to_string()),
            url_contains: optional_str(args, "url_contains").map(|s| s.to_string()),
            description_contains: optional_str(args, "description_contains")
                .map(|s| s.to_string()),
            execution_id: optional_str(args, "execution_id").map(|s| s.to_string()),
        };
        let group_by = match optional_str(args, "group_by") {
            None => None,
            Some("source") => Some(CitationGroupBy::Source),
            Some("provider") => Some(CitationGroupBy::Provider),
            Some(other) => {
                return Err(ToolError::Params(format!(
                    "group_by must be source or provider, got {}",
                    other
                )))
            }
        };
        let limit = coerce_u64(args, "limit")?.unwrap_or(50) as usize;
        let offset = coerce_u64(args, "offset")?.unwrap_or(0) as usize;

        let result = state
            .reports
            .search_citations(&filters, group_by, limit, offset)?;
        Ok(ToolOutput::success(serde_json::to_value(&result).map_err(
            |e| ToolError::Params(format!("response serialization failed: {}", e)),
        )?))
    }
}
