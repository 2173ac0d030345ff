//! Living Report tools.

use super::McpTool;
use crate::envelope::{
    coerce_u64, optional_bool, optional_str, optional_str_vec, require_str, ToolError, ToolOutput,
};
use crate::state::AppState;
use igloo_reports::schema_describe::{self, DescribeFormat};
use igloo_reports::{
    Actor, EvolveOptions, EvolveResult, Pagination, ProposedChanges, RenderFormat,
    ReportService, RetrievalFilters, RetrievalMode, Template,
};
use serde_json::{json, Map, Value};

/// How much detail an evolve response carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum ResponseDetail {
    Minimal,
    #[default]
    Standard,
    Full,
}

impl ResponseDetail {
    fn parse(raw: Option<&str>) -> Result<Self, ToolError> {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            None => Ok(Self::Standard),
            Some("minimal") => Ok(Self::Minimal),
            Some("standard") => Ok(Self::Standard),
            Some("full") => Ok(Self::Full),
            Some(other) => Err(ToolError::Params(format!(
                "response_detail must be minimal|standard|full, got {}",
                other
            ))),
        }
    }
}

fn parse_template(raw: Option<&str>) -> Result<Template, ToolError> {
    match raw {
        None => Ok(Template::Default),
        Some(name) => Template::parse(name).ok_or_else(|| {
            ToolError::Params(format!(
                "template must be default or analyst_v1, got {}",
                name
            ))
        }),
    }
}

fn parse_changes(args: &Value, field: &str) -> Result<ProposedChanges, ToolError> {
    let raw = args
        .get(field)
        .ok_or_else(|| ToolError::Params(format!("missing required parameter: {}", field)))?;
    serde_json::from_value(raw.clone())
        .map_err(|e| ToolError::Params(format!("{}: {}", field, e)))
}

fn evolve_options(args: &Value, request_id: &str) -> Result<EvolveOptions, ToolError> {
    Ok(EvolveOptions {
        dry_run: optional_bool(args, "dry_run", false),
        expected_outline_version: coerce_u64(args, "expected_outline_version")?,
        actor: Actor::Agent,
        request_id: Some(request_id.to_string()),
    })
}

/// Shape an evolve result per the response_detail knob. Minimal stays
/// around ~200 tokens; standard adds ids; full echoes the changes.
fn shape_evolve(
    result: &EvolveResult,
    detail: ResponseDetail,
    changes_echo: Option<Value>,
) -> ToolOutput {
    let mut body = Map::new();
    body.insert("report_id".to_string(), json!(result.report_id));
    body.insert("outline_version".to_string(), json!(result.outline_version));
    body.insert("summary".to_string(), json!(result.summary));
    if result.dry_run {
        body.insert("dry_run".to_string(), json!(true));
    }

    if detail != ResponseDetail::Minimal {
        body.insert(
            "created_insight_ids".to_string(),
            json!(result.created_insight_ids),
        );
        body.insert(
            "created_section_ids".to_string(),
            json!(result.created_section_ids),
        );
        body.insert(
            "removed_insight_ids".to_string(),
            json!(result.removed_insight_ids),
        );
        body.insert(
            "removed_section_ids".to_string(),
            json!(result.removed_section_ids),
        );
        body.insert("action_ids".to_string(), json!(result.action_ids));
    }
    if detail == ResponseDetail::Full {
        if let Some(echo) = changes_echo {
            body.insert("changes_applied".to_string(), echo);
        }
    }

    ToolOutput::success(Value::Object(body)).warn(result.warnings.clone())
}

pub struct CreateReportTool;

impl McpTool for CreateReportTool {
    fn name(&self) -> &'static str {
        "create_report"
    }

    fn description(&self) -> &'static str {
        "Create a living report: directory, initial outline, audit log, index entry"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "title": { "type": "string" },
                "template": { "enum": ["default", "analyst_v1"], "default": "default" },
                "tags": { "type": "array", "items": { "type": "string" } },
                "request_id": { "type": "string" }
            },
            "required": ["title"],
            "additionalProperties": false
        })
    }

    fn execute(
        &self,
        args: &Value,
        state: &AppState,
        request_id: &str,
    ) -> Result<ToolOutput, ToolError> {
        let title = require_str(args, "title")?;
        if title.trim().is_empty() {
            return Err(ToolError::Params("title must be non-empty".to_string()));
        }
        let template = parse_template(optional_str(args, "template"))?;
        let tags = optional_str_vec(args, "tags");

        let (report_id, outline_version) = state.reports.create(
            title,
            template,
            &tags,
            Actor::Agent,
            Some(request_id.to_string()),
        )?;

        Ok(ToolOutput::success(json!({
            "report_id": report_id,
            "title": title,
            "template": template.as_str(),
            "tags": tags,
            "outline_version": outline_version,
        })))
    }
}

pub struct EvolveReportTool;

impl McpTool for EvolveReportTool {
    fn name(&self) -> &'static str {
        "evolve_report"
    }

    fn description(&self) -> &'static str {
        "Apply a ProposedChanges patch to a report with optimistic concurrency"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "report_selector": {
                    "type": "string",
                    "description": "Report id, exact title, or unambiguous title fragment"
                },
                "instruction": {
                    "type": "string",
                    "description": "Human-readable intent, recorded in the audit log"
                },
                "proposed_changes": {
                    "type": "object",
                    "description": "See get_report_schema for the full patch language"
                },
                "dry_run": { "type": "boolean", "default": false },
                "expected_outline_version": { "type": ["integer", "string"] },
                "response_detail": {
                    "enum": ["minimal", "standard", "full"],
                    "default": "standard"
                },
                "request_id": { "type": "string" }
            },
            "required": ["report_selector", "instruction", "proposed_changes"],
            "additionalProperties": false
        })
    }

    fn execute(
        &self,
        args: &Value,
        state: &AppState,
        request_id: &str,
    ) -> Result<ToolOutput, ToolError> {
        let selector = require_str(args, "report_selector")?;
        let instruction = require_str(args, "instruction")?;
        let changes = parse_changes(args, "proposed_changes")?;
        let detail = ResponseDetail::parse(optional_str(args, "response_detail"))?;
        let opts = evolve_options(args, request_id)?;

        let result = state.reports.evolve(selector, instruction, &changes, &opts)?;
        let echo = (detail == ResponseDetail::Full)
            .then(|| args.get("proposed_changes").cloned())
            .flatten();
        Ok(shape_evolve(&result, detail, echo))
    }
}

pub struct EvolveReportBatchTool;

impl McpTool for EvolveReportBatchTool {
    fn name(&self) -> &'static str {
        "evolve_report_batch"
    }

    fn description(&self) -> &'static str {
        "Apply several patches atomically: all operations commit or none do"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "report_selector": { "type": "string" },
                "operations": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "instruction": { "type": "string" },
                            "proposed_changes": { "type": "object" }
                        },
                        "required": ["instruction", "proposed_changes"],
                        "additionalProperties": false
                    },
                    "minItems": 1
                },
                "dry_run": { "type": "boolean", "default": false },
                "expected_outline_version": { "type": ["integer", "string"] },
                "response_detail": {
                    "enum": ["minimal", "standard", "full"],
                    "default": "standard"
                },
                "request_id": { "type": "string" }
            },
            "required": ["report_selector", "operations"],
            "additionalProperties": false
        })
    }

    fn execute(
        &self,
        args: &Value,
        state: &AppState,
        request_id: &str,
    ) -> Result<ToolOutput, ToolError> {
        let selector = require_str(args, "report_selector")?;
        let detail = ResponseDetail::parse(optional_str(args, "response_detail"))?;
        let opts = evolve_options(args, request_id)?;

        let raw_ops = args
            .get("operations")
            .and_then(|v| v.as_array())
            .ok_or_else(|| ToolError::Params("operations must be a non-empty array".to_string()))?;
        if raw_ops.is_empty() {
            return Err(ToolError::Params(
                "operations must be a non-empty array".to_string(),
            ));
        }

        let mut operations = Vec::with_capacity(raw_ops.len());
        for (idx, op) in raw_ops.iter().enumerate() {
            let instruction = op
                .get("instruction")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    ToolError::Params(format!("operations[{}].instruction is required", idx))
                })?;
            let changes: ProposedChanges = serde_json::from_value(
                op.get("proposed_changes")
                    .cloned()
                    .ok_or_else(|| {
                        ToolError::Params(format!(
                            "operations[{}].proposed_changes is required",
                            idx
                        ))
                    })?,
            )
            .map_err(|e| ToolError::Params(format!("operations[{}]: {}", idx, e)))?;
            operations.push((instruction.to_string(), changes));
        }

        let result = state.reports.evolve_batch(selector, &operations, &opts)?;
        let echo = (detail == ResponseDetail::Full)
            .then(|| args.get("operations").cloned())
            .flatten();
        let mut output = shape_evolve(&result, detail, echo);
        output
            .body
            .insert("operation_count".to_string(), json!(operations.len()));
        Ok(output)
    }
}

pub struct GetReportTool;

impl McpTool for GetReportTool {
    fn name(&self) -> &'static str {
        "get_report"
    }

    fn description(&self) -> &'static str {
        "Read a report as summary, filtered sections/insights, or the full outline"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "report_selector": { "type": "string" },
                "mode": {
                    "enum": ["summary", "sections", "insights", "full"],
                    "default": "summary"
                },
                "section_ids": { "type": "array", "items": { "type": "string" } },
                "section_titles": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Case-insensitive substring match"
                },
                "insight_ids": { "type": "array", "items": { "type": "string" } },
                "min_importance": { "type": ["integer", "string"] },
                "limit": { "type": ["integer", "string"], "default": 50 },
                "offset": { "type": ["integer", "string"], "default": 0 },
                "include_audit": {
                    "type": ["boolean", "integer"],
                    "description": "true for the last 10 audit events, or an explicit count"
                },
                "include_content": { "type": "boolean", "default": false },
                "request_id": { "type": "string" }
            },
            "required": ["report_selector"],
            "additionalProperties": false
        })
    }

    fn execute(
        &self,
        args: &Value,
        state: &AppState,
        _request_id: &str,
    ) -> Result<ToolOutput, ToolError> {
        let selector = require_str(args, "report_selector")?;
        let mode = match optional_str(args, "mode").map(|s| s.to_ascii_lowercase()).as_deref() {
            None | Some("summary") => RetrievalMode::Summary,
            Some("sections") => RetrievalMode::Sections,
            Some("insights") => RetrievalMode::Insights,
            Some("full") => RetrievalMode::Full,
            Some(other) => {
                return Err(ToolError::Params(format!(
                    "mode must be summary|sections|insights|full, got {}",
                    other
                )))
            }
        };

        let filters = RetrievalFilters {
            section_ids: optional_str_vec(args, "section_ids"),
            section_titles: optional_str_vec(args, "section_titles"),
            insight_ids: optional_str_vec(args, "insight_ids"),
            min_importance: coerce_u64(args, "min_importance")?.map(|v| v.min(10) as u8),
        };
        let pagination = Pagination {
            limit: coerce_u64(args, "limit")?.unwrap_or(50) as usize,
            offset: coerce_u64(args, "offset")?.unwrap_or(0) as usize,
        };
        let include_content = optional_bool(args, "include_content", false);
        let include_audit = match args.get("include_audit") {
            None | Some(Value::Bool(false)) => None,
            Some(Value::Bool(true)) => Some(10),
            Some(value) => Some(
                value
                    .as_u64()
                    .ok_or_else(|| {
                        ToolError::Params("include_audit must be a boolean or count".to_string())
                    })? as usize,
            ),
        };

        let (entry, shaped, audit) = state.reports.get(
            selector,
            mode,
            &filters,
            pagination,
            include_content,
            include_audit,
        )?;

        let mut body = match serde_json::to_value(&shaped) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        body.insert("report_id".to_string(), json!(entry.report_id));
        body.insert("title".to_string(), json!(entry.current_title));
        body.insert("report_status".to_string(), json!(entry.status));
        body.insert("template".to_string(), json!(entry.template.as_str()));
        if let Some(events) = audit {
            body.insert("audit".to_string(), json!(events));
        }
        Ok(ToolOutput::success(Value::Object(body)))
    }
}

pub struct GetReportSchemaTool;

impl McpTool for GetReportSchemaTool {
    fn name(&self) -> &'static str {
        "get_report_schema"
    }

    fn description(&self) -> &'static str {
        "Describe the ProposedChanges patch language (json_schema, examples, or compact)"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "schema_type": {
                    "enum": ["proposed_changes"],
                    "default": "proposed_changes"
                },
                "format": {
                    "enum": ["json_schema", "examples", "compact"],
                    "default": "json_schema"
                },
                "request_id": { "type": "string" }
            },
            "additionalProperties": false
        })
    }

    fn execute(
        &self,
        args: &Value,
        _state: &AppState,
        _request_id: &str,
    ) -> Result<ToolOutput, ToolError> {
        if let Some(schema_type) = optional_str(args, "schema_type") {
            if schema_type != "proposed_changes" {
                return Err(ToolError::Params(format!(
                    "unknown schema_type: {}",
                    schema_type
                )));
            }
        }
        let format = match optional_str(args, "format") {
            None => DescribeFormat::JsonSchema,
            Some(raw) => DescribeFormat::parse(raw).ok_or_else(|| {
                ToolError::Params(format!(
                    "format must be json_schema|examples|compact, got {}",
                    raw
                ))
            })?,
        };

        Ok(ToolOutput::success(json!({
            "schema_type": "proposed_changes",
            "format": match format {
                DescribeFormat::JsonSchema => "json_schema",
                DescribeFormat::Examples => "examples",
                DescribeFormat::Compact => "compact",
            },
            "schema": schema_describe::describe(format),
        })))
    }
}

pub struct RenderReportTool;

impl McpTool for RenderReportTool {
    fn name(&self) -> &'static str {
        "render_report"
    }

    fn description(&self) -> &'static str {
        "Render a report through the typesetter into the report's assets directory"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "report_selector": { "type": "string" },
                "format": {
                    "enum": ["html", "pdf", "md", "docx", "html_standalone"],
                    "default": "md"
                },
                "include_preview": { "type": "boolean", "default": true },
                "preview_max_chars": {
                    "type": ["integer", "string"],
                    "default": 2000,
                    "description": "Clamped to [100, 10000]"
                },
                "dry_run": { "type": "boolean", "default": false },
                "request_id": { "type": "string" }
            },
            "required": ["report_selector"],
            "additionalProperties": false
        })
    }

    fn execute(
        &self,
        args: &Value,
        state: &AppState,
        request_id: &str,
    ) -> Result<ToolOutput, ToolError> {
        let selector = require_str(args, "report_selector")?;
        let format = match optional_str(args, "format") {
            None => RenderFormat::Md,
            Some(raw) => RenderFormat::parse(raw).ok_or_else(|| {
                ToolError::Params(format!(
                    "format must be html|pdf|md|docx|html_standalone, got {}",
                    raw
                ))
            })?,
        };
        let include_preview = optional_bool(args, "include_preview", true);
        let preview_max_chars = coerce_u64(args, "preview_max_chars")?.unwrap_or(2000) as usize;
        let dry_run = optional_bool(args, "dry_run", false);

        let result = state.reports.render(
            selector,
            format,
            state.typesetter.as_ref(),
            dry_run,
            Actor::Agent,
            Some(request_id.to_string()),
        )?;

        let mut body = Map::new();
        body.insert("report_id".to_string(), json!(result.report_id));
        body.insert("format".to_string(), json!(format.extension()));
        body.insert("dry_run".to_string(), json!(result.dry_run));
        body.insert("citation_count".to_string(), json!(result.citation_count));
        if let Some(path) = &result.output_path {
            body.insert("output_path".to_string(), json!(path));
        }
        if include_preview {
            body.insert(
                "preview".to_string(),
                json!(ReportService::truncate_preview(
                    &result.qmd,
                    preview_max_chars
                )),
            );
        }
        Ok(ToolOutput::success(Value::Object(body)).warn(result.warnings))
    }
}

pub struct RevertReportTool;

impl McpTool for RevertReportTool {
    fn name(&self) -> &'static str {
        "revert_report"
    }

    fn description(&self) -> &'static str {
        "Restore the outline to the pre-image of a past audit action"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "report_selector": { "type": "string" },
                "action_id": { "type": "string" },
                "request_id": { "type": "string" }
            },
            "required": ["report_selector", "action_id"],
            "additionalProperties": false
        })
    }

    fn execute(
        &self,
        args: &Value,
        state: &AppState,
        request_id: &str,
    ) -> Result<ToolOutput, ToolError> {
        let selector = require_str(args, "report_selector")?;
        let action_id = require_str(args, "action_id")?;

        let result = state.reports.revert(
            selector,
            action_id,
            Actor::Agent,
            Some(request_id.to_string()),
        )?;
        Ok(ToolOutput::success(json!({
            "report_id": result.report_id,
            "outline_version": result.outline_version,
            "reverted_action_id": action_id,
            "action_ids": result.action_ids,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offline::UnconfiguredWarehouse;
    use crate::state::test_state;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn state(temp: &TempDir) -> AppState {
        test_state(temp.path(), Arc::new(UnconfiguredWarehouse))
    }

    fn create(state: &AppState, title: &str) -> String {
        let output = CreateReportTool
            .execute(&json!({"title": title}), state, "r")
            .unwrap();
        output.body["report_id"].as_str().unwrap().to_string()
    }

    #[test]
    fn test_create_evolve_get_flow() {
        let temp = TempDir::new().unwrap();
        let state = state(&temp);
        let report_id = create(&state, "T");

        let output = EvolveReportTool
            .execute(
                &json!({
                    "report_selector": report_id,
                    "instruction": "add",
                    "proposed_changes": { "sections_to_add": [{ "title": "S1" }] },
                    "response_detail": "minimal"
                }),
                &state,
                "r",
            )
            .unwrap();
        assert_eq!(output.status, "success");
        assert_eq!(output.body["outline_version"], 2);
        assert_eq!(output.body["summary"]["sections_added"], 1);
        // Minimal detail omits id lists.
        assert!(!output.body.contains_key("created_section_ids"));

        let got = GetReportTool
            .execute(
                &json!({"report_selector": report_id, "mode": "summary"}),
                &state,
                "r",
            )
            .unwrap();
        assert_eq!(got.body["section_count"], 1);
        assert_eq!(got.body["insight_count"], 0);
        assert_eq!(got.body["title"], "T");
    }

    #[test]
    fn test_evolve_validation_failure_is_structured() {
        let temp = TempDir::new().unwrap();
        let state = state(&temp);
        let report_id = create(&state, "T");

        let err = EvolveReportTool
            .execute(
                &json!({
                    "report_selector": report_id,
                    "instruction": "bad",
                    "proposed_changes": {
                        "insights_to_modify": [{"insight_id": "missing", "summary": "x"}]
                    }
                }),
                &state,
                "r",
            )
            .unwrap_err();
        assert!(matches!(
            err,
            ToolError::Report(igloo_reports::ReportError::Validation(_))
        ));
    }

    #[test]
    fn test_evolve_unknown_patch_field_rejected() {
        let temp = TempDir::new().unwrap();
        let state = state(&temp);
        let report_id = create(&state, "T");

        let err = EvolveReportTool
            .execute(
                &json!({
                    "report_selector": report_id,
                    "instruction": "bad",
                    "proposed_changes": { "bogus": true }
                }),
                &state,
                "r",
            )
            .unwrap_err();
        assert!(matches!(err, ToolError::Params(_)));
    }

    #[test]
    fn test_batch_tool_atomicity() {
        let temp = TempDir::new().unwrap();
        let state = state(&temp);
        let report_id = create(&state, "T");

        let err = EvolveReportBatchTool
            .execute(
                &json!({
                    "report_selector": report_id,
                    "operations": [
                        { "instruction": "ok", "proposed_changes": { "sections_to_add": [{"title": "A"}] } },
                        { "instruction": "bad", "proposed_changes": { "sections_to_remove": 5 } }
                    ]
                }),
                &state,
                "r",
            )
            .unwrap_err();
        assert!(matches!(err, ToolError::Params(_)));

        // Nothing persisted.
        let got = GetReportTool
            .execute(
                &json!({"report_selector": report_id, "mode": "summary"}),
                &state,
                "r",
            )
            .unwrap();
        assert_eq!(got.body["section_count"], 0);
    }

    #[test]
    fn test_get_report_schema_formats() {
        let temp = TempDir::new().unwrap();
        let state = state(&temp);

        for format in ["json_schema", "examples", "compact"] {
            let output = GetReportSchemaTool
                .execute(&json!({"format": format}), &state, "r")
                .unwrap();
            assert_eq!(output.body["format"], format);
            assert!(!output.body["schema"].is_null());
        }
    }

    #[test]
    fn test_render_report_with_preview() {
        let temp = TempDir::new().unwrap();
        let state = state(&temp);
        let report_id = create(&state, "Weekly");

        EvolveReportTool
            .execute(
                &json!({
                    "report_selector": report_id,
                    "instruction": "seed",
                    "proposed_changes": { "sections_to_add": [{
                        "title": "Findings",
                        "insights": [{ "summary": "it renders", "importance": 6 }]
                    }]}
                }),
                &state,
                "r",
            )
            .unwrap();

        let output = RenderReportTool
            .execute(
                &json!({"report_selector": report_id, "format": "md"}),
                &state,
                "r",
            )
            .unwrap();
        assert_eq!(output.status, "success");
        let preview = output.body["preview"].as_str().unwrap();
        assert!(preview.contains("# Weekly"));
        assert!(preview.contains("it renders"));
        assert!(output.body["output_path"].is_string());
    }

    #[test]
    fn test_revert_tool_round_trip() {
        let temp = TempDir::new().unwrap();
        let state = state(&temp);
        let report_id = create(&state, "T");

        let evolved = EvolveReportTool
            .execute(
                &json!({
                    "report_selector": report_id,
                    "instruction": "add",
                    "proposed_changes": { "sections_to_add": [{"title": "S1"}] }
                }),
                &state,
                "r",
            )
            .unwrap();
        let action_id = evolved.body["action_ids"][0].as_str().unwrap();

        let reverted = RevertReportTool
            .execute(
                &json!({"report_selector": report_id, "action_id": action_id}),
                &state,
                "r",
            )
            .unwrap();
        assert_eq!(reverted.body["outline_version"], 3);

        let got = GetReportTool
            .execute(
                &json!({"report_selector": report_id, "mode": "summary"}),
                &state,
                "r",
            )
            .unwrap();
        assert_eq!(got.body["section_count"], 0);
    }
}
