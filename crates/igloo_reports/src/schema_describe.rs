//! Self-documentation of the patch language.
//!
//! Agents ask for this via `get_report_schema` in three shapes:
//! `json_schema` for programmatic validation, `examples` for copy-paste
//! payloads, `compact` for a one-line-per-field cheat sheet. The
//! examples double as the `schema_example` attached to every validation
//! issue.

use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescribeFormat {
    JsonSchema,
    Examples,
    Compact,
}

impl DescribeFormat {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json_schema" => Some(Self::JsonSchema),
            "examples" => Some(Self::Examples),
            "compact" => Some(Self::Compact),
            _ => None,
        }
    }
}

/// Describe `ProposedChanges` in the requested format.
pub fn describe(format: DescribeFormat) -> Value {
    match format {
        DescribeFormat::JsonSchema => json_schema(),
        DescribeFormat::Examples => examples(),
        DescribeFormat::Compact => compact(),
    }
}

/// The example payload for one named operation. Unknown names fall back
/// to the simplest add_insight example.
pub fn example(operation: &str) -> Value {
    match operation {
        "add_insight" => json!({
            "insights_to_add": [{
                "section_id": "3fa85f64-5717-4562-b3fc-2c963f66afa6",
                "insight": { "summary": "Weekly active wallets grew 12%", "importance": 8 }
            }]
        }),
        "add_insight_with_citation" => json!({
            "insights_to_add": [{
                "section_id": "3fa85f64-5717-4562-b3fc-2c963f66afa6",
                "insight": {
                    "summary": "Weekly active wallets grew 12%",
                    "importance": 8,
                    "citations": [{
                        "source": "query",
                        "provider": "snowflake",
                        "execution_id": "0196b2a7-1111-7abc-8def-000000000000"
                    }]
                }
            }]
        }),
        "modify_insight" => json!({
            "insights_to_modify": [{
                "insight_id": "3fa85f64-5717-4562-b3fc-2c963f66afa6",
                "importance": 9,
                "summary": "Revised: weekly active wallets grew 14%"
            }]
        }),
        "add_section" => json!({
            "sections_to_add": [{ "title": "Network Activity", "order": 2 }]
        }),
        "modify_section" => json!({
            "sections_to_modify": [{
                "section_id": "3fa85f64-5717-4562-b3fc-2c963f66afa6",
                "title": "Network Activity (updated)",
                "insight_ids_to_add": ["9f1b6c1e-0000-4000-8000-000000000001"]
            }]
        }),
        "atomic_section_with_insights" => json!({
            "sections_to_add": [{
                "title": "DEX Trading",
                "order": 3,
                "insights": [
                    { "summary": "Volume up 30% week over week", "importance": 7 },
                    { "summary": "Top pool changed to USDC/ETH", "importance": 5 }
                ]
            }]
        }),
        "remove_insight" => json!({
            "insights_to_remove": ["3fa85f64-5717-4562-b3fc-2c963f66afa6"]
        }),
        "remove_section" => json!({
            "sections_to_remove": ["3fa85f64-5717-4562-b3fc-2c963f66afa6"]
        }),
        "status_change" => json!({ "status_change": "archived" }),
        "metadata_updates" => json!({
            "metadata_updates": { "review_cycle": "weekly", "owner": "data-team" }
        }),
        "title_change" => json!({ "title_change": "Weekly On-Chain Report (Q3)" }),
        _ => example("add_insight"),
    }
}

fn examples() -> Value {
    json!({
        "add_insight": example("add_insight"),
        "add_insight_with_citation": example("add_insight_with_citation"),
        "modify_insight": example("modify_insight"),
        "add_section": example("add_section"),
        "modify_section": example("modify_section"),
        "atomic_section_with_insights": example("atomic_section_with_insights"),
        "remove_insight": example("remove_insight"),
        "remove_section": example("remove_section"),
        "status_change": example("status_change"),
        "metadata_updates": example("metadata_updates"),
        "title_change": example("title_change"),
    })
}

fn citation_schema() -> Value {
    json!({
        "type": "object",
        "description": "Tagged by `source`",
        "oneOf": [
            {
                "properties": {
                    "source": { "const": "query" },
                    "provider": { "type": "string" },
                    "execution_id": { "type": "string" },
                    "query_id": { "type": "string" },
                    "sql_sha256": { "type": "string" },
                    "cache_manifest": { "type": "string" },
                    "description": { "type": "string" }
                },
                "required": ["source", "provider"],
                "additionalProperties": false
            },
            {
                "properties": {
                    "source": { "const": "api" },
                    "provider": { "type": "string" },
                    "endpoint": { "type": "string" },
                    "response_hash": { "type": "string" },
                    "description": { "type": "string" }
                },
                "required": ["source", "provider", "endpoint"],
                "additionalProperties": false
            },
            {
                "properties": {
                    "source": { "const": "url" },
                    "url": { "type": "string" },
                    "title": { "type": "string" },
                    "accessed_at": { "type": "string", "format": "date-time" },
                    "description": { "type": "string" }
                },
                "required": ["source", "url"],
                "additionalProperties": false
            },
            {
                "properties": {
                    "source": { "const": "observation" },
                    "description": { "type": "string" },
                    "observed_at": { "type": "string", "format": "date-time" }
                },
                "required": ["source", "description"],
                "additionalProperties": false
            },
            {
                "properties": {
                    "source": { "const": "document" },
                    "path": { "type": "string" },
                    "page": { "type": "integer" },
                    "title": { "type": "string" },
                    "description": { "type": "string" }
                },
                "required": ["source", "path"],
                "additionalProperties": false
            }
        ]
    })
}

fn insight_draft_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "insight_id": { "type": "string", "format": "uuid" },
            "summary": { "type": "string", "minLength": 1 },
            "importance": { "type": "integer", "minimum": 0, "maximum": 10, "default": 5 },
            "status": { "enum": ["active", "archived", "killed"] },
            "citations": { "type": "array", "items": citation_schema() },
            "supporting_queries": {
                "type": "array",
                "items": { "type": "string" },
                "description": "Legacy; kept in sync with query-sourced citations",
                "default": []
            },
            "metadata": { "type": "object" }
        },
        "required": ["summary"],
        "additionalProperties": false
    })
}

fn json_schema() -> Value {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "title": "ProposedChanges",
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "insights_to_add": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "section_id": { "type": "string", "format": "uuid" },
                        "insight": insight_draft_schema()
                    },
                    "required": ["insight"],
                    "additionalProperties": false
                }
            },
            "insights_to_modify": {
                "type": "array",
                "items": {
                    "type": "object",
                    "description": "insight_id plus at least one field to change",
                    "properties": {
                        "insight_id": { "type": "string", "format": "uuid" },
                        "summary": { "type": "string", "minLength": 1 },
                        "importance": { "type": "integer", "minimum": 0, "maximum": 10 },
                        "status": { "enum": ["active", "archived", "killed"] },
                        "citations": { "type": "array", "items": citation_schema() },
                        "supporting_queries": { "type": "array", "items": { "type": "string" } },
                        "metadata": { "type": "object" }
                    },
                    "required": ["insight_id"],
                    "additionalProperties": false
                }
            },
            "insights_to_remove": {
                "type": "array",
                "items": { "type": "string", "format": "uuid" }
            },
            "sections_to_add": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "section_id": { "type": "string", "format": "uuid" },
                        "title": { "type": "string", "minLength": 1 },
                        "order": { "type": "integer" },
                        "notes": { "type": "string" },
                        "content": { "type": "string" },
                        "content_format": { "enum": ["markdown", "text", "html"] },
                        "metadata": { "type": "object" },
                        "insights": { "type": "array", "items": insight_draft_schema() }
                    },
                    "required": ["title"],
                    "additionalProperties": false
                }
            },
            "sections_to_modify": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "section_id": { "type": "string", "format": "uuid" },
                        "title": { "type": "string" },
                        "order": { "type": "integer" },
                        "notes": { "type": "string" },
                        "content": { "type": "string" },
                        "content_format": { "enum": ["markdown", "text", "html"] },
                        "metadata": { "type": "object" },
                        "insight_ids_to_add": { "type": "array", "items": { "type": "string" } },
                        "insight_ids_to_remove": { "type": "array", "items": { "type": "string" } },
                        "insights": {
                            "type": "array",
                            "items": insight_draft_schema(),
                            "description": "Inline create-and-link"
                        }
                    },
                    "required": ["section_id"],
                    "additionalProperties": false
                }
            },
            "sections_to_remove": {
                "type": "array",
                "items": { "type": "string", "format": "uuid" }
            },
            "status_change": {
                "enum": ["active", "archived", "deleted"],
                "description": "Exclusive with every other operation"
            },
            "metadata_updates": { "type": "object" },
            "title_change": { "type": "string", "minLength": 1 }
        }
    })
}

fn compact() -> Value {
    json!([
        "insights_to_add: [{section_id?: uuid, insight: {summary: str!, importance: 0..10 = 5, citations?: [citation], supporting_queries?: [str]}}]",
        "insights_to_modify: [{insight_id: uuid!, summary? | importance? | status?(active|archived|killed) | citations? | supporting_queries? | metadata? - at least one}]",
        "insights_to_remove: [uuid] - missing ids are no-op warnings",
        "sections_to_add: [{title: str!, order?: int, notes?, content?, content_format?(markdown|text|html), insights?: [inline insight]}]",
        "sections_to_modify: [{section_id: uuid!, title?|order?|notes?|content?|content_format?|metadata?, insight_ids_to_add?: [uuid], insight_ids_to_remove?: [uuid], insights?: [inline insight]}]",
        "sections_to_remove: [uuid]",
        "status_change: active|archived|deleted - exclusive with all other ops",
        "metadata_updates: {key: value} - merged into outline metadata tags",
        "title_change: str",
        "citation: {source: query|api|url|observation|document, ...} - query needs provider, api needs provider+endpoint, url needs url, observation needs description, document needs path",
    ])
}
