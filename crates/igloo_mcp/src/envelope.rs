//! Uniform tool response envelope and parameter coercion.
//!
//! Every tool response is `{status, ...data, timing, warnings,
//! request_id}`. Validation problems come back as `status:
//! "validation_failed"` payloads agents can self-correct from; hard
//! failures become `status: "error"` with a structured kind from the
//! error taxonomy. Errors never escape the dispatcher as raised
//! JSON-RPC faults unless the request itself was malformed.

use igloo_catalog::CatalogError;
use igloo_query::QueryError;
use igloo_reports::{ReportError, SelectorFailure};
use igloo_sql::SqlError;
use serde_json::{json, Map, Value};
use thiserror::Error;
use uuid::Uuid;

/// Anything a tool can fail with.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Report(#[from] ReportError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("Invalid parameters: {0}")]
    Params(String),
}

/// A successful tool result before enveloping.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub status: String,
    pub body: Map<String, Value>,
    pub warnings: Vec<String>,
}

impl ToolOutput {
    /// Success with a JSON object body.
    pub fn success(body: Value) -> Self {
        Self::with_status("success", body)
    }

    pub fn with_status(status: impl Into<String>, body: Value) -> Self {
        let body = match body {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("data".to_string(), other);
                map
            }
        };
        Self {
            status: status.into(),
            body,
            warnings: Vec::new(),
        }
    }

    pub fn warn(mut self, warnings: impl IntoIterator<Item = String>) -> Self {
        self.warnings.extend(warnings);
        self
    }
}

/// Use the caller's request id or mint one, and propagate it downstream.
pub fn request_id_from(args: &Value) -> String {
    args.get("request_id")
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// Assemble the final envelope.
pub fn envelope(
    result: Result<ToolOutput, ToolError>,
    request_id: &str,
    duration_ms: u64,
) -> Value {
    let (status, mut body, warnings) = match result {
        Ok(output) => (output.status, output.body, output.warnings),
        Err(error) => {
            let (status, body) = error_body(&error);
            (status.to_string(), body, Vec::new())
        }
    };

    body.insert("status".to_string(), Value::String(status));
    body.insert(
        "timing".to_string(),
        json!({ "total_duration_ms": duration_ms }),
    );
    body.insert(
        "warnings".to_string(),
        Value::Array(warnings.into_iter().map(Value::String).collect()),
    );
    body.insert(
        "request_id".to_string(),
        Value::String(request_id.to_string()),
    );
    Value::Object(body)
}

fn issue(field_path: &str, message: String, hints: Vec<String>) -> Value {
    json!({
        "field_path": field_path,
        "message": message,
        "hints": hints,
    })
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Map the error taxonomy to `(status, body)`.
fn error_body(error: &ToolError) -> (&'static str, Map<String, Value>) {
    match error {
        ToolError::Params(message) => (
            "validation_failed",
            object(json!({ "errors": [issue("arguments", message.clone(), vec![])] })),
        ),

        ToolError::Query(QueryError::Sql(SqlError::Denied {
            kind,
            safe_alternatives,
        })) => (
            "error",
            object(json!({
                "error": {
                    "kind": "denied",
                    "statement_kind": kind.as_str(),
                    "message": format!("Statement kind '{}' is denied by policy", kind.as_str()),
                    "safe_alternatives": safe_alternatives,
                }
            })),
        ),
        ToolError::Query(QueryError::Sql(SqlError::Malformed { message, hints })) => (
            "validation_failed",
            object(json!({
                "errors": [issue("statement", message.clone(), hints.clone())]
            })),
        ),
        ToolError::Query(QueryError::Sql(SqlError::TooLong { length, max })) => (
            "validation_failed",
            object(json!({
                "errors": [issue(
                    "statement",
                    format!("Statement is {} chars, over the {} char limit", length, max),
                    vec!["Split the statement or reference a stored artifact".to_string()],
                )]
            })),
        ),
        ToolError::Query(QueryError::ReasonLength { length, min, max }) => (
            "validation_failed",
            object(json!({
                "errors": [issue(
                    "reason",
                    format!("reason must be {}-{} chars, got {}", min, max, length),
                    vec!["Explain why this query is being run, e.g. 'check daily volume'".to_string()],
                )]
            })),
        ),
        ToolError::Query(QueryError::Execution { query_id, message }) => (
            "error",
            object(json!({
                "error": {
                    "kind": "execution_error",
                    "query_id": query_id,
                    "message": message,
                }
            })),
        ),
        ToolError::Query(QueryError::Warehouse(e)) => (
            "error",
            object(json!({
                "error": { "kind": "execution_error", "message": e.to_string() }
            })),
        ),

        ToolError::Report(ReportError::Validation(issues)) => (
            "validation_failed",
            object(json!({ "errors": issues })),
        ),
        ToolError::Report(ReportError::Selector(failure)) => {
            let detail = match failure {
                SelectorFailure::NotFound { selector } => json!({
                    "kind": "selector_error",
                    "error": "not_found",
                    "selector": selector,
                }),
                SelectorFailure::Ambiguous {
                    selector,
                    candidates,
                } => json!({
                    "kind": "selector_error",
                    "error": "ambiguous",
                    "selector": selector,
                    "candidates": candidates,
                }),
            };
            ("error", object(json!({ "error": detail })))
        }
        ToolError::Report(ReportError::VersionConflict { expected, current }) => (
            "error",
            object(json!({
                "error": {
                    "kind": "version_conflict",
                    "expected_version": expected,
                    "current_version": current,
                    "message": "Re-read the report and rebase the patch onto the current version",
                }
            })),
        ),
        ToolError::Report(e) => (
            "error",
            object(json!({
                "error": { "kind": e.kind(), "message": e.to_string() }
            })),
        ),

        ToolError::Catalog(CatalogError::Warehouse(e)) => (
            "error",
            object(json!({
                "error": { "kind": "execution_error", "message": e.to_string() }
            })),
        ),
        ToolError::Catalog(CatalogError::NotBuilt(path)) => (
            "error",
            object(json!({
                "error": {
                    "kind": "io_error",
                    "message": format!(
                        "No catalog found under {}; run build_catalog first",
                        path.display()
                    ),
                }
            })),
        ),
        ToolError::Catalog(e) => (
            "error",
            object(json!({
                "error": { "kind": "io_error", "message": e.to_string() }
            })),
        ),
    }
}

// ============================================================================
// Parameter coercion
// ============================================================================

/// Coerce a loosely-typed integer parameter: accepts `30`, `"30"`,
/// `30.0`, rejects `"30s"` and negatives with a clear error.
pub fn coerce_u64(args: &Value, field: &str) -> Result<Option<u64>, ToolError> {
    let Some(value) = args.get(field) else {
        return Ok(None);
    };
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => {
            if let Some(v) = n.as_u64() {
                return Ok(Some(v));
            }
            if let Some(f) = n.as_f64() {
                if f >= 0.0 && f.fract() == 0.0 {
                    return Ok(Some(f as u64));
                }
            }
            Err(ToolError::Params(format!(
                "{} must be a non-negative integer, got {}",
                field, n
            )))
        }
        Value::String(s) => s.trim().parse::<u64>().map(Some).map_err(|_| {
            ToolError::Params(format!(
                "{} must be an integer or numeric string (e.g. 30 or \"30\"), got \"{}\"",
                field, s
            ))
        }),
        other => Err(ToolError::Params(format!(
            "{} must be an integer, got {}",
            field, other
        ))),
    }
}

/// Required string parameter.
pub fn require_str<'a>(args: &'a Value, field: &str) -> Result<&'a str, ToolError> {
    args.get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::Params(format!("missing required string parameter: {}", field)))
}

/// Optional string parameter.
pub fn optional_str<'a>(args: &'a Value, field: &str) -> Option<&'a str> {
    args.get(field).and_then(|v| v.as_str())
}

/// Optional bool with default.
pub fn optional_bool(args: &Value, field: &str, default: bool) -> bool {
    args.get(field).and_then(|v| v.as_bool()).unwrap_or(default)
}

/// Optional string array.
pub fn optional_str_vec(args: &Value, field: &str) -> Vec<String> {
    args.get(field)
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default()
}
