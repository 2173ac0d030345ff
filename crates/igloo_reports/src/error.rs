//! Report error taxonomy.
//!
//! Validation failures carry field paths and schema examples so agents
//! can self-correct; the tool layer returns them as structured
//! `validation_failed` responses instead of raising. Hard failures
//! (I/O, lock timeout) surface as errors.

use igloo_core::lock::LockError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// One field-level problem in a proposed change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// e.g. `insights_to_modify[0].insight_id`
    pub field_path: String,
    pub input_value: Value,
    pub message: String,
    /// A copy-paste example of a valid payload for this operation.
    pub schema_example: Value,
}

impl ValidationIssue {
    pub fn new(
        field_path: impl Into<String>,
        input_value: Value,
        message: impl Into<String>,
        schema_example: Value,
    ) -> Self {
        Self {
            field_path: field_path.into(),
            input_value,
            message: message.into(),
            schema_example,
        }
    }
}

/// Why a selector did not resolve.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "error", rename_all = "snake_case")]
pub enum SelectorFailure {
    NotFound {
        selector: String,
    },
    Ambiguous {
        selector: String,
        candidates: Vec<String>,
    },
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Proposed changes failed validation ({} issue(s))", .0.len())]
    Validation(Vec<ValidationIssue>),

    #[error("Selector failed: {0:?}")]
    Selector(SelectorFailure),

    #[error("Version conflict: expected {expected}, current is {current}")]
    VersionConflict { expected: u64, current: u64 },

    #[error(transparent)]
    LockTimeout(#[from] LockError),

    #[error("Report I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Chart is {size_bytes} bytes, over the {max_bytes} byte limit")]
    ChartTooLarge { size_bytes: u64, max_bytes: u64 },

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Report state is corrupt: {0}")]
    Corrupt(String),

    #[error("Unknown audit action: {0}")]
    UnknownAction(String),
}

impl ReportError {
    /// Stable error kind string for tool envelopes.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_failed",
            Self::Selector(SelectorFailure::NotFound { .. }) => "selector_error",
            Self::Selector(SelectorFailure::Ambiguous { .. }) => "selector_error",
            Self::VersionConflict { .. } => "version_conflict",
            Self::LockTimeout(_) => "lock_timeout",
            Self::Io(_) => "io_error",
            Self::ChartTooLarge { .. } => "chart_too_large",
            Self::UnsupportedFormat(_) => "unsupported_format",
            Self::Corrupt(_) => "io_error",
            Self::UnknownAction(_) => "validation_failed",
        }
    }
}
