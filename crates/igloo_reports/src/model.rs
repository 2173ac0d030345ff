//! Report data model.
//!
//! The outline stores sections and insights as flat ordered arrays; all
//! cross-references are by UUID string. This keeps serialization trivial
//! and rules out cyclic structures.

use chrono::{DateTime, Utc};
use igloo_core::sha256_hex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// `rpt_`-prefixed url-safe UUID, never reused.
pub fn new_report_id() -> String {
    format!("rpt_{}", Uuid::new_v4().simple())
}

pub fn new_action_id() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    #[default]
    Active,
    Archived,
    Deleted,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Archived => "archived",
            Self::Deleted => "deleted",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InsightStatus {
    #[default]
    Active,
    Archived,
    Killed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContentFormat {
    #[default]
    Markdown,
    Text,
    Html,
}

/// Named renderer policy; `analyst_v1` also enforces citations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Template {
    #[default]
    Default,
    AnalystV1,
}

impl Template {
    pub fn requires_citations(&self) -> bool {
        matches!(self, Self::AnalystV1)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::AnalystV1 => "analyst_v1",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim() {
            "default" | "" => Some(Self::Default),
            "analyst_v1" => Some(Self::AnalystV1),
            _ => None,
        }
    }
}

/// A typed reference to a data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum Citation {
    Query {
        provider: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        execution_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        query_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        sql_sha256: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        cache_manifest: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Api {
        provider: String,
        endpoint: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        response_hash: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Url {
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        accessed_at: Option<DateTime<Utc>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Observation {
        description: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        observed_at: Option<DateTime<Utc>>,
    },
    Document {
        path: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        page: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
}

impl Citation {
    pub fn source_kind(&self) -> &'static str {
        match self {
            Self::Query { .. } => "query",
            Self::Api { .. } => "api",
            Self::Url { .. } => "url",
            Self::Observation { .. } => "observation",
            Self::Document { .. } => "document",
        }
    }

    pub fn provider(&self) -> Option<&str> {
        match self {
            Self::Query { provider, .. } | Self::Api { provider, .. } => Some(provider),
            _ => None,
        }
    }

    pub fn description(&self) -> Option<&str> {
        match self {
            Self::Query { description, .. }
            | Self::Api { description, .. }
            | Self::Url { description, .. }
            | Self::Document { description, .. } => description.as_deref(),
            Self::Observation { description, .. } => Some(description),
        }
    }

    pub fn execution_id(&self) -> Option<&str> {
        match self {
            Self::Query { execution_id, .. } => execution_id.as_deref(),
            _ => None,
        }
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Url { url, .. } => Some(url),
            _ => None,
        }
    }
}

/// A short, importance-scored finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub insight_id: String,
    pub summary: String,
    /// 0..=10
    pub importance: u8,
    #[serde(default)]
    pub status: InsightStatus,
    #[serde(default)]
    pub citations: Vec<Citation>,
    /// Legacy field, kept in sync with query-sourced citations.
    #[serde(default)]
    pub supporting_queries: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

impl Insight {
    /// Chart referenced via `metadata.chart_id`, when present.
    pub fn chart_id(&self) -> Option<&str> {
        self.metadata.get("chart_id").and_then(|v| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub section_id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<i64>,
    #[serde(default)]
    pub insight_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub notes: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,
    #[serde(default)]
    pub content_format: ContentFormat,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartFormat {
    Png,
    Jpg,
    Jpeg,
    Svg,
    Gif,
    Webp,
}

impl ChartFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpg" => Some(Self::Jpg),
            "jpeg" => Some(Self::Jpeg),
            "svg" => Some(Self::Svg),
            "gif" => Some(Self::Gif),
            "webp" => Some(Self::Webp),
            _ => None,
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpg | Self::Jpeg => "image/jpeg",
            Self::Svg => "image/svg+xml",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
        }
    }
}

/// Hard per-chart size cap.
pub const CHART_MAX_BYTES: u64 = 50 * 1024 * 1024;
/// Soft warning thresholds.
pub const CHART_SOFT_WARN_BYTES: [u64; 2] = [5 * 1024 * 1024, 10 * 1024 * 1024];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chart {
    pub chart_id: String,
    /// Absolute path.
    pub path: String,
    pub format: ChartFormat,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub linked_insight_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutlineMetadata {
    #[serde(default)]
    pub template: Template,
    #[serde(default)]
    pub executive_summary_insight_ids: Vec<String>,
    /// Free-form tags, merged by `metadata_updates`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, Value>,
}

/// The canonical machine-truth state of a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outline {
    /// Strictly monotonic; +1 per accepted mutation, 1 at creation.
    pub version: u64,
    #[serde(default)]
    pub sections: Vec<Section>,
    #[serde(default)]
    pub insights: Vec<Insight>,
    pub metadata: OutlineMetadata,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub charts: BTreeMap<String, Chart>,
}

impl Outline {
    pub fn new(template: Template) -> Self {
        Self {
            version: 1,
            sections: Vec::new(),
            insights: Vec::new(),
            metadata: OutlineMetadata {
                template,
                ..Default::default()
            },
            charts: BTreeMap::new(),
        }
    }

    pub fn template(&self) -> Template {
        self.metadata.template
    }

    pub fn insight(&self, id: &str) -> Option<&Insight> {
        self.insights.iter().find(|i| i.insight_id == id)
    }

    pub fn insight_mut(&mut self, id: &str) -> Option<&mut Insight> {
        self.insights.iter_mut().find(|i| i.insight_id == id)
    }

    pub fn section(&self, id: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.section_id == id)
    }

    pub fn section_mut(&mut self, id: &str) -> Option<&mut Section> {
        self.sections.iter_mut().find(|s| s.section_id == id)
    }

    /// Sections in display order: explicit `order` ascending, missing
    /// orders last, stable by insertion.
    pub fn ordered_sections(&self) -> Vec<&Section> {
        let mut indexed: Vec<(usize, &Section)> = self.sections.iter().enumerate().collect();
        indexed.sort_by_key(|(idx, s)| (s.order.is_none(), s.order, *idx));
        indexed.into_iter().map(|(_, s)| s).collect()
    }

    /// Content digest over the canonical JSON form.
    pub fn sha256(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        sha256_hex(&bytes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    Cli,
    Agent,
    Human,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Create,
    Evolve,
    Revert,
    Render,
    Rename,
    TagUpdate,
    StatusChange,
    ManualEditDetected,
    ChartAttach,
    AuditRotate,
}

/// Immutable audit record; one line of `audit.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub action_id: String,
    pub report_id: String,
    pub ts: DateTime<Utc>,
    pub actor: Actor,
    pub action_type: ActionType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before_outline_sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after_outline_sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Inline pre-image for small outlines...
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before_snapshot: Option<Outline>,
    /// ...or the backup file holding it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before_backup: Option<String>,
}
