//! Catalog data model and on-disk formats.
//!
//! Each crawled database produces three files under
//! `<catalog_root>/<db>/`:
//!
//! - `catalog.{json|jsonl}`: the objects themselves
//! - `catalog_summary.json`: totals and per-schema counts
//! - `_catalog_metadata.json`: build timestamps for incremental refresh

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Output format for the object file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CatalogFormat {
    #[default]
    Json,
    /// One object per line, streamed with bounded memory.
    Jsonl,
}

impl CatalogFormat {
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Json => "catalog.json",
            Self::Jsonl => "catalog.jsonl",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    Table,
    View,
    Function,
    Procedure,
}

impl ObjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::View => "view",
            Self::Function => "function",
            Self::Procedure => "procedure",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub position: u32,
}

/// One catalog entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogObject {
    pub database: String,
    pub schema: String,
    pub name: String,
    pub object_type: ObjectType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<ColumnInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ddl: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_altered: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl CatalogObject {
    /// Fully qualified `DB.SCHEMA.NAME`.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}.{}", self.database, self.schema, self.name)
    }
}

/// A non-fatal problem recorded during a build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogWarning {
    pub code: String,
    pub message: String,
    pub severity: WarningSeverity,
    /// What the worker was doing, e.g. `DB.SCHEMA.VIEW_NAME ddl`.
    pub context: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningSeverity {
    Info,
    Warning,
    Error,
}

/// Totals for one database, also used in the summary document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogTotals {
    pub schemas: usize,
    pub tables: usize,
    pub views: usize,
    pub functions: usize,
    pub procedures: usize,
    pub columns: usize,
}

/// `catalog_summary.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogSummary {
    pub database: String,
    pub totals: CatalogTotals,
    /// schema → object count.
    pub per_schema: std::collections::BTreeMap<String, usize>,
    pub last_build: DateTime<Utc>,
}

/// `_catalog_metadata.json`, drives incremental refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogMetadata {
    pub database: String,
    pub last_build: DateTime<Utc>,
    pub last_full_refresh: DateTime<Utc>,
    pub format: CatalogFormat,
}
