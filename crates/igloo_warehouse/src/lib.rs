//! Warehouse and profile interfaces.
//!
//! The gateway talks to Snowflake through the narrow [`WarehouseClient`]
//! trait: submit with a query tag, poll, fetch, cancel, ping. The real
//! driver lives outside this workspace; tests use
//! [`mock::ScriptedWarehouse`]. Keeping the seam this small is what lets
//! the whole scheduling pipeline run under test without a warehouse.

pub mod mock;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Server-side query identifier, assigned by the warehouse at submit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryId(pub String);

impl QueryId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session context for a request: warehouse, database, schema, role.
///
/// All fields optional; unset fields keep the connection's defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warehouse: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl SessionContext {
    /// Per-request overrides layered over this context.
    pub fn merged(&self, overrides: &SessionContext) -> SessionContext {
        SessionContext {
            warehouse: overrides.warehouse.clone().or_else(|| self.warehouse.clone()),
            database: overrides.database.clone().or_else(|| self.database.clone()),
            schema: overrides.schema.clone().or_else(|| self.schema.clone()),
            role: overrides.role.clone().or_else(|| self.role.clone()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.warehouse.is_none()
            && self.database.is_none()
            && self.schema.is_none()
            && self.role.is_none()
    }
}

/// QUERY_TAG payload attached to every submitted statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryTag {
    pub reason: String,
    pub execution_id: String,
}

impl QueryTag {
    /// Wire form set as the session QUERY_TAG.
    pub fn render(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                "{{\"reason\":\"{}\",\"execution_id\":\"{}\"}}",
                self.reason, self.execution_id
            )
        })
    }
}

/// Where a submitted query currently stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum QueryStatus {
    Running,
    Complete { row_count: usize },
    Failed { message: String },
}

/// Column-major metadata plus row-major values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl RowSet {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<serde_json::Value>>) -> Self {
        Self { columns, rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// Errors from the warehouse seam.
#[derive(Debug, Clone, Error)]
pub enum WarehouseError {
    #[error("Warehouse connection failed: {0}")]
    Connection(String),

    #[error("Query {query_id} failed: {message}")]
    QueryFailed { query_id: QueryId, message: String },

    #[error("Unknown query id: {0}")]
    UnknownQuery(QueryId),

    #[error("Warehouse driver error: {0}")]
    Driver(String),
}

/// The narrow driver interface the core consumes.
///
/// Implementations must be safe to share across threads; the scheduler
/// polls from background threads while tool calls submit new work.
pub trait WarehouseClient: Send + Sync {
    /// Apply session context (warehouse/database/schema/role) for
    /// subsequent submissions on this logical session.
    fn set_session_context(&self, ctx: &SessionContext) -> Result<(), WarehouseError>;

    /// Submit a statement tagged with reason + execution id. Returns the
    /// server-assigned query id without waiting for completion.
    fn submit(&self, sql: &str, tag: &QueryTag) -> Result<QueryId, WarehouseError>;

    /// Poll a submitted query.
    fn poll(&self, query_id: &QueryId) -> Result<QueryStatus, WarehouseError>;

    /// Fetch the full result of a completed query.
    fn fetch(&self, query_id: &QueryId) -> Result<RowSet, WarehouseError>;

    /// Best-effort server-side cancel.
    fn cancel(&self, query_id: &QueryId) -> Result<(), WarehouseError>;

    /// Cheap connectivity check.
    fn ping(&self) -> Result<(), WarehouseError>;
}

/// A named connection profile and its default session context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    #[serde(default)]
    pub session: SessionContext,
}

/// Resolves the active profile. Authentication and credential storage are
/// external; the core only needs the name and default session.
pub trait ProfileResolver: Send + Sync {
    fn resolve(&self) -> Result<Profile, WarehouseError>;
}

/// A fixed profile, built from CLI flags or the environment.
#[derive(Debug, Clone)]
pub struct StaticProfile(pub Profile);

impl ProfileResolver for StaticProfile {
    fn resolve(&self) -> Result<Profile, WarehouseError> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_merge() {
        let base = SessionContext {
            warehouse: Some("WH".into()),
            database: Some("DB".into()),
            schema: None,
            role: Some("ANALYST".into()),
        };
        let overrides = SessionContext {
            database: Some("OTHER".into()),
            schema: Some("PUBLIC".into()),
            ..Default::default()
        };

        let merged = base.merged(&overrides);
        assert_eq!(merged.warehouse.as_deref(), Some("WH"));
        assert_eq!(merged.database.as_deref(), Some("OTHER"));
        assert_eq!(merged.schema.as_deref(), Some("PUBLIC"));
        assert_eq!(merged.role.as_deref(), Some("ANALYST"));
    }

    #[test]
    fn test_query_tag_render() {
        let tag = QueryTag {
            reason: "audit check".to_string(),
            execution_id: "exec-1".to_string(),
        };
        let rendered = tag.render();
        assert!(rendered.contains("audit check"));
        assert!(rendered.contains("exec-1"));
        // Round-trips as JSON.
        let parsed: QueryTag = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed.execution_id, "exec-1");
    }

    #[test]
    fn test_static_profile() {
        let resolver = StaticProfile(Profile {
            name: "dev".to_string(),
            session: SessionContext::default(),
        });
        assert_eq!(resolver.resolve().unwrap().name, "dev");
    }
}
