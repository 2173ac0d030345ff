//! Filesystem result cache.
//!
//! Keyed by `(profile, session context, sql_sha256)`. Each entry is a
//! directory holding `payload.json` (row data, truncated at `max_rows`)
//! and `manifest.json` (execution metadata including source attribution).
//! Writes are atomic per file and ordered payload → manifest, so a
//! manifest's presence implies a complete payload. The cache knows
//! nothing about SQL semantics; mode selection happens in the scheduler.

use chrono::{DateTime, Utc};
use igloo_core::{fsio, sha256_hex};
use igloo_warehouse::{RowSet, SessionContext};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Cache entry identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheKey(pub String);

impl CacheKey {
    /// Hash of profile ‖ warehouse ‖ database ‖ schema ‖ role ‖ sql sha.
    pub fn compute(profile: &str, session: &SessionContext, sql_sha256: &str) -> Self {
        let material = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            profile,
            session.warehouse.as_deref().unwrap_or(""),
            session.database.as_deref().unwrap_or(""),
            session.schema.as_deref().unwrap_or(""),
            session.role.as_deref().unwrap_or(""),
            sql_sha256,
        );
        Self(sha256_hex(material.as_bytes()))
    }
}

/// Metadata describing a cached payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheManifest {
    pub cache_key: String,
    pub execution_id: String,
    pub profile: String,
    pub session_context: SessionContext,
    pub sql_sha256: String,
    pub columns: Vec<String>,
    /// Rows stored in the payload (after truncation).
    pub row_count: usize,
    /// Rows the execution actually produced.
    pub total_row_count: usize,
    pub truncated: bool,
    pub source_databases: Vec<String>,
    pub tables: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResultCache {
    root: PathBuf,
    max_rows: usize,
}

impl ResultCache {
    pub fn new(cache_root: &Path, max_rows: usize) -> Self {
        Self {
            root: cache_root.to_path_buf(),
            max_rows,
        }
    }

    pub fn max_rows(&self) -> usize {
        self.max_rows
    }

    fn entry_dir(&self, key: &CacheKey) -> PathBuf {
        self.root.join(&key.0)
    }

    /// Look an entry up. Any read or parse failure is a miss.
    pub fn lookup(&self, key: &CacheKey) -> Option<(CacheManifest, RowSet)> {
        let dir = self.entry_dir(key);
        let manifest_bytes = std::fs::read(dir.join("manifest.json")).ok()?;
        let manifest: CacheManifest = serde_json::from_slice(&manifest_bytes).ok()?;
        let payload_bytes = std::fs::read(dir.join("payload.json")).ok()?;
        let rows: Vec<Vec<serde_json::Value>> = serde_json::from_slice(&payload_bytes).ok()?;
        debug!("Cache hit: {}", key.0);
        Some((
            manifest.clone(),
            RowSet::new(manifest.columns.clone(), rows),
        ))
    }

    /// Store an entry: payload first, manifest last.
    #[allow(clippy::too_many_arguments)]
    pub fn write(
        &self,
        key: &CacheKey,
        execution_id: &str,
        profile: &str,
        session: &SessionContext,
        sql_sha256: &str,
        rows: &RowSet,
        source_databases: &[String],
        tables: &[String],
        query_id: Option<&str>,
    ) -> io::Result<CacheManifest> {
        let dir = self.entry_dir(key);

        let total = rows.row_count();
        let stored: Vec<&Vec<serde_json::Value>> = rows.rows.iter().take(self.max_rows).collect();
        let truncated = total > stored.len();

        fsio::atomic_write_json(&dir.join("payload.json"), &stored)?;

        let manifest = CacheManifest {
            cache_key: key.0.clone(),
            execution_id: execution_id.to_string(),
            profile: profile.to_string(),
            session_context: session.clone(),
            sql_sha256: sql_sha256.to_string(),
            columns: rows.columns.clone(),
            row_count: stored.len(),
            total_row_count: total,
            truncated,
            source_databases: source_databases.to_vec(),
            tables: tables.to_vec(),
            created_at: Utc::now(),
            query_id: query_id.map(|s| s.to_string()),
        };
        fsio::atomic_write_json(&dir.join("manifest.json"), &manifest)?;
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use igloo_warehouse::mock::int_rows;
    use tempfile::TempDir;

    fn session() -> SessionContext {
        SessionContext {
            warehouse: Some("WH".into()),
            database: Some("DB".into()),
            schema: Some("PUBLIC".into()),
            role: None,
        }
    }

    #[test]
    fn test_key_depends_on_all_parts() {
        let base = CacheKey::compute("p1", &session(), "sha-a");
        assert_eq!(base, CacheKey::compute("p1", &session(), "sha-a"));

        assert_ne!(base, CacheKey::compute("p2", &session(), "sha-a"));
        assert_ne!(base, CacheKey::compute("p1", &session(), "sha-b"));

        let mut other = session();
        other.role = Some("ANALYST".into());
        assert_ne!(base, CacheKey::compute("p1", &other, "sha-a"));
    }

    #[test]
    fn test_write_then_lookup() {
        let temp = TempDir::new().unwrap();
        let cache = ResultCache::new(temp.path(), 5000);
        let key = CacheKey::compute("dev", &session(), "sha-1");

        let rows = int_rows("id", &[1, 2, 3]);
        cache
            .write(
                &key,
                "e-1",
                "dev",
                &session(),
                "sha-1",
                &rows,
                &["A".to_string()],
                &["A.B.C".to_string()],
                Some("q-1"),
            )
            .unwrap();

        let (manifest, loaded) = cache.lookup(&key).unwrap();
        assert_eq!(manifest.row_count, 3);
        assert_eq!(manifest.total_row_count, 3);
        assert!(!manifest.truncated);
        assert_eq!(manifest.source_databases, vec!["A".to_string()]);
        assert_eq!(manifest.tables, vec!["A.B.C".to_string()]);
        assert_eq!(loaded.rows, rows.rows);
    }

    #[test]
    fn test_payload_truncated_at_max_rows() {
        let temp = TempDir::new().unwrap();
        let cache = ResultCache::new(temp.path(), 2);
        let key = CacheKey::compute("dev", &session(), "sha-1");

        let rows = int_rows("id", &[1, 2, 3, 4]);
        let manifest = cache
            .write(&key, "e-1", "dev", &session(), "sha-1", &rows, &[], &[], None)
            .unwrap();

        assert!(manifest.truncated);
        assert_eq!(manifest.row_count, 2);
        assert_eq!(manifest.total_row_count, 4);

        let (_, loaded) = cache.lookup(&key).unwrap();
        // Stored rows are a prefix of the original result.
        assert_eq!(loaded.rows, rows.rows[..2].to_vec());
    }

    #[test]
    fn test_missing_entry_is_a_miss() {
        let temp = TempDir::new().unwrap();
        let cache = ResultCache::new(temp.path(), 10);
        let key = CacheKey::compute("dev", &session(), "nope");
        assert!(cache.lookup(&key).is_none());
    }

    #[test]
    fn test_corrupt_manifest_is_a_miss() {
        let temp = TempDir::new().unwrap();
        let cache = ResultCache::new(temp.path(), 10);
        let key = CacheKey::compute("dev", &session(), "sha-1");

        cache
            .write(&key, "e", "dev", &session(), "sha-1", &int_rows("id", &[1]), &[], &[], None)
            .unwrap();
        std::fs::write(temp.path().join(&key.0).join("manifest.json"), b"{oops").unwrap();
        assert!(cache.lookup(&key).is_none());
    }
}
