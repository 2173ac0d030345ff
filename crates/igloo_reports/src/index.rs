//! Global report index.
//!
//! `reports/index.jsonl` holds one entry per report. Mutations rewrite
//! the file atomically under its own lock; readers never lock. A corrupt
//! index (unparseable lines) is rebuilt from the filesystem by replaying
//! each report's audit log, so the index is derived state, never the
//! source of truth.

use crate::error::{ReportError, SelectorFailure};
use crate::model::{ReportStatus, Template};
use crate::storage::{replay_audit, ReportStorage};
use chrono::{DateTime, Utc};
use igloo_core::{fsio, FileLock};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub report_id: String,
    pub current_title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub status: ReportStatus,
    /// Relative to the reports root.
    pub path: String,
    #[serde(default)]
    pub template: Template,
}

#[derive(Debug, Clone)]
pub struct ReportIndex {
    reports_root: PathBuf,
    lock_timeout: Duration,
}

impl ReportIndex {
    pub fn new(reports_root: &Path, lock_timeout: Duration) -> Self {
        Self {
            reports_root: reports_root.to_path_buf(),
            lock_timeout,
        }
    }

    fn index_path(&self) -> PathBuf {
        self.reports_root.join("index.jsonl")
    }

    fn lock(&self) -> Result<FileLock, ReportError> {
        Ok(FileLock::acquire(
            &self.reports_root.join(".index.lock"),
            self.lock_timeout,
        )?)
    }

    /// Raw read, no rebuild. Returns entries plus corrupt-line count.
    fn read_entries(&self) -> Result<(Vec<IndexEntry>, usize), ReportError> {
        let path = self.index_path();
        if !path.exists() {
            return Ok((vec![], 0));
        }
        Ok(fsio::read_jsonl_lossy::<IndexEntry>(&path)?)
    }

    /// Load all entries. Corruption triggers an automatic rebuild.
    pub fn load(&self) -> Result<Vec<IndexEntry>, ReportError> {
        let (entries, skipped) = self.read_entries()?;
        if skipped > 0 {
            warn!(
                "Index has {} corrupt line(s); rebuilding from the filesystem",
                skipped
            );
            return self.rebuild();
        }
        Ok(entries)
    }

    /// Append a new entry.
    pub fn append(&self, entry: &IndexEntry) -> Result<(), ReportError> {
        let _lock = self.lock()?;
        fsio::append_jsonl(&self.index_path(), entry)?;
        Ok(())
    }

    /// Update one entry in place (atomic whole-file rewrite).
    pub fn update<F>(&self, report_id: &str, mutate: F) -> Result<(), ReportError>
    where
        F: FnOnce(&mut IndexEntry),
    {
        let _lock = self.lock()?;
        let (mut entries, skipped) = self.read_entries()?;
        if skipped > 0 {
            entries = self.rebuild_locked()?;
        }
        let Some(entry) = entries.iter_mut().find(|e| e.report_id == report_id) else {
            return Err(ReportError::Selector(SelectorFailure::NotFound {
                selector: report_id.to_string(),
            }));
        };
        mutate(entry);
        entry.updated_at = Utc::now();
        self.write_all(&entries)
    }

    fn write_all(&self, entries: &[IndexEntry]) -> Result<(), ReportError> {
        let mut lines = Vec::new();
        for entry in entries {
            let line =
                serde_json::to_vec(entry).map_err(|e| ReportError::Corrupt(e.to_string()))?;
            lines.extend_from_slice(&line);
            lines.push(b'\n');
        }
        fsio::atomic_write_bytes(&self.index_path(), &lines)?;
        Ok(())
    }

    /// Resolve a selector: exact id, then exact title (case-insensitive),
    /// then title substring. Multiple substring matches are ambiguous.
    pub fn resolve(&self, selector: &str) -> Result<IndexEntry, ReportError> {
        let entries = self.load()?;
        let needle = selector.trim();

        if let Some(entry) = entries.iter().find(|e| e.report_id == needle) {
            return Ok(entry.clone());
        }

        let exact: Vec<&IndexEntry> = entries
            .iter()
            .filter(|e| e.current_title.eq_ignore_ascii_case(needle))
            .collect();
        match exact.len() {
            1 => return Ok(exact[0].clone()),
            n if n > 1 => {
                return Err(ReportError::Selector(SelectorFailure::Ambiguous {
                    selector: selector.to_string(),
                    candidates: exact.iter().map(|e| e.report_id.clone()).collect(),
                }))
            }
            _ => {}
        }

        let lower = needle.to_lowercase();
        let fuzzy: Vec<&IndexEntry> = entries
            .iter()
            .filter(|e| e.current_title.to_lowercase().contains(&lower))
            .collect();
        match fuzzy.len() {
            0 => Err(ReportError::Selector(SelectorFailure::NotFound {
                selector: selector.to_string(),
            })),
            1 => Ok(fuzzy[0].clone()),
            _ => Err(ReportError::Selector(SelectorFailure::Ambiguous {
                selector: selector.to_string(),
                candidates: fuzzy.iter().map(|e| e.report_id.clone()).collect(),
            })),
        }
    }

    /// Filtered listing for `search_report`.
    pub fn search(
        &self,
        title_contains: Option<&str>,
        tags: &[String],
        status: Option<ReportStatus>,
    ) -> Result<Vec<IndexEntry>, ReportError> {
        let entries = self.load()?;
        Ok(entries
            .into_iter()
            .filter(|e| {
                title_contains
                    .map(|t| e.current_title.to_lowercase().contains(&t.to_lowercase()))
                    .unwrap_or(true)
            })
            .filter(|e| tags.iter().all(|t| e.tags.contains(t)))
            .filter(|e| status.map(|s| e.status == s).unwrap_or(true))
            .collect())
    }

    /// Rebuild the index from the filesystem by replaying audit logs.
    pub fn rebuild(&self) -> Result<Vec<IndexEntry>, ReportError> {
        let _lock = self.lock()?;
        self.rebuild_locked()
    }

    /// Rebuild body; the caller holds the index lock.
    fn rebuild_locked(&self) -> Result<Vec<IndexEntry>, ReportError> {
        let by_id = self.reports_root.join("by_id");
        let mut entries = Vec::new();

        if by_id.exists() {
            let storage = ReportStorage::new(&self.reports_root, self.lock_timeout);
            for entry in WalkDir::new(&by_id).min_depth(1).max_depth(1) {
                let entry = match entry {
                    Ok(e) => e,
                    Err(e) => {
                        warn!("Index rebuild skipping unreadable entry: {}", e);
                        continue;
                    }
                };
                if !entry.file_type().is_dir() {
                    continue;
                }
                let report_id = entry.file_name().to_string_lossy().into_owned();
                let events = match storage.read_audit(&report_id, None) {
                    Ok(events) => events,
                    Err(e) => {
                        warn!("Index rebuild skipping {}: {}", report_id, e);
                        continue;
                    }
                };
                let Some(replayed) = replay_audit(&events) else {
                    warn!("Index rebuild skipping {}: empty audit log", report_id);
                    continue;
                };
                entries.push(IndexEntry {
                    report_id: replayed.report_id.clone(),
                    current_title: replayed.title,
                    created_at: replayed.created_at,
                    updated_at: replayed.updated_at,
                    tags: replayed.tags,
                    status: replayed.status,
                    path: format!("by_id/{}", replayed.report_id),
                    template: replayed.template,
                });
            }
        }

        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        self.write_all(&entries)?;
        info!("Rebuilt index with {} report(s)", entries.len());
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Actor;
    use tempfile::TempDir;

    fn entry(id: &str, title: &str) -> IndexEntry {
        IndexEntry {
            report_id: id.to_string(),
            current_title: title.to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            tags: vec![],
            status: ReportStatus::Active,
            path: format!("by_id/{}", id),
            template: Template::Default,
        }
    }

    #[test]
    fn test_append_and_resolve_by_id() {
        let temp = TempDir::new().unwrap();
        let index = ReportIndex::new(temp.path(), Duration::from_secs(1));
        index.append(&entry("rpt_a", "Weekly revenue")).unwrap();

        let found = index.resolve("rpt_a").unwrap();
        assert_eq!(found.current_title, "Weekly revenue");
    }

    #[test]
    fn test_resolve_by_title_and_fuzzy() {
        let temp = TempDir::new().unwrap();
        let index = ReportIndex::new(temp.path(), Duration::from_secs(1));
        index.append(&entry("rpt_a", "Weekly revenue")).unwrap();
        index.append(&entry("rpt_b", "Weekly churn")).unwrap();

        assert_eq!(index.resolve("weekly revenue").unwrap().report_id, "rpt_a");
        assert_eq!(index.resolve("churn").unwrap().report_id, "rpt_b");

        match index.resolve("weekly") {
            Err(ReportError::Selector(SelectorFailure::Ambiguous { candidates, .. })) => {
                assert_eq!(candidates.len(), 2);
            }
            other => panic!("expected ambiguous, got {:?}", other.map(|e| e.report_id)),
        }

        assert!(matches!(
            index.resolve("nothing here"),
            Err(ReportError::Selector(SelectorFailure::NotFound { .. }))
        ));
    }

    #[test]
    fn test_update_rewrites_atomically() {
        let temp = TempDir::new().unwrap();
        let index = ReportIndex::new(temp.path(), Duration::from_secs(1));
        index.append(&entry("rpt_a", "Old title")).unwrap();

        index
            .update("rpt_a", |e| e.current_title = "New title".to_string())
            .unwrap();

        let entries = index.load().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].current_title, "New title");
    }

    #[test]
    fn test_corrupt_index_triggers_rebuild() {
        let temp = TempDir::new().unwrap();
        let storage = ReportStorage::new(temp.path(), Duration::from_secs(1));
        storage
            .create("rpt_a", "Recovered", Template::Default, &[], Actor::Cli, None)
            .unwrap();

        let index = ReportIndex::new(temp.path(), Duration::from_secs(1));
        std::fs::write(temp.path().join("index.jsonl"), b"{corrupt\n").unwrap();

        let entries = index.load().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].report_id, "rpt_a");
        assert_eq!(entries[0].current_title, "Recovered");
    }

    #[test]
    fn test_search_filters() {
        let temp = TempDir::new().unwrap();
        let index = ReportIndex::new(temp.path(), Duration::from_secs(1));
        let mut a = entry("rpt_a", "Revenue report");
        a.tags = vec!["finance".to_string()];
        let mut b = entry("rpt_b", "Churn report");
        b.status = ReportStatus::Archived;
        index.append(&a).unwrap();
        index.append(&b).unwrap();

        assert_eq!(index.search(Some("revenue"), &[], None).unwrap().len(), 1);
        assert_eq!(
            index
                .search(None, &["finance".to_string()], None)
                .unwrap()
                .len(),
            1
        );
        assert_eq!(
            index
                .search(None, &[], Some(ReportStatus::Archived))
                .unwrap()
                .len(),
            1
        );
        assert_eq!(index.search(None, &[], None).unwrap().len(), 2);
    }
}
