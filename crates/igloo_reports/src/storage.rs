//! Durable per-report storage.
//!
//! One writer at a time per report, enforced by `<report>/.lock`.
//! Readers are never locked: `outline.json` is only ever replaced by
//! atomic rename, so a read sees the old or the new state, never a tear.
//!
//! Commit ordering for a mutation:
//!
//! 1. write pre-image backup(s) under `backups/` (microsecond-stamped)
//! 2. atomic-replace `outline.json`
//! 3. append audit event(s), rotating `audit.jsonl` when oversized
//!
//! Crash recovery on read: a leftover `outline.json.tmp` is discarded;
//! a missing `outline.json` promotes the newest backup.

use crate::error::ReportError;
use crate::model::{
    ActionType, Actor, AuditEvent, Chart, ChartFormat, Outline, ReportStatus, Template,
    new_action_id, CHART_MAX_BYTES, CHART_SOFT_WARN_BYTES,
};
use chrono::Utc;
use igloo_core::{fsio, FileLock};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

const DEFAULT_AUDIT_ROTATE_BYTES: u64 = 50 * 1024 * 1024;
/// Outlines at or under this size inline their pre-image into the audit
/// event; larger ones reference the backup file instead.
const INLINE_SNAPSHOT_MAX_BYTES: usize = 256 * 1024;

/// A pending audit record for one accepted operation.
#[derive(Debug, Clone)]
pub struct AuditDraft {
    pub actor: Actor,
    pub action_type: ActionType,
    pub payload: Value,
    pub request_id: Option<String>,
    /// Pre-image of the outline this operation mutated.
    pub before: Option<Outline>,
    pub after_sha: Option<String>,
}

/// What a successful commit produced.
#[derive(Debug, Clone)]
pub struct CommittedMutation {
    pub version: u64,
    pub action_ids: Vec<String>,
    pub before_sha: Option<String>,
    pub after_sha: String,
}

#[derive(Debug, Clone)]
pub struct ReportStorage {
    reports_root: PathBuf,
    lock_timeout: Duration,
    audit_rotate_bytes: u64,
}

impl ReportStorage {
    pub fn new(reports_root: &Path, lock_timeout: Duration) -> Self {
        Self {
            reports_root: reports_root.to_path_buf(),
            lock_timeout,
            audit_rotate_bytes: DEFAULT_AUDIT_ROTATE_BYTES,
        }
    }

    /// Lower the rotation threshold (tests).
    pub fn with_audit_rotation(mut self, bytes: u64) -> Self {
        self.audit_rotate_bytes = bytes;
        self
    }

    pub fn reports_root(&self) -> &Path {
        &self.reports_root
    }

    pub fn report_dir(&self, report_id: &str) -> PathBuf {
        self.reports_root.join("by_id").join(report_id)
    }

    pub fn report_exists(&self, report_id: &str) -> bool {
        self.report_dir(report_id).exists()
    }

    fn outline_path(&self, report_id: &str) -> PathBuf {
        self.report_dir(report_id).join("outline.json")
    }

    fn audit_path(&self, report_id: &str) -> PathBuf {
        self.report_dir(report_id).join("audit.jsonl")
    }

    fn backups_dir(&self, report_id: &str) -> PathBuf {
        self.report_dir(report_id).join("backups")
    }

    pub fn assets_dir(&self, report_id: &str) -> PathBuf {
        self.report_dir(report_id).join("assets")
    }

    /// Acquire the single-writer lock for a report.
    pub fn lock_report(&self, report_id: &str) -> Result<FileLock, ReportError> {
        let lock_path = self.report_dir(report_id).join(".lock");
        Ok(FileLock::acquire(&lock_path, self.lock_timeout)?)
    }

    /// Allocate a report directory and seed it with an initial outline
    /// and a `create` audit event. Caller appends the index entry.
    pub fn create(
        &self,
        report_id: &str,
        title: &str,
        template: Template,
        tags: &[String],
        actor: Actor,
        request_id: Option<String>,
    ) -> Result<Outline, ReportError> {
        let dir = self.report_dir(report_id);
        std::fs::create_dir_all(dir.join("assets"))?;
        std::fs::create_dir_all(dir.join("backups"))?;

        let outline = Outline::new(template);
        fsio::atomic_write_json(&self.outline_path(report_id), &outline)?;

        self.append_audit(
            report_id,
            AuditEvent {
                action_id: new_action_id(),
                report_id: report_id.to_string(),
                ts: Utc::now(),
                actor,
                action_type: ActionType::Create,
                before_outline_sha256: None,
                after_outline_sha256: Some(outline.sha256()),
                payload: json!({
                    "title": title,
                    "template": template.as_str(),
                    "tags": tags,
                }),
                request_id,
                before_snapshot: None,
                before_backup: None,
            },
        )?;

        info!("Created report {} ({})", report_id, title);
        Ok(outline)
    }

    /// Load the current outline with crash recovery.
    pub fn load_outline(&self, report_id: &str) -> Result<Outline, ReportError> {
        let path = self.outline_path(report_id);

        // Discard a torn write from a crashed mutation.
        let tmp = fsio::tmp_path_for(&path);
        if tmp.exists() {
            warn!("Discarding stale tmp file {}", tmp.display());
            let _ = std::fs::remove_file(&tmp);
        }

        if path.exists() {
            let bytes = std::fs::read(&path)?;
            return serde_json::from_slice(&bytes)
                .map_err(|e| ReportError::Corrupt(format!("{}: {}", path.display(), e)));
        }

        // Promote the newest backup when the outline itself is gone.
        if let Some(backup) = self.newest_backup(report_id)? {
            warn!(
                "outline.json missing for {}; promoting backup {}",
                report_id,
                backup.display()
            );
            let bytes = std::fs::read(&backup)?;
            let outline: Outline = serde_json::from_slice(&bytes)
                .map_err(|e| ReportError::Corrupt(format!("{}: {}", backup.display(), e)))?;
            fsio::atomic_write_json(&path, &outline)?;
            return Ok(outline);
        }

        Err(ReportError::Corrupt(format!(
            "report {} has no outline and no backups",
            report_id
        )))
    }

    /// Persist a mutation. The caller must hold the report lock.
    pub fn commit(
        &self,
        report_id: &str,
        after: &Outline,
        drafts: Vec<AuditDraft>,
    ) -> Result<CommittedMutation, ReportError> {
        let mut events = Vec::with_capacity(drafts.len());
        let mut first_before_sha = None;

        for (idx, draft) in drafts.into_iter().enumerate() {
            let before_sha = draft.before.as_ref().map(|o| o.sha256());
            if idx == 0 {
                first_before_sha = before_sha.clone();
            }

            // Pre-image: always a backup file for recovery, additionally
            // inlined into the event when small enough.
            let (snapshot, backup_ref) = match &draft.before {
                Some(before) => {
                    let backup = self.write_backup(report_id, before)?;
                    let bytes = serde_json::to_vec(before)
                        .map_err(|e| ReportError::Corrupt(e.to_string()))?;
                    let snapshot =
                        (bytes.len() <= INLINE_SNAPSHOT_MAX_BYTES).then(|| before.clone());
                    (snapshot, Some(backup))
                }
                None => (None, None),
            };

            events.push(AuditEvent {
                action_id: new_action_id(),
                report_id: report_id.to_string(),
                ts: Utc::now(),
                actor: draft.actor,
                action_type: draft.action_type,
                before_outline_sha256: before_sha,
                after_outline_sha256: draft.after_sha,
                payload: draft.payload,
                request_id: draft.request_id,
                before_snapshot: snapshot,
                before_backup: backup_ref,
            });
        }

        fsio::atomic_write_json(&self.outline_path(report_id), after)?;

        let mut action_ids = Vec::with_capacity(events.len());
        for event in events {
            action_ids.push(event.action_id.clone());
            self.append_audit(report_id, event)?;
        }

        Ok(CommittedMutation {
            version: after.version,
            action_ids,
            before_sha: first_before_sha,
            after_sha: after.sha256(),
        })
    }

    /// Write one pre-image backup, microsecond-stamped. Never collides:
    /// an occupied name gets a numeric suffix.
    fn write_backup(&self, report_id: &str, outline: &Outline) -> Result<String, ReportError> {
        let dir = self.backups_dir(report_id);
        std::fs::create_dir_all(&dir)?;

        let stamp = Utc::now().format("%Y%m%dT%H%M%S_%6f").to_string();
        let mut name = format!("outline.{}.json", stamp);
        let mut counter = 1;
        while dir.join(&name).exists() {
            name = format!("outline.{}-{}.json", stamp, counter);
            counter += 1;
        }
        fsio::atomic_write_json(&dir.join(&name), outline)?;
        debug!("Wrote backup {}/{}", report_id, name);
        Ok(name)
    }

    fn newest_backup(&self, report_id: &str) -> Result<Option<PathBuf>, ReportError> {
        let dir = self.backups_dir(report_id);
        if !dir.exists() {
            return Ok(None);
        }
        let mut backups: Vec<PathBuf> = std::fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with("outline.") && n.ends_with(".json"))
                    .unwrap_or(false)
            })
            .collect();
        // Timestamped names sort lexicographically by age.
        backups.sort();
        Ok(backups.pop())
    }

    /// Append one audit event, rotating the file when oversized.
    pub fn append_audit(&self, report_id: &str, event: AuditEvent) -> Result<(), ReportError> {
        let path = self.audit_path(report_id);
        self.maybe_rotate_audit(report_id, &path)?;
        fsio::append_jsonl(&path, &event)?;
        Ok(())
    }

    fn maybe_rotate_audit(&self, report_id: &str, path: &Path) -> Result<(), ReportError> {
        let Ok(meta) = std::fs::metadata(path) else {
            return Ok(());
        };
        if meta.len() <= self.audit_rotate_bytes {
            return Ok(());
        }

        let month = Utc::now().format("%Y-%m").to_string();
        let dir = path.parent().expect("audit path has a parent");
        let mut target = dir.join(format!("audit-{}.jsonl", month));
        let mut counter = 1;
        while target.exists() {
            target = dir.join(format!("audit-{}-{}.jsonl", month, counter));
            counter += 1;
        }
        std::fs::rename(path, &target)?;
        info!("Rotated audit log for {} to {}", report_id, target.display());

        // Rotation is itself a loggable event, first line of the new file.
        fsio::append_jsonl(
            path,
            &AuditEvent {
                action_id: new_action_id(),
                report_id: report_id.to_string(),
                ts: Utc::now(),
                actor: Actor::Cli,
                action_type: ActionType::AuditRotate,
                before_outline_sha256: None,
                after_outline_sha256: None,
                payload: json!({ "rotated_to": target.file_name().and_then(|n| n.to_str()) }),
                request_id: None,
                before_snapshot: None,
                before_backup: None,
            },
        )?;
        Ok(())
    }

    /// Read audit events, newest last. `last_n` tails the result.
    pub fn read_audit(
        &self,
        report_id: &str,
        last_n: Option<usize>,
    ) -> Result<Vec<AuditEvent>, ReportError> {
        let path = self.audit_path(report_id);
        if !path.exists() {
            return Ok(vec![]);
        }
        let mut events: Vec<AuditEvent> = fsio::read_jsonl(&path)
            .map_err(|e| ReportError::Corrupt(e.to_string()))?;
        if let Some(n) = last_n {
            let skip = events.len().saturating_sub(n);
            events.drain(..skip);
        }
        Ok(events)
    }

    /// Find an audit event by id, searching rotated files too.
    pub fn find_audit_event(
        &self,
        report_id: &str,
        action_id: &str,
    ) -> Result<Option<AuditEvent>, ReportError> {
        let dir = self.report_dir(report_id);
        let mut files = vec![self.audit_path(report_id)];
        if dir.exists() {
            for entry in std::fs::read_dir(&dir)? {
                let path = entry?.path();
                let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
                if name.starts_with("audit-") && name.ends_with(".jsonl") {
                    files.push(path);
                }
            }
        }
        for file in files {
            if !file.exists() {
                continue;
            }
            let events: Vec<AuditEvent> = fsio::read_jsonl(&file)
                .map_err(|e| ReportError::Corrupt(e.to_string()))?;
            if let Some(event) = events.into_iter().find(|e| e.action_id == action_id) {
                return Ok(Some(event));
            }
        }
        Ok(None)
    }

    /// Recover the pre-image recorded by an audit event, for revert.
    pub fn revert_target(
        &self,
        report_id: &str,
        action_id: &str,
    ) -> Result<Outline, ReportError> {
        let event = self
            .find_audit_event(report_id, action_id)?
            .ok_or_else(|| ReportError::UnknownAction(action_id.to_string()))?;

        if let Some(snapshot) = event.before_snapshot {
            return Ok(snapshot);
        }
        if let Some(backup) = event.before_backup {
            let path = self.backups_dir(report_id).join(&backup);
            let bytes = std::fs::read(&path)?;
            return serde_json::from_slice(&bytes)
                .map_err(|e| ReportError::Corrupt(format!("{}: {}", path.display(), e)));
        }
        Err(ReportError::Corrupt(format!(
            "audit event {} carries no pre-image",
            action_id
        )))
    }

    /// Copy a chart into the report's assets, enforcing size and format
    /// limits. Returns the chart record and any soft-size warnings.
    pub fn attach_chart(
        &self,
        report_id: &str,
        source: &Path,
        description: Option<String>,
    ) -> Result<(Chart, Vec<String>), ReportError> {
        let meta = std::fs::metadata(source)?;
        if meta.len() > CHART_MAX_BYTES {
            return Err(ReportError::ChartTooLarge {
                size_bytes: meta.len(),
                max_bytes: CHART_MAX_BYTES,
            });
        }
        let ext = source
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        let format = ChartFormat::from_extension(ext)
            .ok_or_else(|| ReportError::UnsupportedFormat(ext.to_string()))?;

        let mut warnings = Vec::new();
        for threshold in CHART_SOFT_WARN_BYTES {
            if meta.len() > threshold {
                warnings.push(format!(
                    "Chart is {} bytes, above the {} MB soft limit",
                    meta.len(),
                    threshold / (1024 * 1024)
                ));
            }
        }

        let chart_id = uuid::Uuid::new_v4().to_string();
        let charts_dir = self.assets_dir(report_id).join("charts");
        std::fs::create_dir_all(&charts_dir)?;
        let target = charts_dir.join(format!("{}.{}", chart_id, ext.to_ascii_lowercase()));
        std::fs::copy(source, &target)?;

        let absolute = target
            .canonicalize()
            .unwrap_or(target)
            .to_string_lossy()
            .into_owned();
        Ok((
            Chart {
                chart_id,
                path: absolute,
                format,
                size_bytes: meta.len(),
                created_at: Utc::now(),
                linked_insight_ids: vec![],
                source: None,
                description,
            },
            warnings,
        ))
    }

    /// Detect a manual (out-of-band) edit: the current outline digest
    /// no longer matches the last audited post-state.
    pub fn manual_edit_detected(
        &self,
        report_id: &str,
        current: &Outline,
    ) -> Result<bool, ReportError> {
        let events = self.read_audit(report_id, None)?;
        let last_sha = events
            .iter()
            .rev()
            .find_map(|e| e.after_outline_sha256.clone());
        Ok(match last_sha {
            Some(sha) => sha != current.sha256(),
            None => false,
        })
    }
}

/// Report-level info replayed from an audit log, for index rebuild.
#[derive(Debug, Clone)]
pub struct ReplayedReport {
    pub report_id: String,
    pub title: String,
    pub tags: Vec<String>,
    pub status: ReportStatus,
    pub created_at: chrono::DateTime<Utc>,
    pub updated_at: chrono::DateTime<Utc>,
    pub template: Template,
}

/// Replay an audit log to recover title/tags/status for one report.
pub fn replay_audit(events: &[AuditEvent]) -> Option<ReplayedReport> {
    let first = events.first()?;
    let mut replayed = ReplayedReport {
        report_id: first.report_id.clone(),
        title: String::new(),
        tags: vec![],
        status: ReportStatus::Active,
        created_at: first.ts,
        updated_at: first.ts,
        template: Template::Default,
    };

    for event in events {
        replayed.updated_at = event.ts;
        match event.action_type {
            ActionType::Create => {
                if let Some(title) = event.payload.get("title").and_then(|v| v.as_str()) {
                    replayed.title = title.to_string();
                }
                if let Some(template) = event
                    .payload
                    .get("template")
                    .and_then(|v| v.as_str())
                    .and_then(Template::parse)
                {
                    replayed.template = template;
                }
                if let Some(tags) = event.payload.get("tags").and_then(|v| v.as_array()) {
                    replayed.tags = tags
                        .iter()
                        .filter_map(|t| t.as_str().map(|s| s.to_string()))
                        .collect();
                }
            }
            ActionType::Rename => {
                if let Some(title) = event.payload.get("title").and_then(|v| v.as_str()) {
                    replayed.title = title.to_string();
                }
            }
            ActionType::TagUpdate => {
                if let Some(tags) = event.payload.get("tags").and_then(|v| v.as_array()) {
                    replayed.tags = tags
                        .iter()
                        .filter_map(|t| t.as_str().map(|s| s.to_string()))
                        .collect();
                }
            }
            ActionType::StatusChange => {
                if let Some(status) = event.payload.get("status").and_then(|v| v.as_str()) {
                    replayed.status = match status {
                        "archived" => ReportStatus::Archived,
                        "deleted" => ReportStatus::Deleted,
                        _ => ReportStatus::Active,
                    };
                }
            }
            ActionType::Evolve => {
                // An evolve can carry a title change in its payload.
                if let Some(title) = event.payload.get("title_change").and_then(|v| v.as_str()) {
                    replayed.title = title.to_string();
                }
                if let Some(status) = event.payload.get("status_change").and_then(|v| v.as_str()) {
                    replayed.status = match status {
                        "archived" => ReportStatus::Archived,
                        "deleted" => ReportStatus::Deleted,
                        _ => ReportStatus::Active,
                    };
                }
            }
            _ => {}
        }
    }
    Some(replayed)
}
