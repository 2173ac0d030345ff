//! Report operations facade.
//!
//! Composes the index, storage, patch engine, retrieval, and renderer
//! into the operations the tool layer exposes. Every mutating operation
//! follows the same shape: resolve selector → acquire the report lock →
//! load → apply → commit (outline + backup + audit) → update the index.

use crate::citations::{
    search_citations, CitationFilters, CitationGroupBy, CitationSearchResult,
};
use crate::error::ReportError;
use crate::index::{IndexEntry, ReportIndex};
use crate::model::{
    new_report_id, ActionType, Actor, AuditEvent, Outline, ReportStatus, Template,
};
use crate::patch::{ChangeSummary, PatchEngine, ProposedChanges};
use crate::render::{RenderFormat, RenderOutput, Renderer, Typesetter};
use crate::retrieve::{self, Pagination, RetrievalFilters, RetrievalMode, RetrievalResult};
use crate::storage::{AuditDraft, ReportStorage};
use chrono::Utc;
use igloo_core::fsio;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone)]
pub struct EvolveOptions {
    pub dry_run: bool,
    pub expected_outline_version: Option<u64>,
    pub actor: Actor,
    pub request_id: Option<String>,
}

impl Default for EvolveOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            expected_outline_version: None,
            actor: Actor::Agent,
            request_id: None,
        }
    }
}

/// Outcome of an accepted (or dry-run) evolve.
#[derive(Debug, Clone)]
pub struct EvolveResult {
    pub report_id: String,
    pub outline_version: u64,
    pub summary: ChangeSummary,
    pub warnings: Vec<String>,
    pub created_insight_ids: Vec<String>,
    pub created_section_ids: Vec<String>,
    pub removed_insight_ids: Vec<String>,
    pub removed_section_ids: Vec<String>,
    pub action_ids: Vec<String>,
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub struct RenderResult {
    pub report_id: String,
    pub format: RenderFormat,
    pub output_path: Option<PathBuf>,
    pub qmd: String,
    pub citation_count: usize,
    pub warnings: Vec<String>,
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub struct ReportService {
    storage: ReportStorage,
    index: ReportIndex,
}

impl ReportService {
    pub fn new(reports_root: &Path, lock_timeout: Duration) -> Self {
        Self {
            storage: ReportStorage::new(reports_root, lock_timeout),
            index: ReportIndex::new(reports_root, lock_timeout),
        }
    }

    pub fn storage(&self) -> &ReportStorage {
        &self.storage
    }

    pub fn index(&self) -> &ReportIndex {
        &self.index
    }

    /// Create a report: directory, initial outline, `create` audit
    /// event, index entry.
    pub fn create(
        &self,
        title: &str,
        template: Template,
        tags: &[String],
        actor: Actor,
        request_id: Option<String>,
    ) -> Result<(String, u64), ReportError> {
        let report_id = new_report_id();
        let outline =
            self.storage
                .create(&report_id, title, template, tags, actor, request_id)?;
        let now = Utc::now();
        self.index.append(&IndexEntry {
            report_id: report_id.clone(),
            current_title: title.to_string(),
            created_at: now,
            updated_at: now,
            tags: tags.to_vec(),
            status: ReportStatus::Active,
            path: format!("by_id/{}", report_id),
            template,
        })?;
        Ok((report_id, outline.version))
    }

    pub fn resolve(&self, selector: &str) -> Result<IndexEntry, ReportError> {
        self.index.resolve(selector)
    }

    /// Apply one patch. See `evolve_batch` for the multi-op form.
    pub fn evolve(
        &self,
        selector: &str,
        instruction: &str,
        changes: &ProposedChanges,
        opts: &EvolveOptions,
    ) -> Result<EvolveResult, ReportError> {
        self.evolve_batch(selector, &[(instruction.to_string(), changes.clone())], opts)
    }

    /// Apply a sequence of patches atomically: either every operation
    /// validates and the final outline is committed (one audit event per
    /// operation), or nothing is persisted.
    pub fn evolve_batch(
        &self,
        selector: &str,
        operations: &[(String, ProposedChanges)],
        opts: &EvolveOptions,
    ) -> Result<EvolveResult, ReportError> {
        let entry = self.index.resolve(selector)?;
        let _lock = self.storage.lock_report(&entry.report_id)?;
        let mut current = self.storage.load_outline(&entry.report_id)?;

        // Out-of-band edits are detected and audited, not rejected.
        if self.storage.manual_edit_detected(&entry.report_id, &current)? {
            self.storage.append_audit(
                &entry.report_id,
                AuditEvent {
                    action_id: crate::model::new_action_id(),
                    report_id: entry.report_id.clone(),
                    ts: Utc::now(),
                    actor: Actor::Human,
                    action_type: ActionType::ManualEditDetected,
                    before_outline_sha256: None,
                    after_outline_sha256: Some(current.sha256()),
                    payload: json!({}),
                    request_id: opts.request_id.clone(),
                    before_snapshot: None,
                    before_backup: None,
                },
            )?;
        }

        if let Some(expected) = opts.expected_outline_version {
            if current.version != expected {
                return Err(ReportError::VersionConflict {
                    expected,
                    current: current.version,
                });
            }
        }

        let mut drafts = Vec::new();
        let mut aggregate = EvolveResult {
            report_id: entry.report_id.clone(),
            outline_version: current.version,
            summary: ChangeSummary::default(),
            warnings: Vec::new(),
            created_insight_ids: Vec::new(),
            created_section_ids: Vec::new(),
            removed_insight_ids: Vec::new(),
            removed_section_ids: Vec::new(),
            action_ids: Vec::new(),
            dry_run: opts.dry_run,
        };
        let mut title_change: Option<String> = None;
        let mut status_change: Option<ReportStatus> = None;

        for (instruction, changes) in operations {
            let outcome = PatchEngine::apply(&current, changes)?;

            drafts.push(AuditDraft {
                actor: opts.actor,
                action_type: ActionType::Evolve,
                payload: json!({
                    "instruction": instruction,
                    "summary": outcome.summary,
                    "title_change": outcome.title_change,
                    "status_change": outcome.status_change.map(|s| s.as_str()),
                }),
                request_id: opts.request_id.clone(),
                before: Some(current.clone()),
                after_sha: Some(outcome.outline.sha256()),
            });

            aggregate.summary.insights_added += outcome.summary.insights_added;
            aggregate.summary.insights_modified += outcome.summary.insights_modified;
            aggregate.summary.insights_removed += outcome.summary.insights_removed;
            aggregate.summary.sections_added += outcome.summary.sections_added;
            aggregate.summary.sections_modified += outcome.summary.sections_modified;
            aggregate.summary.sections_removed += outcome.summary.sections_removed;
            aggregate.summary.title_changed |= outcome.summary.title_changed;
            aggregate.summary.status_changed |= outcome.summary.status_changed;
            aggregate.summary.metadata_updated |= outcome.summary.metadata_updated;
            aggregate.warnings.extend(outcome.warnings.clone());
            aggregate
                .created_insight_ids
                .extend(outcome.created_insight_ids.clone());
            aggregate
                .created_section_ids
                .extend(outcome.created_section_ids.clone());
            aggregate
                .removed_insight_ids
                .extend(outcome.removed_insight_ids.clone());
            aggregate
                .removed_section_ids
                .extend(outcome.removed_section_ids.clone());
            if let Some(title) = &outcome.title_change {
                title_change = Some(title.clone());
            }
            if let Some(status) = outcome.status_change {
                status_change = Some(status);
            }

            current = outcome.outline;
        }

        aggregate.outline_version = current.version;
        if opts.dry_run {
            return Ok(aggregate);
        }

        let committed = self.storage.commit(&entry.report_id, &current, drafts)?;
        aggregate.action_ids = committed.action_ids;

        self.index.update(&entry.report_id, |e| {
            if let Some(title) = &title_change {
                e.current_title = title.clone();
            }
            if let Some(status) = status_change {
                e.status = status;
            }
        })?;

        info!(
            "Evolved {} to v{} ({} op(s))",
            entry.report_id,
            aggregate.outline_version,
            operations.len()
        );
        Ok(aggregate)
    }

    /// Rebuild the outline from the pre-image of a past action.
    pub fn revert(
        &self,
        selector: &str,
        action_id: &str,
        actor: Actor,
        request_id: Option<String>,
    ) -> Result<EvolveResult, ReportError> {
        let entry = self.index.resolve(selector)?;
        let _lock = self.storage.lock_report(&entry.report_id)?;
        let current = self.storage.load_outline(&entry.report_id)?;

        let mut target = self.storage.revert_target(&entry.report_id, action_id)?;
        target.version = current.version + 1;

        let committed = self.storage.commit(
            &entry.report_id,
            &target,
            vec![AuditDraft {
                actor,
                action_type: ActionType::Revert,
                payload: json!({ "reverted_action_id": action_id }),
                request_id,
                before: Some(current),
                after_sha: Some(target.sha256()),
            }],
        )?;
        self.index.update(&entry.report_id, |_| {})?;

        Ok(EvolveResult {
            report_id: entry.report_id,
            outline_version: target.version,
            summary: ChangeSummary::default(),
            warnings: vec![],
            created_insight_ids: vec![],
            created_section_ids: vec![],
            removed_insight_ids: vec![],
            removed_section_ids: vec![],
            action_ids: committed.action_ids,
            dry_run: false,
        })
    }

    /// Shaped read plus (optionally) the audit tail.
    pub fn get(
        &self,
        selector: &str,
        mode: RetrievalMode,
        filters: &RetrievalFilters,
        pagination: Pagination,
        include_content: bool,
        include_audit: Option<usize>,
    ) -> Result<(IndexEntry, RetrievalResult, Option<Vec<AuditEvent>>), ReportError> {
        let entry = self.index.resolve(selector)?;
        let outline = self.storage.load_outline(&entry.report_id)?;
        let shaped = retrieve::get(&outline, mode, filters, pagination, include_content);
        let audit = match include_audit {
            Some(n) => Some(self.storage.read_audit(&entry.report_id, Some(n))?),
            None => None,
        };
        Ok((entry, shaped, audit))
    }

    /// Render through a typesetter; writes into the report's assets
    /// directory unless `dry_run`.
    pub fn render(
        &self,
        selector: &str,
        format: RenderFormat,
        typesetter: &dyn Typesetter,
        dry_run: bool,
        actor: Actor,
        request_id: Option<String>,
    ) -> Result<RenderResult, ReportError> {
        let entry = self.index.resolve(selector)?;
        let outline = self.storage.load_outline(&entry.report_id)?;

        let RenderOutput {
            qmd,
            warnings,
            citation_count,
        } = Renderer::render_outline(&outline, &entry.current_title, format);
        let rendered = typesetter.render(&qmd, format)?;

        let output_path = if dry_run {
            None
        } else {
            let path = self
                .storage
                .assets_dir(&entry.report_id)
                .join(format!("report.{}", format.extension()));
            fsio::atomic_write_bytes(&path, &rendered.bytes)?;
            self.storage.append_audit(
                &entry.report_id,
                AuditEvent {
                    action_id: crate::model::new_action_id(),
                    report_id: entry.report_id.clone(),
                    ts: Utc::now(),
                    actor,
                    action_type: ActionType::Render,
                    before_outline_sha256: None,
                    after_outline_sha256: Some(outline.sha256()),
                    payload: json!({ "format": format.extension() }),
                    request_id,
                    before_snapshot: None,
                    before_backup: None,
                },
            )?;
            Some(path)
        };

        Ok(RenderResult {
            report_id: entry.report_id,
            format,
            output_path,
            qmd,
            citation_count,
            warnings,
            dry_run,
        })
    }

    pub fn search_reports(
        &self,
        title_contains: Option<&str>,
        tags: &[String],
        status: Option<ReportStatus>,
    ) -> Result<Vec<IndexEntry>, ReportError> {
        self.index.search(title_contains, tags, status)
    }

    /// Cross-report citation search.
    pub fn search_citations(
        &self,
        filters: &CitationFilters,
        group_by: Option<CitationGroupBy>,
        limit: usize,
        offset: usize,
    ) -> Result<CitationSearchResult, ReportError> {
        let entries = self.index.load()?;
        let mut loaded: Vec<(String, String, Outline)> = Vec::new();
        for entry in entries {
            if entry.status == ReportStatus::Deleted {
                continue;
            }
            match self.storage.load_outline(&entry.report_id) {
                Ok(outline) => loaded.push((entry.report_id, entry.current_title, outline)),
                Err(e) => {
                    tracing::warn!("Citation search skipping {}: {}", entry.report_id, e);
                }
            }
        }
        let refs: Vec<(String, String, &Outline)> = loaded
            .iter()
            .map(|(id, title, outline)| (id.clone(), title.clone(), outline))
            .collect();
        Ok(search_citations(&refs, filters, group_by, limit, offset))
    }

    /// Truncate a preview to a char budget, clamped to [100, 10000].
    pub fn truncate_preview(text: &str, max_chars: usize) -> String {
        let max = max_chars.clamp(100, 10_000);
        if text.chars().count() <= max {
            return text.to_string();
        }
        let truncated: String = text.chars().take(max).collect();
        format!("{}\n... (truncated)", truncated)
    }
}
