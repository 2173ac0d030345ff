//! The patch language and its engine.
//!
//! `ProposedChanges` is a tagged record of up to ten operation groups.
//! The engine validates before applying (well-formed ids, existing
//! targets, non-empty updates, template citation rules, status-change
//! exclusivity), applies in a fixed order so cross-references resolve
//! consistently within one patch, bumps the version, then re-validates
//! every invariant against the new state. All warnings are computed from
//! the post-apply outline; nothing is reported against the pre-state.

use crate::citations::sync_insight;
use crate::error::{ReportError, ValidationIssue};
use crate::model::{
    Citation, ContentFormat, Insight, InsightStatus, Outline, ReportStatus, Section,
};
use crate::schema_describe;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

fn default_importance() -> u8 {
    5
}

/// A new insight, standalone or inline in a section operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InsightDraft {
    #[serde(default)]
    pub insight_id: Option<String>,
    pub summary: String,
    #[serde(default = "default_importance")]
    pub importance: u8,
    #[serde(default)]
    pub status: Option<InsightStatus>,
    #[serde(default)]
    pub citations: Vec<Citation>,
    #[serde(default)]
    pub supporting_queries: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl InsightDraft {
    fn has_citation(&self) -> bool {
        !self.citations.is_empty() || !self.supporting_queries.is_empty()
    }

    fn materialize(&self, id: String) -> Insight {
        let mut insight = Insight {
            insight_id: id,
            summary: self.summary.clone(),
            importance: self.importance,
            status: self.status.unwrap_or_default(),
            citations: self.citations.clone(),
            supporting_queries: self.supporting_queries.clone(),
            metadata: self.metadata.clone(),
        };
        sync_insight(&mut insight);
        insight
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InsightAdd {
    /// Section to link into; optional for unlinked insights.
    #[serde(default)]
    pub section_id: Option<String>,
    pub insight: InsightDraft,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InsightModify {
    pub insight_id: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub importance: Option<u8>,
    #[serde(default)]
    pub status: Option<InsightStatus>,
    #[serde(default)]
    pub citations: Option<Vec<Citation>>,
    #[serde(default)]
    pub supporting_queries: Option<Vec<String>>,
    #[serde(default)]
    pub metadata: Option<BTreeMap<String, Value>>,
}

impl InsightModify {
    fn is_empty_update(&self) -> bool {
        self.summary.is_none()
            && self.importance.is_none()
            && self.status.is_none()
            && self.citations.is_none()
            && self.supporting_queries.is_none()
            && self.metadata.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SectionAdd {
    #[serde(default)]
    pub section_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub order: Option<i64>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub content_format: Option<ContentFormat>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    /// Inline insights, created and linked atomically.
    #[serde(default)]
    pub insights: Vec<InsightDraft>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SectionModify {
    pub section_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub order: Option<i64>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub content_format: Option<ContentFormat>,
    #[serde(default)]
    pub metadata: Option<BTreeMap<String, Value>>,
    #[serde(default)]
    pub insight_ids_to_add: Vec<String>,
    #[serde(default)]
    pub insight_ids_to_remove: Vec<String>,
    /// Inline insights, created and linked to this section.
    #[serde(default)]
    pub insights: Vec<InsightDraft>,
}

impl SectionModify {
    fn is_empty_update(&self) -> bool {
        self.title.is_none()
            && self.order.is_none()
            && self.notes.is_none()
            && self.content.is_none()
            && self.content_format.is_none()
            && self.metadata.is_none()
            && self.insight_ids_to_add.is_empty()
            && self.insight_ids_to_remove.is_empty()
            && self.insights.is_empty()
    }
}

/// The declarative change set accepted by `evolve_report`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProposedChanges {
    #[serde(default)]
    pub insights_to_add: Vec<InsightAdd>,
    #[serde(default)]
    pub insights_to_modify: Vec<InsightModify>,
    #[serde(default)]
    pub insights_to_remove: Vec<String>,
    #[serde(default)]
    pub sections_to_add: Vec<SectionAdd>,
    #[serde(default)]
    pub sections_to_modify: Vec<SectionModify>,
    #[serde(default)]
    pub sections_to_remove: Vec<String>,
    #[serde(default)]
    pub status_change: Option<ReportStatus>,
    #[serde(default)]
    pub metadata_updates: Option<BTreeMap<String, Value>>,
    #[serde(default)]
    pub title_change: Option<String>,
}

impl ProposedChanges {
    fn has_content_ops(&self) -> bool {
        !self.insights_to_add.is_empty()
            || !self.insights_to_modify.is_empty()
            || !self.insights_to_remove.is_empty()
            || !self.sections_to_add.is_empty()
            || !self.sections_to_modify.is_empty()
            || !self.sections_to_remove.is_empty()
            || self.metadata_updates.is_some()
            || self.title_change.is_some()
    }

    pub fn is_empty(&self) -> bool {
        !self.has_content_ops() && self.status_change.is_none()
    }
}

/// Per-operation counts for the response summary. Every creation path
/// counts, including inline insights in section operations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSummary {
    pub insights_added: usize,
    pub insights_modified: usize,
    pub insights_removed: usize,
    pub sections_added: usize,
    pub sections_modified: usize,
    pub sections_removed: usize,
    pub title_changed: bool,
    pub status_changed: bool,
    pub metadata_updated: bool,
}

#[derive(Debug, Clone)]
pub struct PatchOutcome {
    pub outline: Outline,
    pub summary: ChangeSummary,
    /// Computed from the post-apply state only.
    pub warnings: Vec<String>,
    pub created_insight_ids: Vec<String>,
    pub created_section_ids: Vec<String>,
    pub removed_insight_ids: Vec<String>,
    pub removed_section_ids: Vec<String>,
    /// Report-level changes the caller applies to the index.
    pub title_change: Option<String>,
    pub status_change: Option<ReportStatus>,
}

pub struct PatchEngine;

impl PatchEngine {
    /// Validate and apply one patch against an outline.
    pub fn apply(outline: &Outline, changes: &ProposedChanges) -> Result<PatchOutcome, ReportError> {
        let issues = Self::pre_validate(outline, changes);
        if !issues.is_empty() {
            return Err(ReportError::Validation(issues));
        }

        let mut next = outline.clone();
        let mut warnings = Vec::new();
        let mut summary = ChangeSummary::default();
        let mut created_insight_ids = Vec::new();
        let mut created_section_ids = Vec::new();
        let mut removed_insight_ids = Vec::new();
        let mut removed_section_ids = Vec::new();

        // 1-2. Materialize additions with generated ids; inline insights
        // first so section ops can link them.
        let mut inline_links: Vec<(String, Vec<String>)> = Vec::new(); // section_id -> insight ids
        let mut section_adds: Vec<Section> = Vec::new();

        for add in &changes.sections_to_add {
            let section_id = add
                .section_id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            let mut insight_ids = Vec::new();
            for draft in &add.insights {
                let id = draft
                    .insight_id
                    .clone()
                    .unwrap_or_else(|| Uuid::new_v4().to_string());
                next.insights.push(draft.materialize(id.clone()));
                created_insight_ids.push(id.clone());
                insight_ids.push(id);
                summary.insights_added += 1;
            }
            section_adds.push(Section {
                section_id: section_id.clone(),
                title: add.title.clone(),
                order: add.order,
                insight_ids,
                notes: add.notes.clone().unwrap_or_default(),
                content: add.content.clone().unwrap_or_default(),
                content_format: add.content_format.unwrap_or_default(),
                metadata: add.metadata.clone(),
            });
            created_section_ids.push(section_id);
        }

        for modify in &changes.sections_to_modify {
            let mut ids = Vec::new();
            for draft in &modify.insights {
                let id = draft
                    .insight_id
                    .clone()
                    .unwrap_or_else(|| Uuid::new_v4().to_string());
                next.insights.push(draft.materialize(id.clone()));
                created_insight_ids.push(id.clone());
                ids.push(id);
                summary.insights_added += 1;
            }
            inline_links.push((modify.section_id.clone(), ids));
        }

        // 3. Standalone insight additions.
        for add in &changes.insights_to_add {
            let id = add
                .insight
                .insight_id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            next.insights.push(add.insight.materialize(id.clone()));
            created_insight_ids.push(id.clone());
            summary.insights_added += 1;
            if let Some(section_id) = &add.section_id {
                if let Some(section) = next.section_mut(section_id) {
                    section.insight_ids.push(id);
                } else if let Some(section) = section_adds
                    .iter_mut()
                    .find(|s| &s.section_id == section_id)
                {
                    section.insight_ids.push(id);
                }
            }
        }

        // 4. Partial insight modifications.
        for modify in &changes.insights_to_modify {
            let insight = next
                .insight_mut(&modify.insight_id)
                .expect("validated: insight exists");
            if let Some(summary_text) = &modify.summary {
                insight.summary = summary_text.clone();
            }
            if let Some(importance) = modify.importance {
                insight.importance = importance;
            }
            if let Some(status) = modify.status {
                insight.status = status;
            }
            if let Some(citations) = &modify.citations {
                insight.citations = citations.clone();
                // Regenerate the legacy field from the new citations.
                insight.supporting_queries.clear();
            }
            if let Some(queries) = &modify.supporting_queries {
                insight.supporting_queries = queries.clone();
            }
            if let Some(metadata) = &modify.metadata {
                for (key, value) in metadata {
                    insight.metadata.insert(key.clone(), value.clone());
                }
            }
            sync_insight(insight);
            summary.insights_modified += 1;
        }

        // 5. Section additions.
        for section in section_adds {
            next.sections.push(section);
            summary.sections_added += 1;
        }

        // 6. Section modifications, including link changes.
        for modify in &changes.sections_to_modify {
            let inline_ids = inline_links
                .iter()
                .find(|(id, _)| id == &modify.section_id)
                .map(|(_, ids)| ids.clone())
                .unwrap_or_default();
            let section = next
                .section_mut(&modify.section_id)
                .expect("validated: section exists");
            if let Some(title) = &modify.title {
                section.title = title.clone();
            }
            if let Some(order) = modify.order {
                section.order = Some(order);
            }
            if let Some(notes) = &modify.notes {
                section.notes = notes.clone();
            }
            if let Some(content) = &modify.content {
                section.content = content.clone();
            }
            if let Some(format) = modify.content_format {
                section.content_format = format;
            }
            if let Some(metadata) = &modify.metadata {
                for (key, value) in metadata {
                    section.metadata.insert(key.clone(), value.clone());
                }
            }
            for id in &modify.insight_ids_to_add {
                if !section.insight_ids.contains(id) {
                    section.insight_ids.push(id.clone());
                }
            }
            for id in inline_ids {
                if !section.insight_ids.contains(&id) {
                    section.insight_ids.push(id);
                }
            }
            section
                .insight_ids
                .retain(|id| !modify.insight_ids_to_remove.contains(id));
            summary.sections_modified += 1;
        }

        // 7. Insight removals, unlinking everywhere. Removing an id that
        // is already gone is a no-op with a warning, so retries are safe.
        for id in &changes.insights_to_remove {
            let existed = next.insights.iter().any(|i| &i.insight_id == id);
            if !existed {
                warnings.push(format!(
                    "Insight {} was not present; removal skipped",
                    id
                ));
                continue;
            }
            next.insights.retain(|i| &i.insight_id != id);
            for section in &mut next.sections {
                section.insight_ids.retain(|linked| linked != id);
            }
            next.metadata
                .executive_summary_insight_ids
                .retain(|linked| linked != id);
            removed_insight_ids.push(id.clone());
            summary.insights_removed += 1;
        }

        // 8. Section removals.
        for id in &changes.sections_to_remove {
            let existed = next.sections.iter().any(|s| &s.section_id == id);
            if !existed {
                warnings.push(format!(
                    "Section {} was not present; removal skipped",
                    id
                ));
                continue;
            }
            next.sections.retain(|s| &s.section_id != id);
            removed_section_ids.push(id.clone());
            summary.sections_removed += 1;
        }

        // 9. Report-level changes.
        if let Some(updates) = &changes.metadata_updates {
            for (key, value) in updates {
                next.metadata.tags.insert(key.clone(), value.clone());
            }
            summary.metadata_updated = true;
        }
        summary.title_changed = changes.title_change.is_some();
        summary.status_changed = changes.status_change.is_some();

        // 10. Version bump.
        next.version += 1;

        let post_issues = Self::validate_outline(&next);
        if !post_issues.is_empty() {
            return Err(ReportError::Validation(post_issues));
        }

        // Warnings from the post-apply state only.
        for section in &next.sections {
            if section.insight_ids.is_empty() && section.content.is_empty() {
                warnings.push(format!("Section '{}' has no insights", section.title));
            }
        }
        let linked: HashSet<&String> = next
            .sections
            .iter()
            .flat_map(|s| s.insight_ids.iter())
            .collect();
        for insight in &next.insights {
            if !linked.contains(&insight.insight_id) {
                warnings.push(format!(
                    "Insight {} is not linked to any section",
                    insight.insight_id
                ));
            }
        }

        Ok(PatchOutcome {
            outline: next,
            summary,
            warnings,
            created_insight_ids,
            created_section_ids,
            removed_insight_ids,
            removed_section_ids,
            title_change: changes.title_change.clone(),
            status_change: changes.status_change,
        })
    }

    /// Everything that must hold before any mutation happens.
    fn pre_validate(outline: &Outline, changes: &ProposedChanges) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        let requires_citations = outline.template().requires_citations();

        if changes.is_empty() {
            issues.push(ValidationIssue::new(
                "proposed_changes",
                Value::Null,
                "Patch contains no operations",
                schema_describe::example("add_insight"),
            ));
            return issues;
        }

        if changes.status_change.is_some() && changes.has_content_ops() {
            issues.push(ValidationIssue::new(
                "status_change",
                serde_json::to_value(changes.status_change).unwrap_or(Value::Null),
                "status_change cannot be combined with content operations",
                schema_describe::example("status_change"),
            ));
        }

        // Ids of things being created in this same patch are valid link
        // targets for later operations.
        let pending_section_ids: HashSet<&String> = changes
            .sections_to_add
            .iter()
            .filter_map(|s| s.section_id.as_ref())
            .collect();
        let pending_insight_ids: HashSet<&String> = changes
            .insights_to_add
            .iter()
            .filter_map(|a| a.insight.insight_id.as_ref())
            .chain(
                changes
                    .sections_to_add
                    .iter()
                    .flat_map(|s| s.insights.iter())
                    .filter_map(|d| d.insight_id.as_ref()),
            )
            .chain(
                changes
                    .sections_to_modify
                    .iter()
                    .flat_map(|s| s.insights.iter())
                    .filter_map(|d| d.insight_id.as_ref()),
            )
            .collect();

        let check_draft = |path: &str, draft: &InsightDraft, issues: &mut Vec<ValidationIssue>| {
            if draft.summary.trim().is_empty() {
                issues.push(ValidationIssue::new(
                    format!("{}.summary", path),
                    Value::String(draft.summary.clone()),
                    "Insight summary must be non-empty",
                    schema_describe::example("add_insight"),
                ));
            }
            if draft.importance > 10 {
                issues.push(ValidationIssue::new(
                    format!("{}.importance", path),
                    Value::from(draft.importance),
                    "importance must be in 0..=10",
                    schema_describe::example("add_insight"),
                ));
            }
            if let Some(id) = &draft.insight_id {
                if Uuid::parse_str(id).is_err() {
                    issues.push(ValidationIssue::new(
                        format!("{}.insight_id", path),
                        Value::String(id.clone()),
                        "insight_id must be a well-formed UUID",
                        schema_describe::example("add_insight"),
                    ));
                }
            }
            if requires_citations && !draft.has_citation() {
                issues.push(ValidationIssue::new(
                    format!("{}.citations", path),
                    Value::Array(vec![]),
                    "This template requires at least one citation per insight",
                    schema_describe::example("add_insight_with_citation"),
                ));
            }
        };

        for (i, add) in changes.insights_to_add.iter().enumerate() {
            let path = format!("insights_to_add[{}]", i);
            check_draft(&format!("{}.insight", path), &add.insight, &mut issues);
            if let Some(section_id) = &add.section_id {
                if outline.section(section_id).is_none() && !pending_section_ids.contains(section_id)
                {
                    issues.push(ValidationIssue::new(
                        format!("{}.section_id", path),
                        Value::String(section_id.clone()),
                        "section_id does not reference an existing section",
                        schema_describe::example("add_insight"),
                    ));
                }
            }
        }

        for (i, modify) in changes.insights_to_modify.iter().enumerate() {
            let path = format!("insights_to_modify[{}]", i);
            if outline.insight(&modify.insight_id).is_none() {
                issues.push(ValidationIssue::new(
                    format!("{}.insight_id", path),
                    Value::String(modify.insight_id.clone()),
                    "insight_id does not reference an existing insight",
                    schema_describe::example("modify_insight"),
                ));
            }
            if modify.is_empty_update() {
                issues.push(ValidationIssue::new(
                    path.clone(),
                    serde_json::to_value(modify).unwrap_or(Value::Null),
                    "Modify operation must change at least one field",
                    schema_describe::example("modify_insight"),
                ));
            }
            if let Some(importance) = modify.importance {
                if importance > 10 {
                    issues.push(ValidationIssue::new(
                        format!("{}.importance", path),
                        Value::from(importance),
                        "importance must be in 0..=10",
                        schema_describe::example("modify_insight"),
                    ));
                }
            }
            if let Some(summary) = &modify.summary {
                if summary.trim().is_empty() {
                    issues.push(ValidationIssue::new(
                        format!("{}.summary", path),
                        Value::String(summary.clone()),
                        "Insight summary must be non-empty",
                        schema_describe::example("modify_insight"),
                    ));
                }
            }
        }

        for (i, add) in changes.sections_to_add.iter().enumerate() {
            let path = format!("sections_to_add[{}]", i);
            if add.title.trim().is_empty() {
                issues.push(ValidationIssue::new(
                    format!("{}.title", path),
                    Value::String(add.title.clone()),
                    "Section title must be non-empty",
                    schema_describe::example("add_section"),
                ));
            }
            if let Some(id) = &add.section_id {
                if Uuid::parse_str(id).is_err() {
                    issues.push(ValidationIssue::new(
                        format!("{}.section_id", path),
                        Value::String(id.clone()),
                        "section_id must be a well-formed UUID",
                        schema_describe::example("add_section"),
                    ));
                }
            }
            for (j, draft) in add.insights.iter().enumerate() {
                check_draft(&format!("{}.insights[{}]", path, j), draft, &mut issues);
            }
        }

        for (i, modify) in changes.sections_to_modify.iter().enumerate() {
            let path = format!("sections_to_modify[{}]", i);
            if outline.section(&modify.section_id).is_none() {
                issues.push(ValidationIssue::new(
                    format!("{}.section_id", path),
                    Value::String(modify.section_id.clone()),
                    "section_id does not reference an existing section",
                    schema_describe::example("modify_section"),
                ));
            }
            if modify.is_empty_update() {
                issues.push(ValidationIssue::new(
                    path.clone(),
                    serde_json::to_value(modify).unwrap_or(Value::Null),
                    "Modify operation must change at least one field",
                    schema_describe::example("modify_section"),
                ));
            }
            for id in &modify.insight_ids_to_add {
                if outline.insight(id).is_none() && !pending_insight_ids.contains(id) {
                    issues.push(ValidationIssue::new(
                        format!("{}.insight_ids_to_add", path),
                        Value::String(id.clone()),
                        "insight id does not reference an existing insight",
                        schema_describe::example("modify_section"),
                    ));
                }
            }
            for (j, draft) in modify.insights.iter().enumerate() {
                check_draft(&format!("{}.insights[{}]", path, j), draft, &mut issues);
            }
        }

        issues
    }

    /// Invariants that must hold for every persisted outline.
    pub fn validate_outline(outline: &Outline) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        let mut seen_sections = HashSet::new();
        for section in &outline.sections {
            if !seen_sections.insert(&section.section_id) {
                issues.push(ValidationIssue::new(
                    "sections",
                    Value::String(section.section_id.clone()),
                    "Duplicate section_id",
                    Value::Null,
                ));
            }
        }
        let mut seen_insights = HashSet::new();
        for insight in &outline.insights {
            if !seen_insights.insert(&insight.insight_id) {
                issues.push(ValidationIssue::new(
                    "insights",
                    Value::String(insight.insight_id.clone()),
                    "Duplicate insight_id",
                    Value::Null,
                ));
            }
            if insight.importance > 10 {
                issues.push(ValidationIssue::new(
                    "insights",
                    Value::from(insight.importance),
                    format!("Insight {} importance out of range", insight.insight_id),
                    Value::Null,
                ));
            }
            if outline.template().requires_citations() && insight.citations.is_empty() {
                issues.push(ValidationIssue::new(
                    "insights",
                    Value::String(insight.insight_id.clone()),
                    format!(
                        "Insight {} has no citations but the template requires them",
                        insight.insight_id
                    ),
                    schema_describe::example("add_insight_with_citation"),
                ));
            }
        }

        // Referential integrity: every linked insight exists.
        for section in &outline.sections {
            for id in &section.insight_ids {
                if !seen_insights.contains(id) {
                    issues.push(ValidationIssue::new(
                        "sections",
                        Value::String(id.clone()),
                        format!(
                            "Section '{}' references missing insight {}",
                            section.title, id
                        ),
                        Value::Null,
                    ));
                }
            }
        }

        issues
    }
}
