//! Living Reports engine.
//!
//! A report is three layers on disk:
//!
//! ```text
//! by_id/<report_id>/
//!   outline.json     machine truth: sections, insights, citations, charts
//!   audit.jsonl      immutable append-only change log
//!   assets/          rendered artifacts and attached charts
//!   backups/         pre-image snapshots, microsecond-stamped
//!   .lock            single-writer advisory lock
//! ```
//!
//! plus one global `index.jsonl` registry, rebuildable from the
//! filesystem when corrupt. Mutations go through the patch engine
//! (`ProposedChanges`), which validates before and after applying and
//! computes warnings from the post-apply state only.

pub mod citations;
pub mod error;
pub mod index;
pub mod model;
pub mod patch;
pub mod render;
pub mod retrieve;
pub mod schema_describe;
pub mod service;
pub mod storage;

pub use citations::{CitationFilters, CitationGroupBy, CitationMatch, CitationSearchResult};
pub use error::{ReportError, SelectorFailure, ValidationIssue};
pub use index::{IndexEntry, ReportIndex};
pub use model::{
    new_action_id, new_report_id, ActionType, Actor, AuditEvent, Chart, ChartFormat, Citation,
    ContentFormat, Insight, InsightStatus, Outline, OutlineMetadata, ReportStatus, Section,
    Template,
};
pub use patch::{ChangeSummary, PatchEngine, PatchOutcome, ProposedChanges};
pub use render::{MarkdownTypesetter, RenderFormat, Rendered, Renderer, Typesetter};
pub use retrieve::{Pagination, RetrievalFilters, RetrievalMode, RetrievalResult};
pub use service::{EvolveOptions, EvolveResult, ReportService};
pub use storage::{CommittedMutation, ReportStorage};
