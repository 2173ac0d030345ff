//! Selective retrieval: mode-shaped, filtered, paginated reads.
//!
//! Readers never lock; they see the latest committed outline. Every
//! paginated response reports `total_matched` from before pagination so
//! agents can page deterministically.

use crate::model::{ContentFormat, Insight, Outline, Section};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMode {
    #[default]
    Summary,
    Sections,
    Insights,
    Full,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RetrievalFilters {
    #[serde(default)]
    pub section_ids: Vec<String>,
    /// Case-insensitive substring match on section titles.
    #[serde(default)]
    pub section_titles: Vec<String>,
    #[serde(default)]
    pub insight_ids: Vec<String>,
    #[serde(default)]
    pub min_importance: Option<u8>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Pagination {
    pub limit: usize,
    pub offset: usize,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightBrief {
    pub insight_id: String,
    pub summary: String,
    pub importance: u8,
}

impl From<&Insight> for InsightBrief {
    fn from(insight: &Insight) -> Self {
        Self {
            insight_id: insight.insight_id.clone(),
            summary: insight.summary.clone(),
            importance: insight.importance,
        }
    }
}

/// A hydrated section: link targets resolved to brief insights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionView {
    pub section_id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<i64>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub notes: String,
    /// Omitted unless `include_content` is set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub content_format: ContentFormat,
    pub insight_ids: Vec<String>,
    pub insights: Vec<InsightBrief>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RetrievalResult {
    Summary {
        version: u64,
        section_count: usize,
        insight_count: usize,
        chart_count: usize,
        section_titles: Vec<String>,
        top_insights: Vec<InsightBrief>,
    },
    Sections {
        sections: Vec<SectionView>,
        total_matched: usize,
        returned: usize,
        offset: usize,
    },
    Insights {
        insights: Vec<Insight>,
        total_matched: usize,
        returned: usize,
        offset: usize,
    },
    Full {
        outline: Outline,
    },
}

const SUMMARY_TOP_INSIGHTS: usize = 5;

/// Shape an outline read.
pub fn get(
    outline: &Outline,
    mode: RetrievalMode,
    filters: &RetrievalFilters,
    pagination: Pagination,
    include_content: bool,
) -> RetrievalResult {
    match mode {
        RetrievalMode::Summary => summary(outline),
        RetrievalMode::Sections => sections(outline, filters, pagination, include_content),
        RetrievalMode::Insights => insights(outline, filters, pagination),
        RetrievalMode::Full => RetrievalResult::Full {
            outline: outline.clone(),
        },
    }
}

fn summary(outline: &Outline) -> RetrievalResult {
    let mut ranked: Vec<&Insight> = outline.insights.iter().collect();
    ranked.sort_by(|a, b| b.importance.cmp(&a.importance));

    RetrievalResult::Summary {
        version: outline.version,
        section_count: outline.sections.len(),
        insight_count: outline.insights.len(),
        chart_count: outline.charts.len(),
        section_titles: outline
            .ordered_sections()
            .iter()
            .map(|s| s.title.clone())
            .collect(),
        top_insights: ranked
            .into_iter()
            .take(SUMMARY_TOP_INSIGHTS)
            .map(InsightBrief::from)
            .collect(),
    }
}

fn sections(
    outline: &Outline,
    filters: &RetrievalFilters,
    pagination: Pagination,
    include_content: bool,
) -> RetrievalResult {
    let mut matched: Vec<&Section> = outline
        .sections
        .iter()
        .filter(|s| {
            if !filters.section_ids.is_empty() {
                return filters.section_ids.contains(&s.section_id);
            }
            if !filters.section_titles.is_empty() {
                let title = s.title.to_lowercase();
                return filters
                    .section_titles
                    .iter()
                    .any(|needle| title.contains(&needle.to_lowercase()));
            }
            true
        })
        .collect();

    // Ties break by order then title; missing orders sort last.
    matched.sort_by(|a, b| {
        (a.order.is_none(), a.order, &a.title).cmp(&(b.order.is_none(), b.order, &b.title))
    });

    let total_matched = matched.len();
    let page: Vec<SectionView> = matched
        .into_iter()
        .skip(pagination.offset)
        .take(pagination.limit)
        .map(|section| SectionView {
            section_id: section.section_id.clone(),
            title: section.title.clone(),
            order: section.order,
            notes: section.notes.clone(),
            content: include_content.then(|| section.content.clone()),
            content_format: section.content_format,
            insight_ids: section.insight_ids.clone(),
            insights: section
                .insight_ids
                .iter()
                .filter_map(|id| outline.insight(id))
                .map(InsightBrief::from)
                .collect(),
        })
        .collect();

    RetrievalResult::Sections {
        returned: page.len(),
        sections: page,
        total_matched,
        offset: pagination.offset,
    }
}

fn insights(
    outline: &Outline,
    filters: &RetrievalFilters,
    pagination: Pagination,
) -> RetrievalResult {
    let section_scope: Option<Vec<&String>> = if filters.section_ids.is_empty() {
        None
    } else {
        Some(
            outline
                .sections
                .iter()
                .filter(|s| filters.section_ids.contains(&s.section_id))
                .flat_map(|s| s.insight_ids.iter())
                .collect(),
        )
    };

    let matched: Vec<&Insight> = outline
        .insights
        .iter()
        .filter(|i| {
            filters.insight_ids.is_empty() || filters.insight_ids.contains(&i.insight_id)
        })
        .filter(|i| {
            section_scope
                .as_ref()
                .map(|scope| scope.contains(&&i.insight_id))
                .unwrap_or(true)
        })
        .filter(|i| {
            filters
                .min_importance
                .map(|floor| i.importance >= floor)
                .unwrap_or(true)
        })
        .collect();

    let total_matched = matched.len();
    let page: Vec<Insight> = matched
        .into_iter()
        .skip(pagination.offset)
        .take(pagination.limit)
        .cloned()
        .collect();

    RetrievalResult::Insights {
        returned: page.len(),
        insights: page,
        total_matched,
        offset: pagination.offset,
    }
}
