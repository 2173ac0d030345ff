//! Citation normalization and search.
//!
//! `supporting_queries` predates the typed citation model and stays
//! writable: writing either representation updates the other. The sync
//! is bidirectional and idempotent, so it can run after every mutation.

use crate::model::{Citation, Insight, Outline};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Reconcile `citations` and the legacy `supporting_queries` field.
///
/// Every supporting query id gains a query-sourced citation if missing;
/// `supporting_queries` is then regenerated from the query citations'
/// execution ids, preserving citation order.
pub fn sync_insight(insight: &mut Insight) {
    for query_id in insight.supporting_queries.clone() {
        let present = insight
            .citations
            .iter()
            .any(|c| c.execution_id() == Some(query_id.as_str()));
        if !present {
            insight.citations.push(Citation::Query {
                provider: "snowflake".to_string(),
                execution_id: Some(query_id),
                query_id: None,
                sql_sha256: None,
                cache_manifest: None,
                description: None,
            });
        }
    }

    let mut seen = HashSet::new();
    insight.supporting_queries = insight
        .citations
        .iter()
        .filter_map(|c| c.execution_id())
        .filter(|id| seen.insert(id.to_string()))
        .map(|id| id.to_string())
        .collect();
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CitationFilters {
    pub source_type: Option<String>,
    pub provider: Option<String>,
    pub url_contains: Option<String>,
    pub description_contains: Option<String>,
    pub execution_id: Option<String>,
}

impl CitationFilters {
    fn matches(&self, citation: &Citation) -> bool {
        if let Some(source) = &self.source_type {
            if citation.source_kind() != source.as_str() {
                return false;
            }
        }
        if let Some(provider) = &self.provider {
            if citation.provider() != Some(provider.as_str()) {
                return false;
            }
        }
        if let Some(needle) = &self.url_contains {
            let Some(url) = citation.url() else { return false };
            if !url.to_lowercase().contains(&needle.to_lowercase()) {
                return false;
            }
        }
        if let Some(needle) = &self.description_contains {
            let Some(description) = citation.description() else {
                return false;
            };
            if !description.to_lowercase().contains(&needle.to_lowercase()) {
                return false;
            }
        }
        if let Some(execution_id) = &self.execution_id {
            if citation.execution_id() != Some(execution_id.as_str()) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CitationGroupBy {
    Source,
    Provider,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CitationMatch {
    pub citation: Citation,
    pub insight_id: String,
    pub insight_summary: String,
    pub report_id: String,
    pub report_title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CitationSearchResult {
    /// Total matches before pagination.
    pub matches_found: usize,
    pub returned: usize,
    pub citations: Vec<CitationMatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grouped_results: Option<BTreeMap<String, Vec<CitationMatch>>>,
}

/// Search citations across a set of reports.
///
/// `reports` pairs identity with outline; pagination applies to the flat
/// match list and grouping applies to the returned page.
pub fn search_citations(
    reports: &[(String, String, &Outline)],
    filters: &CitationFilters,
    group_by: Option<CitationGroupBy>,
    limit: usize,
    offset: usize,
) -> CitationSearchResult {
    let mut matches = Vec::new();
    for (report_id, report_title, outline) in reports {
        for insight in &outline.insights {
            for citation in &insight.citations {
                if filters.matches(citation) {
                    matches.push(CitationMatch {
                        citation: citation.clone(),
                        insight_id: insight.insight_id.clone(),
                        insight_summary: insight.summary.clone(),
                        report_id: report_id.clone(),
                        report_title: report_title.clone(),
                    });
                }
            }
        }
    }

    let matches_found = matches.len();
    let page: Vec<CitationMatch> = matches.into_iter().skip(offset).take(limit).collect();
    let returned = page.len();

    let grouped_results = group_by.map(|mode| {
        let mut groups: BTreeMap<String, Vec<CitationMatch>> = BTreeMap::new();
        for item in &page {
            let key = match mode {
                CitationGroupBy::Source => item.citation.source_kind().to_string(),
                CitationGroupBy::Provider => item
                    .citation
                    .provider()
                    .unwrap_or("(none)")
                    .to_string(),
            };
            groups.entry(key).or_default().push(item.clone());
        }
        groups
    });

    CitationSearchResult {
        matches_found,
        returned,
        citations: page,
        grouped_results,
    }
}
