//! Outline rendering.
//!
//! The renderer translates an outline into typesetter input (markdown /
//! qmd). Rendering is a pure function of `(outline, template)`: two
//! renders of an unchanged outline produce identical text, including
//! `[N]` citation assignments, which are keyed by first appearance in
//! render order.
//!
//! The actual markdown → html/pdf/docx conversion happens behind the
//! [`Typesetter`] trait; the built-in [`MarkdownTypesetter`] passes
//! markdown through and wraps a minimal HTML shell, which keeps `md` and
//! `html` renders working without an external toolchain.

use crate::error::ReportError;
use crate::model::{Citation, Insight, Outline, Section, Template};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderFormat {
    Html,
    Pdf,
    Md,
    Docx,
    /// Self-contained HTML with charts inlined as data URIs.
    HtmlStandalone,
}

impl RenderFormat {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "html" => Some(Self::Html),
            "pdf" => Some(Self::Pdf),
            "md" | "markdown" => Some(Self::Md),
            "docx" => Some(Self::Docx),
            "html_standalone" => Some(Self::HtmlStandalone),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Html | Self::HtmlStandalone => "html",
            Self::Pdf => "pdf",
            Self::Md => "md",
            Self::Docx => "docx",
        }
    }
}

/// Finished typesetter output.
#[derive(Debug, Clone)]
pub struct Rendered {
    pub format: RenderFormat,
    pub bytes: Vec<u8>,
}

/// External markdown/PDF typesetter seam.
pub trait Typesetter: Send + Sync {
    fn render(&self, qmd: &str, format: RenderFormat) -> Result<Rendered, ReportError>;
}

/// Built-in fallback typesetter: markdown passthrough, minimal HTML
/// shell. PDF and DOCX need a real typesetter.
#[derive(Debug, Clone, Default)]
pub struct MarkdownTypesetter;

impl Typesetter for MarkdownTypesetter {
    fn render(&self, qmd: &str, format: RenderFormat) -> Result<Rendered, ReportError> {
        match format {
            RenderFormat::Md => Ok(Rendered {
                format,
                bytes: qmd.as_bytes().to_vec(),
            }),
            RenderFormat::Html | RenderFormat::HtmlStandalone => {
                let html = format!(
                    "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"></head>\n\
                     <body>\n<pre class=\"report-markdown\">\n{}\n</pre>\n</body>\n</html>\n",
                    qmd.replace('&', "&amp;").replace('<', "&lt;")
                );
                Ok(Rendered {
                    format,
                    bytes: html.into_bytes(),
                })
            }
            RenderFormat::Pdf | RenderFormat::Docx => Err(ReportError::UnsupportedFormat(format!(
                "{} output requires an external typesetter",
                format.extension()
            ))),
        }
    }
}

/// Renderer output: typesetter input plus render-time warnings.
#[derive(Debug, Clone)]
pub struct RenderOutput {
    pub qmd: String,
    pub warnings: Vec<String>,
    pub citation_count: usize,
}

/// Fixed section order for the analyst template; unmatched sections
/// follow in their own display order.
const ANALYST_SECTION_ORDER: &[&str] = &[
    "Executive Summary",
    "Network Activity",
    "DEX Trading",
    "Objects",
    "Events",
    "Appendix: Query References",
];

/// Assigns stable `[N]` markers by first appearance in render order.
/// Query citations key on `execution_id`, so numbering survives
/// rerenders and unrelated outline edits.
struct CitationNumbering {
    numbers: BTreeMap<String, usize>,
    ordered: Vec<Citation>,
}

impl CitationNumbering {
    fn new() -> Self {
        Self {
            numbers: BTreeMap::new(),
            ordered: Vec::new(),
        }
    }

    fn key(citation: &Citation) -> String {
        match citation {
            Citation::Query { execution_id, sql_sha256, .. } => format!(
                "query:{}",
                execution_id
                    .clone()
                    .or_else(|| sql_sha256.clone())
                    .unwrap_or_default()
            ),
            Citation::Api { provider, endpoint, .. } => format!("api:{}:{}", provider, endpoint),
            Citation::Url { url, .. } => format!("url:{}", url),
            Citation::Observation { description, .. } => format!("obs:{}", description),
            Citation::Document { path, page, .. } => {
                format!("doc:{}:{}", path, page.unwrap_or(0))
            }
        }
    }

    fn number_for(&mut self, citation: &Citation) -> usize {
        let key = Self::key(citation);
        if let Some(&n) = self.numbers.get(&key) {
            return n;
        }
        let n = self.ordered.len() + 1;
        self.numbers.insert(key, n);
        self.ordered.push(citation.clone());
        n
    }
}

pub struct Renderer;

impl Renderer {
    /// Build typesetter input for an outline.
    pub fn render_outline(
        outline: &Outline,
        title: &str,
        format: RenderFormat,
    ) -> RenderOutput {
        let inline_charts = format == RenderFormat::HtmlStandalone;
        match outline.template() {
            Template::Default => Self::render_default(outline, title, inline_charts),
            Template::AnalystV1 => Self::render_analyst(outline, title, inline_charts),
        }
    }

    fn render_default(outline: &Outline, title: &str, inline_charts: bool) -> RenderOutput {
        let mut out = String::new();
        let mut warnings = Vec::new();
        let _ = writeln!(out, "# {}\n", title);

        for section in outline.ordered_sections() {
            let _ = writeln!(out, "## {}\n", section.title);
            if !section.content.is_empty() {
                let _ = writeln!(out, "{}\n", section.content);
            }
            for insight in linked_insights(outline, section) {
                let _ = writeln!(out, "- {}", insight.summary);
                Self::embed_chart(&mut out, outline, insight, inline_charts, &mut warnings);
            }
            let _ = writeln!(out);
        }

        RenderOutput {
            qmd: out,
            warnings,
            citation_count: 0,
        }
    }

    fn render_analyst(outline: &Outline, title: &str, inline_charts: bool) -> RenderOutput {
        let mut out = String::new();
        let mut warnings = Vec::new();
        let mut numbering = CitationNumbering::new();
        let _ = writeln!(out, "# {}\n", title);

        for section in analyst_ordered_sections(outline) {
            let _ = writeln!(out, "## {}\n", section.title);
            if !section.content.is_empty() {
                let _ = writeln!(out, "{}\n", section.content);
            }
            for insight in linked_insights(outline, section) {
                let markers: String = insight
                    .citations
                    .iter()
                    .map(|c| format!("[{}]", numbering.number_for(c)))
                    .collect();
                let _ = writeln!(out, "{} {}\n", insight.summary, markers);
                Self::embed_chart(&mut out, outline, insight, inline_charts, &mut warnings);
            }
        }

        // Appendix: citations grouped by source kind, in marker order.
        let _ = writeln!(out, "## Appendix: Query References\n");
        let mut by_kind: BTreeMap<&'static str, Vec<(usize, &Citation)>> = BTreeMap::new();
        for (idx, citation) in numbering.ordered.iter().enumerate() {
            by_kind
                .entry(citation.source_kind())
                .or_default()
                .push((idx + 1, citation));
        }
        for (kind, citations) in &by_kind {
            let _ = writeln!(out, "### {}\n", kind);
            for (n, citation) in citations {
                let _ = writeln!(out, "- [{}] {}", n, describe_citation(citation));
            }
            let _ = writeln!(out);
        }

        RenderOutput {
            citation_count: numbering.ordered.len(),
            qmd: out,
            warnings,
        }
    }

    fn embed_chart(
        out: &mut String,
        outline: &Outline,
        insight: &Insight,
        inline: bool,
        warnings: &mut Vec<String>,
    ) {
        let Some(chart_id) = insight.chart_id() else {
            return;
        };
        let Some(chart) = outline.charts.get(chart_id) else {
            warnings.push(format!(
                "Insight {} references missing chart {}",
                insight.insight_id, chart_id
            ));
            return;
        };
        let alt = chart.description.as_deref().unwrap_or("chart");
        if inline {
            match std::fs::read(&chart.path) {
                Ok(bytes) => {
                    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
                    let _ = writeln!(
                        out,
                        "![{}](data:{};base64,{})\n",
                        alt,
                        chart.format.mime(),
                        encoded
                    );
                }
                Err(e) => {
                    warnings.push(format!("Could not inline chart {}: {}", chart_id, e));
                    let _ = writeln!(out, "![{}]({})\n", alt, chart.path);
                }
            }
        } else {
            let _ = writeln!(out, "![{}]({})\n", alt, chart.path);
        }
    }
}

fn linked_insights<'a>(outline: &'a Outline, section: &'a Section) -> Vec<&'a Insight> {
    section
        .insight_ids
        .iter()
        .filter_map(|id| outline.insight(id))
        .collect()
}

/// Analyst template ordering: the fixed list first, then the rest in
/// their own display order.
fn analyst_ordered_sections(outline: &Outline) -> Vec<&Section> {
    let mut ordered = Vec::new();
    let mut used: Vec<&str> = Vec::new();
    for fixed in ANALYST_SECTION_ORDER {
        if let Some(section) = outline
            .sections
            .iter()
            .find(|s| s.title.eq_ignore_ascii_case(fixed))
        {
            ordered.push(section);
            used.push(section.section_id.as_str());
        }
    }
    for section in outline.ordered_sections() {
        if !used.contains(&section.section_id.as_str()) {
            ordered.push(section);
        }
    }
    ordered
}

fn describe_citation(citation: &Citation) -> String {
    match citation {
        Citation::Query {
            execution_id,
            sql_sha256,
            description,
            ..
        } => {
            let mut parts = vec![format!(
                "query execution {}",
                execution_id.as_deref().unwrap_or("(unknown)")
            )];
            if let Some(sha) = sql_sha256 {
                parts.push(format!("sql sha {}", &sha[..sha.len().min(12)]));
            }
            if let Some(desc) = description {
                parts.push(desc.clone());
            }
            parts.join(" - ")
        }
        Citation::Api {
            provider, endpoint, ..
        } => format!("{} {}", provider, endpoint),
        Citation::Url { url, title, .. } => match title {
            Some(t) => format!("{} ({})", t, url),
            None => url.clone(),
        },
        Citation::Observation { description, .. } => description.clone(),
        Citation::Document { path, page, .. } => match page {
            Some(p) => format!("{} p.{}", path, p),
            None => path.clone(),
        },
    }
}
