//! Object dependency graph derived from catalog DDL.
//!
//! Edges come from a token scan of each view's DDL: any qualified (or
//! same-schema unqualified) name that resolves to another cataloged
//! object becomes a `depends_on` edge. No SQL parsing; this mirrors the
//! classifier's token discipline.

use crate::model::{CatalogObject, ObjectType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GraphFormat {
    #[default]
    Json,
    Dot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub name: String,
    pub object_type: ObjectType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    /// The dependent object (e.g. a view).
    pub from: String,
    /// The object it reads.
    pub to: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl DependencyGraph {
    /// Derive the graph from catalog objects.
    pub fn derive(objects: &[CatalogObject]) -> Self {
        let known: BTreeMap<String, &CatalogObject> = objects
            .iter()
            .map(|o| (o.qualified_name().to_ascii_uppercase(), o))
            .collect();
        // Short name → qualified, for same-schema references.
        let mut by_short: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for obj in objects {
            by_short
                .entry(obj.name.to_ascii_uppercase())
                .or_default()
                .push(obj.qualified_name().to_ascii_uppercase());
        }

        let mut edges: BTreeSet<GraphEdge> = BTreeSet::new();
        for obj in objects {
            let Some(ddl) = &obj.ddl else { continue };
            let from = obj.qualified_name().to_ascii_uppercase();
            for token in identifier_tokens(ddl) {
                let token_upper = token.to_ascii_uppercase();
                if token_upper == from {
                    continue;
                }
                if known.contains_key(&token_upper) {
                    edges.insert(GraphEdge {
                        from: from.clone(),
                        to: token_upper,
                    });
                    continue;
                }
                // Unqualified reference resolves only when unambiguous
                // within the same schema.
                if !token_upper.contains('.') {
                    if let Some(candidates) = by_short.get(&token_upper) {
                        let same_schema: Vec<&String> = candidates
                            .iter()
                            .filter(|q| {
                                q.starts_with(&format!(
                                    "{}.{}.",
                                    obj.database.to_ascii_uppercase(),
                                    obj.schema.to_ascii_uppercase()
                                ))
                            })
                            .collect();
                        if same_schema.len() == 1 && *same_schema[0] != from {
                            edges.insert(GraphEdge {
                                from: from.clone(),
                                to: same_schema[0].clone(),
                            });
                        }
                    }
                }
            }
        }

        DependencyGraph {
            nodes: objects
                .iter()
                .map(|o| GraphNode {
                    name: o.qualified_name().to_ascii_uppercase(),
                    object_type: o.object_type,
                })
                .collect(),
            edges: edges.into_iter().collect(),
        }
    }

    /// Render in the requested format.
    pub fn render(&self, format: GraphFormat) -> String {
        match format {
            GraphFormat::Json => serde_json::to_string_pretty(self).unwrap_or_default(),
            GraphFormat::Dot => self.to_dot(),
        }
    }

    fn to_dot(&self) -> String {
        let mut out = String::from("digraph dependencies {\n  rankdir=LR;\n");
        for node in &self.nodes {
            out.push_str(&format!(
                "  \"{}\" [shape={}];\n",
                node.name,
                match node.object_type {
                    ObjectType::View => "ellipse",
                    ObjectType::Table => "box",
                    ObjectType::Function | ObjectType::Procedure => "diamond",
                }
            ));
        }
        for edge in &self.edges {
            out.push_str(&format!("  \"{}\" -> \"{}\";\n", edge.from, edge.to));
        }
        out.push_str("}\n");
        out
    }
}

impl PartialOrd for GraphEdge {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for GraphEdge {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (&self.from, &self.to).cmp(&(&other.from, &other.to))
    }
}

impl Eq for GraphNode {}
impl PartialEq for GraphNode {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

/// Identifier-ish tokens (dots kept) from DDL text.
fn identifier_tokens(ddl: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for ch in ddl.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' || ch == '$' || ch == '.' {
            current.push(ch);
        } else if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}
