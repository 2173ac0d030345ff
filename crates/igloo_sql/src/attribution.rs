//! Source attribution: which tables and databases a statement touches.
//!
//! Best-effort token scan, not a parser. Identifiers following FROM or
//! JOIN are collected; three-part names contribute their database. Names
//! are uppercased the way the warehouse resolves unquoted identifiers.
//! The results feed query history events and cache manifests so that a
//! cache hit can report the same attribution as the original execution.

use crate::classify::sanitize;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Referenced objects extracted from a statement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceAttribution {
    /// Qualified table identifiers, e.g. `A.B.C`.
    pub tables: Vec<String>,
    /// Databases named by three-part identifiers, e.g. `A`.
    pub source_databases: Vec<String>,
}

impl SourceAttribution {
    /// Scan a statement. Malformed SQL yields empty attribution rather
    /// than an error; attribution is advisory.
    pub fn extract(statement: &str) -> Self {
        let sanitized = match sanitize(statement) {
            Ok(s) => s,
            Err(_) => return Self::default(),
        };

        let tokens = tokenize(&sanitized);
        let mut tables = BTreeSet::new();
        let mut databases = BTreeSet::new();

        let mut idx = 0;
        while idx < tokens.len() {
            let upper = tokens[idx].to_ascii_uppercase();
            if upper == "FROM" || upper == "JOIN" {
                if let Some(name) = tokens.get(idx + 1) {
                    if let Some(table) = table_candidate(name) {
                        if table.matches('.').count() == 2 {
                            if let Some(db) = table.split('.').next() {
                                databases.insert(db.to_string());
                            }
                        }
                        tables.insert(table);
                    }
                }
            }
            idx += 1;
        }

        Self {
            tables: tables.into_iter().collect(),
            source_databases: databases.into_iter().collect(),
        }
    }
}

/// Identifier characters, keeping dots so qualified names stay whole.
fn tokenize(sql: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for ch in sql.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' || ch == '$' || ch == '.' {
            current.push(ch);
        } else {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            if ch == '(' {
                tokens.push("(".to_string());
            }
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Filter out subqueries, keywords, and table functions.
fn table_candidate(token: &str) -> Option<String> {
    if token == "(" {
        return None;
    }
    let trimmed = token.trim_matches('.');
    if trimmed.is_empty() || trimmed.chars().next()?.is_ascii_digit() {
        return None;
    }
    let upper = trimmed.to_ascii_uppercase();
    const NON_TABLES: &[&str] = &["SELECT", "LATERAL", "TABLE", "VALUES", "UNNEST", "DUAL"];
    if NON_TABLES.contains(&upper.as_str()) {
        return None;
    }
    Some(upper)
}
