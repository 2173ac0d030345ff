//! SQL statement classification and safety policy.
//!
//! This crate does no SQL parsing beyond what the gateway needs: it
//! classifies a statement by its first significant keyword (tolerating
//! leading comments, whitespace, CTEs, and set operators), applies an
//! allow/deny policy over statement kinds, and extracts referenced
//! table/database names for source attribution.

pub mod attribution;
pub mod classify;
pub mod validate;

pub use attribution::SourceAttribution;
pub use classify::{classify, StatementKind};
pub use validate::{safe_alternatives, StatementPolicy};

use thiserror::Error;

/// Errors from classification and validation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SqlError {
    #[error("Malformed SQL: {message}")]
    Malformed {
        message: String,
        hints: Vec<String>,
    },

    #[error("Statement kind {kind:?} is denied by policy")]
    Denied {
        kind: StatementKind,
        safe_alternatives: Vec<String>,
    },

    #[error("Statement is {length} chars, over the {max} char limit")]
    TooLong { length: usize, max: usize },
}
