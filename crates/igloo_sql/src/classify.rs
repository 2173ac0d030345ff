//! Statement-kind classification.
//!
//! Classification looks at the first significant keyword after stripping
//! comments and string literals with a small character state machine.
//! Leading comments ahead of `SHOW`/`DESCRIBE` were a recurring bug in
//! earlier gateways, so the sanitizer runs before any keyword inspection.

use crate::SqlError;
use serde::{Deserialize, Serialize};

/// Statement kinds the policy layer can allow or deny.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    Merge,
    Create,
    Alter,
    Drop,
    Truncate,
    Describe,
    Show,
    Use,
    Call,
    Grant,
    Revoke,
    Explain,
    /// Anything unrecognized (SET, COPY, PUT, session commands, ...).
    Command,
}

impl StatementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Select => "select",
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Merge => "merge",
            Self::Create => "create",
            Self::Alter => "alter",
            Self::Drop => "drop",
            Self::Truncate => "truncate",
            Self::Describe => "describe",
            Self::Show => "show",
            Self::Use => "use",
            Self::Call => "call",
            Self::Grant => "grant",
            Self::Revoke => "revoke",
            Self::Explain => "explain",
            Self::Command => "command",
        }
    }
}

/// Classify a statement by its first significant keyword.
///
/// `WITH ... SELECT` and leading set operators / parenthesized SELECTs
/// inherit `Select`. Classification is case-insensitive.
pub fn classify(statement: &str) -> Result<StatementKind, SqlError> {
    let sanitized = sanitize(statement)?;

    // Skip leading whitespace and opening parens so that
    // `(SELECT ...) UNION (SELECT ...)` classifies as Select.
    let significant = sanitized.trim_start_matches(|c: char| c.is_whitespace() || c == '(');

    let keyword = first_keyword(significant).ok_or_else(|| SqlError::Malformed {
        message: "Statement contains no SQL keyword".to_string(),
        hints: vec!["Provide a single SQL statement, e.g. SELECT 1".to_string()],
    })?;

    Ok(kind_for_keyword(&keyword))
}

fn kind_for_keyword(keyword: &str) -> StatementKind {
    match keyword {
        "SELECT" | "WITH" | "UNION" | "INTERSECT" | "EXCEPT" | "MINUS" => StatementKind::Select,
        "INSERT" => StatementKind::Insert,
        "UPDATE" => StatementKind::Update,
        "DELETE" => StatementKind::Delete,
        "MERGE" => StatementKind::Merge,
        "CREATE" => StatementKind::Create,
        "ALTER" => StatementKind::Alter,
        "DROP" => StatementKind::Drop,
        "TRUNCATE" => StatementKind::Truncate,
        "DESCRIBE" | "DESC" => StatementKind::Describe,
        "SHOW" => StatementKind::Show,
        "USE" => StatementKind::Use,
        "CALL" => StatementKind::Call,
        "GRANT" => StatementKind::Grant,
        "REVOKE" => StatementKind::Revoke,
        "EXPLAIN" => StatementKind::Explain,
        _ => StatementKind::Command,
    }
}

/// First run of ASCII letters, uppercased.
pub(crate) fn first_keyword(sql: &str) -> Option<String> {
    let mut current = String::new();
    for ch in sql.chars() {
        if ch.is_ascii_alphabetic() {
            current.push(ch);
        } else if !current.is_empty() {
            break;
        }
    }
    if current.is_empty() {
        None
    } else {
        Some(current.to_ascii_uppercase())
    }
}

/// Blank out comments and string literals, preserving offsets.
///
/// An unterminated block comment is a hard error: the statement cannot be
/// classified safely.
pub(crate) fn sanitize(sql: &str) -> Result<String, SqlError> {
    if sql.trim().is_empty() {
        return Err(SqlError::Malformed {
            message: "Statement is empty".to_string(),
            hints: vec!["Provide a single SQL statement, e.g. SELECT 1".to_string()],
        });
    }

    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    let mut in_single = false;
    let mut in_line_comment = false;
    let mut block_depth: u32 = 0;

    while let Some(ch) = chars.next() {
        if in_line_comment {
            if ch == '\n' {
                in_line_comment = false;
                out.push('\n');
            } else {
                out.push(' ');
            }
            continue;
        }
        if block_depth > 0 {
            if ch == '*' && matches!(chars.peek(), Some('/')) {
                chars.next();
                block_depth -= 1;
                out.push_str("  ");
                continue;
            }
            if ch == '/' && matches!(chars.peek(), Some('*')) {
                chars.next();
                block_depth += 1;
                out.push_str("  ");
                continue;
            }
            out.push(' ');
            continue;
        }
        if in_single {
            if ch == '\'' {
                if matches!(chars.peek(), Some('\'')) {
                    chars.next();
                    out.push_str("  ");
                    continue;
                }
                in_single = false;
            }
            out.push(' ');
            continue;
        }

        if ch == '-' && matches!(chars.peek(), Some('-')) {
            chars.next();
            in_line_comment = true;
            out.push_str("  ");
            continue;
        }
        if ch == '/' && matches!(chars.peek(), Some('*')) {
            chars.next();
            block_depth = 1;
            out.push_str("  ");
            continue;
        }
        if ch == '\'' {
            in_single = true;
            out.push(' ');
            continue;
        }

        out.push(ch);
    }

    if block_depth > 0 {
        return Err(SqlError::Malformed {
            message: "Unterminated block comment".to_string(),
            hints: vec!["Close the /* ... */ comment".to_string()],
        });
    }
    if out.trim().is_empty() {
        return Err(SqlError::Malformed {
            message: "Statement contains only comments".to_string(),
            hints: vec!["Provide a single SQL statement, e.g. SELECT 1".to_string()],
        });
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_kinds() {
        assert_eq!(classify("SELECT 1").unwrap(), StatementKind::Select);
        assert_eq!(
            classify("insert into t values (1)").unwrap(),
            StatementKind::Insert
        );
        assert_eq!(classify("UPDATE t SET x = 1").unwrap(), StatementKind::Update);
        assert_eq!(classify("DELETE FROM t").unwrap(), StatementKind::Delete);
        assert_eq!(
            classify("MERGE INTO t USING s ON t.id = s.id").unwrap(),
            StatementKind::Merge
        );
        assert_eq!(classify("CREATE TABLE t (id INT)").unwrap(), StatementKind::Create);
        assert_eq!(classify("ALTER TABLE t ADD COLUMN y INT").unwrap(), StatementKind::Alter);
        assert_eq!(classify("DROP TABLE t").unwrap(), StatementKind::Drop);
        assert_eq!(classify("TRUNCATE TABLE t").unwrap(), StatementKind::Truncate);
        assert_eq!(classify("SHOW TABLES").unwrap(), StatementKind::Show);
        assert_eq!(classify("USE DATABASE d").unwrap(), StatementKind::Use);
        assert_eq!(classify("CALL my_proc()").unwrap(), StatementKind::Call);
        assert_eq!(classify("GRANT SELECT ON t TO r").unwrap(), StatementKind::Grant);
        assert_eq!(classify("REVOKE SELECT ON t FROM r").unwrap(), StatementKind::Revoke);
        assert_eq!(classify("EXPLAIN SELECT 1").unwrap(), StatementKind::Explain);
    }

    #[test]
    fn test_describe_variants() {
        assert_eq!(classify("DESCRIBE TABLE t").unwrap(), StatementKind::Describe);
        assert_eq!(classify("DESC TABLE t").unwrap(), StatementKind::Describe);
    }

    #[test]
    fn test_cte_and_set_operators_inherit_select() {
        assert_eq!(
            classify("WITH cte AS (SELECT 1) SELECT * FROM cte").unwrap(),
            StatementKind::Select
        );
        assert_eq!(
            classify("(SELECT 1) UNION ALL (SELECT 2)").unwrap(),
            StatementKind::Select
        );
        assert_eq!(
            classify("(SELECT 1) INTERSECT (SELECT 2)").unwrap(),
            StatementKind::Select
        );
    }

    #[test]
    fn test_leading_comments_are_skipped() {
        // Regression: a leading comment must not hide the real keyword.
        assert_eq!(
            classify("-- note\n  SHOW TABLES IN SCHEMA X.Y").unwrap(),
            StatementKind::Show
        );
        assert_eq!(
            classify("/* multi\nline */ SELECT 1").unwrap(),
            StatementKind::Select
        );
        assert_eq!(
            classify("/* a */ -- b\nDESC TABLE t").unwrap(),
            StatementKind::Describe
        );
    }

    #[test]
    fn test_unknown_keyword_is_command() {
        assert_eq!(classify("COPY INTO t FROM @stage").unwrap(), StatementKind::Command);
        assert_eq!(classify("SET x = 1").unwrap(), StatementKind::Command);
        assert_eq!(classify("PUT file:///x @stage").unwrap(), StatementKind::Command);
    }

    #[test]
    fn test_malformed_inputs() {
        assert!(matches!(classify(""), Err(SqlError::Malformed { .. })));
        assert!(matches!(classify("   \n "), Err(SqlError::Malformed { .. })));
        assert!(matches!(classify("-- only a comment"), Err(SqlError::Malformed { .. })));
        assert!(matches!(
            classify("/* unterminated SELECT 1"),
            Err(SqlError::Malformed { .. })
        ));
    }

    #[test]
    fn test_keywords_inside_strings_do_not_classify() {
        // The first keyword is SELECT even though a literal mentions DROP.
        assert_eq!(
            classify("SELECT 'DROP TABLE t' AS note").unwrap(),
            StatementKind::Select
        );
    }
}
