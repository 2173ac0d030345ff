//! Allow/deny policy over statement kinds.
//!
//! The policy is an explicit map from kind to allowed. Defaults are
//! read-only: metadata and SELECT statements pass, mutations are denied,
//! and unrecognized commands are denied as the safer fallback.

use crate::classify::StatementKind;
use crate::SqlError;
use std::collections::HashMap;

/// Explicit kind → allowed map.
#[derive(Debug, Clone)]
pub struct StatementPolicy {
    allowed: HashMap<StatementKind, bool>,
}

impl Default for StatementPolicy {
    fn default() -> Self {
        use StatementKind::*;
        let mut allowed = HashMap::new();
        for kind in [Select, Show, Describe, Explain, Use] {
            allowed.insert(kind, true);
        }
        for kind in [
            Insert, Update, Delete, Merge, Create, Alter, Drop, Truncate, Call, Grant, Revoke,
            Command,
        ] {
            allowed.insert(kind, false);
        }
        Self { allowed }
    }
}

impl StatementPolicy {
    /// A policy that allows everything (operator opt-in).
    pub fn allow_all() -> Self {
        let mut policy = Self::default();
        for value in policy.allowed.values_mut() {
            *value = true;
        }
        policy
    }

    /// Override a single kind.
    pub fn set(&mut self, kind: StatementKind, allow: bool) -> &mut Self {
        self.allowed.insert(kind, allow);
        self
    }

    pub fn is_allowed(&self, kind: StatementKind) -> bool {
        self.allowed.get(&kind).copied().unwrap_or(false)
    }

    /// Check a classified statement against the policy.
    pub fn validate(&self, kind: StatementKind) -> Result<(), SqlError> {
        if self.is_allowed(kind) {
            Ok(())
        } else {
            Err(SqlError::Denied {
                kind,
                safe_alternatives: safe_alternatives(kind),
            })
        }
    }
}

/// 1-3 action-oriented suggestions for a denied statement kind.
pub fn safe_alternatives(kind: StatementKind) -> Vec<String> {
    use StatementKind::*;
    let suggestions: &[&str] = match kind {
        Truncate | Delete => &[
            "Inspect the rows first: SELECT * FROM <table> LIMIT 100",
            "Count what would be affected: SELECT COUNT(*) FROM <table> WHERE <condition>",
        ],
        Insert | Update | Merge => &[
            "Preview the target rows: SELECT * FROM <table> WHERE <condition> LIMIT 100",
            "Ask an operator with write access to apply the change",
        ],
        Drop | Alter | Create => &[
            "Inspect the object instead: DESCRIBE TABLE <name>",
            "List existing objects: SHOW TABLES IN SCHEMA <db>.<schema>",
        ],
        Grant | Revoke => &[
            "List current grants: SHOW GRANTS ON <object>",
        ],
        Call => &[
            "Inspect the procedure first: DESCRIBE PROCEDURE <name>(...)",
            "Read its definition from the catalog instead of executing it",
        ],
        _ => &[
            "Use a read-only statement: SELECT, SHOW, DESCRIBE, or EXPLAIN",
            "Preview data with SELECT ... LIMIT 100",
        ],
    };
    suggestions.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = StatementPolicy::default();
        assert!(policy.validate(StatementKind::Select).is_ok());
        assert!(policy.validate(StatementKind::Show).is_ok());
        assert!(policy.validate(StatementKind::Describe).is_ok());
        assert!(policy.validate(StatementKind::Explain).is_ok());
        assert!(policy.validate(StatementKind::Use).is_ok());

        assert!(policy.validate(StatementKind::Insert).is_err());
        assert!(policy.validate(StatementKind::Drop).is_err());
        assert!(policy.validate(StatementKind::Truncate).is_err());
        assert!(policy.validate(StatementKind::Command).is_err());
    }

    #[test]
    fn test_denial_carries_alternatives() {
        let policy = StatementPolicy::default();
        match policy.validate(StatementKind::Truncate) {
            Err(SqlError::Denied {
                kind,
                safe_alternatives,
            }) => {
                assert_eq!(kind, StatementKind::Truncate);
                assert!(!safe_alternatives.is_empty());
                assert!(safe_alternatives.len() <= 3);
                assert!(safe_alternatives[0].contains("SELECT"));
            }
            other => panic!("expected denial, got {:?}", other),
        }
    }

    #[test]
    fn test_policy_override() {
        let mut policy = StatementPolicy::default();
        policy.set(StatementKind::Create, true);
        assert!(policy.validate(StatementKind::Create).is_ok());

        policy.set(StatementKind::Select, false);
        assert!(policy.validate(StatementKind::Select).is_err());
    }

    #[test]
    fn test_allow_all() {
        let policy = StatementPolicy::allow_all();
        assert!(policy.validate(StatementKind::Drop).is_ok());
        assert!(policy.validate(StatementKind::Command).is_ok());
    }
}
