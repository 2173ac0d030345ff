//! Response-size truncation.
//!
//! Synchronous tool responses keep the first and last rows of oversized
//! results instead of cutting mid-stream, so agents see both the head of
//! the data and its tail. The full result (up to the cache row cap) still
//! lands in the result cache.

use igloo_warehouse::RowSet;
use serde::{Deserialize, Serialize};

/// Knobs from `IGLOO_MCP_RESULT_*`.
#[derive(Debug, Clone, Copy)]
pub struct TruncationPolicy {
    pub size_limit_mb: u64,
    pub keep_first_rows: usize,
    pub keep_last_rows: usize,
    /// Row count above which truncation applies regardless of byte size.
    pub threshold_rows: usize,
}

impl Default for TruncationPolicy {
    fn default() -> Self {
        Self {
            size_limit_mb: 1,
            keep_first_rows: 500,
            keep_last_rows: 50,
            threshold_rows: 1000,
        }
    }
}

/// A possibly-truncated response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TruncatedRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    pub total_rows: usize,
    pub truncated: bool,
    /// Rows omitted from the middle when truncated.
    pub omitted_rows: usize,
}

/// Apply the policy to a result set.
pub fn truncate_rows(rows: &RowSet, policy: &TruncationPolicy) -> TruncatedRows {
    let total = rows.row_count();
    let over_threshold = total > policy.threshold_rows;
    let over_size = estimated_bytes(rows) > policy.size_limit_mb.saturating_mul(1024 * 1024);

    if !over_threshold && !over_size {
        return TruncatedRows {
            columns: rows.columns.clone(),
            rows: rows.rows.clone(),
            total_rows: total,
            truncated: false,
            omitted_rows: 0,
        };
    }

    let keep_first = policy.keep_first_rows.min(total);
    let keep_last = policy.keep_last_rows.min(total.saturating_sub(keep_first));

    let mut kept = Vec::with_capacity(keep_first + keep_last);
    kept.extend_from_slice(&rows.rows[..keep_first]);
    if keep_last > 0 {
        kept.extend_from_slice(&rows.rows[total - keep_last..]);
    }
    let omitted = total - kept.len();

    TruncatedRows {
        columns: rows.columns.clone(),
        rows: kept,
        total_rows: total,
        truncated: omitted > 0,
        omitted_rows: omitted,
    }
}

fn estimated_bytes(rows: &RowSet) -> u64 {
    // Serialization estimate, good enough for a budget check.
    serde_json::to_vec(&rows.rows).map(|v| v.len() as u64).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use igloo_warehouse::mock::int_rows;

    #[test]
    fn test_small_result_untouched() {
        let rows = int_rows("id", &[1, 2, 3]);
        let out = truncate_rows(&rows, &TruncationPolicy::default());
        assert!(!out.truncated);
        assert_eq!(out.rows.len(), 3);
        assert_eq!(out.omitted_rows, 0);
    }

    #[test]
    fn test_keeps_head_and_tail() {
        let values: Vec<i64> = (0..100).collect();
        let rows = int_rows("id", &values);
        let policy = TruncationPolicy {
            threshold_rows: 10,
            keep_first_rows: 5,
            keep_last_rows: 2,
            size_limit_mb: 1,
        };

        let out = truncate_rows(&rows, &policy);
        assert!(out.truncated);
        assert_eq!(out.total_rows, 100);
        assert_eq!(out.rows.len(), 7);
        assert_eq!(out.omitted_rows, 93);
        assert_eq!(out.rows[0][0], serde_json::json!(0));
        assert_eq!(out.rows[4][0], serde_json::json!(4));
        assert_eq!(out.rows[5][0], serde_json::json!(98));
        assert_eq!(out.rows[6][0], serde_json::json!(99));
    }

    #[test]
    fn test_keep_windows_never_overlap() {
        let rows = int_rows("id", &[1, 2, 3]);
        let policy = TruncationPolicy {
            threshold_rows: 1,
            keep_first_rows: 2,
            keep_last_rows: 5,
            size_limit_mb: 1,
        };

        let out = truncate_rows(&rows, &policy);
        // 2 head + 1 remaining tail row, no duplication.
        assert_eq!(out.rows.len(), 3);
        assert!(!out.truncated);
    }
}
