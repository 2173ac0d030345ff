//! Process-wide configuration.
//!
//! All tunables come from `IGLOO_MCP_*` environment variables, read once
//! at startup. Unparseable values fall back to their defaults and are
//! recorded as warnings; configuration never aborts the process.

use crate::paths::{self, ResolvedPaths};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Result cache behavior, selectable per request and defaulted here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    /// Lookup on read, write on miss.
    #[default]
    Enabled,
    /// Bypass lookup, write fresh.
    Refresh,
    /// Lookup only, never write.
    ReadOnly,
    /// No lookup, no write.
    Disabled,
}

impl FromStr for CacheMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "enabled" => Ok(Self::Enabled),
            "refresh" => Ok(Self::Refresh),
            "read_only" => Ok(Self::ReadOnly),
            "disabled" => Ok(Self::Disabled),
            other => Err(format!(
                "'{}' is not one of enabled|refresh|read_only|disabled",
                other
            )),
        }
    }
}

/// The single immutable configuration value.
///
/// Built once by the binary and handed by value (or reference) into every
/// component constructor. There are no module-level globals.
#[derive(Debug, Clone)]
pub struct Config {
    pub paths: ResolvedPaths,

    pub cache_mode: CacheMode,
    pub cache_max_rows: usize,

    pub catalog_concurrency: usize,
    pub max_ddl_concurrency: usize,

    pub min_query_timeout_secs: u64,
    pub max_query_timeout_secs: u64,
    pub max_sql_statement_length: usize,
    pub min_reason_length: usize,
    pub max_reason_length: usize,

    pub result_size_limit_mb: u64,
    pub result_keep_first_rows: usize,
    pub result_keep_last_rows: usize,
    pub result_truncation_threshold: usize,

    /// Budget for acquiring a report or index lock.
    pub lock_timeout: Duration,

    /// Warnings accumulated during resolution; the binary logs these at
    /// startup and `health_check` surfaces them.
    pub warnings: Vec<String>,
}

impl Config {
    /// Build from the real process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary lookup (tests pass a map).
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let (paths, mut warnings) = paths::resolve(&lookup);

        let mut parse = |var: &str, default: u64| -> u64 {
            match lookup(var) {
                Some(raw) => match raw.trim().parse::<u64>() {
                    Ok(value) => value,
                    Err(_) => {
                        warnings.push(format!(
                            "{}={} is not a non-negative integer; using {}",
                            var, raw, default
                        ));
                        default
                    }
                },
                None => default,
            }
        };

        let cache_max_rows = parse("IGLOO_MCP_CACHE_MAX_ROWS", 5000) as usize;
        let catalog_concurrency = parse("IGLOO_MCP_CATALOG_CONCURRENCY", 16).max(1) as usize;
        let max_ddl_concurrency = parse("IGLOO_MCP_MAX_DDL_CONCURRENCY", 8).max(1) as usize;
        let min_query_timeout_secs = parse("IGLOO_MCP_MIN_QUERY_TIMEOUT_SECONDS", 1).max(1);
        let max_query_timeout_secs =
            parse("IGLOO_MCP_MAX_QUERY_TIMEOUT_SECONDS", 3600).max(min_query_timeout_secs);
        let max_sql_statement_length = parse("IGLOO_MCP_MAX_SQL_STATEMENT_LENGTH", 1_000_000) as usize;
        let min_reason_length = parse("IGLOO_MCP_MIN_REASON_LENGTH", 5) as usize;
        let max_reason_length =
            parse("IGLOO_MCP_MAX_REASON_LENGTH", 200).max(min_reason_length as u64) as usize;
        let result_size_limit_mb = parse("IGLOO_MCP_RESULT_SIZE_LIMIT_MB", 1);
        let result_keep_first_rows = parse("IGLOO_MCP_RESULT_KEEP_FIRST_ROWS", 500) as usize;
        let result_keep_last_rows = parse("IGLOO_MCP_RESULT_KEEP_LAST_ROWS", 50) as usize;
        let result_truncation_threshold =
            parse("IGLOO_MCP_RESULT_TRUNCATION_THRESHOLD", 1000) as usize;

        let cache_mode = match lookup("IGLOO_MCP_CACHE_MODE") {
            Some(raw) => match raw.parse::<CacheMode>() {
                Ok(mode) => mode,
                Err(e) => {
                    warnings.push(format!("IGLOO_MCP_CACHE_MODE: {}; using enabled", e));
                    CacheMode::Enabled
                }
            },
            None => CacheMode::Enabled,
        };

        Self {
            paths,
            cache_mode,
            cache_max_rows,
            catalog_concurrency,
            max_ddl_concurrency,
            min_query_timeout_secs,
            max_query_timeout_secs,
            max_sql_statement_length,
            min_reason_length,
            max_reason_length,
            result_size_limit_mb,
            result_keep_first_rows,
            result_keep_last_rows,
            result_truncation_threshold,
            lock_timeout: Duration::from_secs(10),
            warnings,
        }
    }

    /// Clamp a requested query timeout into the configured bounds.
    pub fn clamp_timeout_secs(&self, requested: u64) -> u64 {
        requested.clamp(self.min_query_timeout_secs, self.max_query_timeout_secs)
    }
}
