//! Filesystem root resolution.
//!
//! Igloo keeps all of its state under a single scope root: either the
//! global `~/.igloo_mcp/` directory or the enclosing repository when
//! `IGLOO_MCP_LOG_SCOPE=repo`. Every derived location (history file,
//! artifact tree, cache, catalogs, reports) can be overridden individually
//! with its own environment variable; explicit overrides always win over
//! scope derivation.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Which root the derived paths hang off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogScope {
    /// `~/.igloo_mcp/`
    Global,
    /// Nearest ancestor of the working directory containing `.git`.
    Repo,
}

impl LogScope {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "global" => Some(Self::Global),
            "repo" => Some(Self::Repo),
            _ => None,
        }
    }
}

/// Every filesystem location the server writes to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedPaths {
    pub scope: LogScope,
    pub scope_root: PathBuf,
    /// `None` when history is disabled.
    pub history_path: Option<PathBuf>,
    pub artifact_root: PathBuf,
    pub cache_root: PathBuf,
    pub catalog_root: PathBuf,
    pub reports_root: PathBuf,
}

impl ResolvedPaths {
    /// Log files for the server process itself.
    pub fn logs_dir(&self) -> PathBuf {
        self.scope_root.join("logs")
    }
}

/// Resolve all roots from an environment lookup.
///
/// Returns the paths plus any warnings (bad scope value, explicit root
/// conflicting with an explicitly requested scope). Resolution never
/// fails; it degrades to defaults.
pub fn resolve<F>(lookup: F) -> (ResolvedPaths, Vec<String>)
where
    F: Fn(&str) -> Option<String>,
{
    let mut warnings = Vec::new();

    let scope_raw = lookup("IGLOO_MCP_LOG_SCOPE");
    let scope = match scope_raw.as_deref() {
        None | Some("") => LogScope::Global,
        Some(value) => match LogScope::parse(value) {
            Some(scope) => scope,
            None => {
                warnings.push(format!(
                    "IGLOO_MCP_LOG_SCOPE={} is not 'global' or 'repo'; using global",
                    value
                ));
                LogScope::Global
            }
        },
    };

    let scope_root = match scope {
        LogScope::Global => global_root(),
        LogScope::Repo => match repo_root() {
            Some(root) => root,
            None => {
                warnings.push(
                    "IGLOO_MCP_LOG_SCOPE=repo but no enclosing git repository was found; \
                     using the current directory"
                        .to_string(),
                );
                std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
            }
        },
    };

    let logs_dir = scope_root.join("logs");

    // History: empty string or "disabled" turns it off entirely.
    let history_path = match lookup("IGLOO_MCP_QUERY_HISTORY") {
        Some(value) if value.trim().is_empty() || value.trim().eq_ignore_ascii_case("disabled") => {
            None
        }
        Some(value) => Some(PathBuf::from(value)),
        None => Some(logs_dir.join("doc.jsonl")),
    };

    let scope_explicit = scope_raw.is_some();
    let mut explicit_root = |var: &str, default: PathBuf| -> PathBuf {
        match lookup(var) {
            Some(value) if !value.trim().is_empty() => {
                let path = PathBuf::from(value);
                if scope_explicit && !path.starts_with(&scope_root) {
                    warnings.push(format!(
                        "{} is outside the {} scope root {}; the explicit path wins",
                        var,
                        match scope {
                            LogScope::Global => "global",
                            LogScope::Repo => "repo",
                        },
                        scope_root.display()
                    ));
                }
                path
            }
            _ => default,
        }
    };

    let artifact_root = explicit_root("IGLOO_MCP_ARTIFACT_ROOT", logs_dir.join("artifacts"));
    let cache_root = explicit_root("IGLOO_MCP_CACHE_ROOT", artifact_root.join("cache"));
    let catalog_root = explicit_root("IGLOO_MCP_CATALOG_ROOT", scope_root.join("catalogs"));
    let reports_root = explicit_root("IGLOO_MCP_REPORTS_ROOT", scope_root.join("reports"));

    (
        ResolvedPaths {
            scope,
            scope_root,
            history_path,
            artifact_root,
            cache_root,
            catalog_root,
            reports_root,
        },
        warnings,
    )
}

/// `~/.igloo_mcp`, or `./.igloo_mcp` when no home directory exists.
fn global_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".igloo_mcp")
}

/// Walk up from the working directory looking for `.git`.
fn repo_root() -> Option<PathBuf> {
    let start = std::env::current_dir().ok()?;
    ancestor_with_git(&start)
}

fn ancestor_with_git(start: &Path) -> Option<PathBuf> {
    let mut dir = Some(start);
    while let Some(current) = dir {
        if current.join(".git").exists() {
            return Some(current.to_path_buf());
        }
        dir = current.parent();
    }
    None
}
