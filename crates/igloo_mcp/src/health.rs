//! Health aggregation across subsystems.

use crate::state::AppState;
use serde_json::{json, Value};
use std::time::Instant;

/// Aggregates profile, connectivity, catalog, and report-index status.
pub struct HealthMonitor;

#[derive(Debug, Clone, Copy)]
pub struct HealthOptions {
    pub include_profile: bool,
    pub include_catalog: bool,
    /// Accepted for interface compatibility; Cortex checks are not part
    /// of this server.
    pub include_cortex: bool,
}

impl Default for HealthOptions {
    fn default() -> Self {
        Self {
            include_profile: true,
            include_catalog: true,
            include_cortex: false,
        }
    }
}

impl HealthMonitor {
    /// Run the checks. Never fails; problems land in the report body.
    pub fn check(state: &AppState, opts: HealthOptions) -> Value {
        let mut healthy = true;
        let mut body = serde_json::Map::new();

        // Connectivity.
        let started = Instant::now();
        let connectivity = match state.warehouse.ping() {
            Ok(()) => json!({
                "ok": true,
                "latency_ms": started.elapsed().as_millis() as u64,
            }),
            Err(e) => {
                healthy = false;
                json!({ "ok": false, "error": e.to_string() })
            }
        };
        body.insert("connectivity".to_string(), connectivity);

        if opts.include_profile {
            body.insert(
                "profile".to_string(),
                json!({
                    "name": state.profile.name,
                    "session": state.profile.session,
                }),
            );
        }

        if opts.include_catalog {
            let root = &state.config.paths.catalog_root;
            let built: Vec<String> = std::fs::read_dir(root)
                .map(|entries| {
                    entries
                        .filter_map(|e| e.ok())
                        .filter(|e| e.path().join("catalog_summary.json").exists())
                        .map(|e| e.file_name().to_string_lossy().into_owned())
                        .collect()
                })
                .unwrap_or_default();
            body.insert(
                "catalog".to_string(),
                json!({
                    "root": root,
                    "built_databases": built,
                }),
            );
        }

        if opts.include_cortex {
            body.insert(
                "cortex".to_string(),
                json!({ "ok": true, "note": "cortex checks are not part of this server" }),
            );
        }

        // Report index.
        let index_status = match state.reports.index().load() {
            Ok(entries) => json!({
                "ok": true,
                "report_count": entries.len(),
            }),
            Err(e) => {
                healthy = false;
                json!({ "ok": false, "error": e.to_string() })
            }
        };
        body.insert("report_index".to_string(), index_status);

        // Async query registry and configuration warnings.
        body.insert(
            "config_warnings".to_string(),
            json!(state.config.warnings),
        );

        body.insert(
            "overall".to_string(),
            Value::String(if healthy { "healthy" } else { "degraded" }.to_string()),
        );
        Value::Object(body)
    }
}
