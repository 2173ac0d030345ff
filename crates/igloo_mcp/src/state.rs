//! Shared server state.
//!
//! Built once at startup from the immutable [`Config`] and handed to
//! every tool call by reference. No module-level globals, no locks: the
//! services inside are individually thread-safe.

use igloo_catalog::CatalogBuilder;
use igloo_core::Config;
use igloo_query::QueryService;
use igloo_reports::{MarkdownTypesetter, ReportService, Typesetter};
use igloo_warehouse::{Profile, WarehouseClient};
use std::sync::Arc;

pub struct AppState {
    pub config: Config,
    pub profile: Profile,
    pub warehouse: Arc<dyn WarehouseClient>,
    pub query: Arc<QueryService>,
    pub catalog: CatalogBuilder,
    pub reports: ReportService,
    pub typesetter: Arc<dyn Typesetter>,
}

impl AppState {
    /// Wire every service from one config + one driver.
    pub fn new(warehouse: Arc<dyn WarehouseClient>, profile: Profile, config: Config) -> Self {
        let query = Arc::new(QueryService::new(
            Arc::clone(&warehouse),
            profile.clone(),
            &config,
        ));
        let catalog = CatalogBuilder::new(
            Arc::clone(&warehouse),
            &config.paths.catalog_root,
            config.catalog_concurrency,
            config.max_ddl_concurrency,
        );
        let reports = ReportService::new(&config.paths.reports_root, config.lock_timeout);

        Self {
            config,
            profile,
            warehouse,
            query,
            catalog,
            reports,
            typesetter: Arc::new(MarkdownTypesetter),
        }
    }

    /// Swap the typesetter (external renderer integration).
    pub fn with_typesetter(mut self, typesetter: Arc<dyn Typesetter>) -> Self {
        self.typesetter = typesetter;
        self
    }
}

/// Test-only state wiring with every root under one temp dir.
#[cfg(test)]
pub(crate) fn test_state(
    root: &std::path::Path,
    warehouse: Arc<dyn WarehouseClient>,
) -> AppState {
    use std::collections::HashMap;

    let vars: HashMap<String, String> = [
        ("IGLOO_MCP_QUERY_HISTORY", root.join("doc.jsonl")),
        ("IGLOO_MCP_ARTIFACT_ROOT", root.join("artifacts")),
        ("IGLOO_MCP_CACHE_ROOT", root.join("cache")),
        ("IGLOO_MCP_CATALOG_ROOT", root.join("catalogs")),
        ("IGLOO_MCP_REPORTS_ROOT", root.join("reports")),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string_lossy().into_owned()))
    .collect();
    let config = Config::from_lookup(|key| vars.get(key).cloned());

    AppState::new(
        warehouse,
        Profile {
            name: "test".to_string(),
            session: igloo_warehouse::SessionContext::default(),
        },
        config,
    )
}
