//! Catalog extraction from the warehouse information schema.
//!
//! A build runs in two phases: a sequential plan (databases → schemas)
//! followed by a bounded worker pool that crawls each schema's objects
//! and fetches DDL, throttled by a separate DDL permit gate so the
//! warehouse never sees more than `max_ddl_concurrency` overlapping
//! GET_DDL calls. Per-object failures become structured warnings; a
//! partial catalog is still a useful catalog.

pub mod builder;
pub mod graph;
pub mod model;
pub mod summary;

pub use builder::{CatalogBuildRequest, CatalogBuildResult, CatalogBuilder, CatalogScope};
pub use graph::{DependencyGraph, GraphFormat};
pub use model::{
    CatalogFormat, CatalogMetadata, CatalogObject, CatalogSummary, CatalogWarning, ColumnInfo,
    ObjectType,
};
pub use summary::{load_summary, search, SearchHit};

use igloo_warehouse::WarehouseError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    #[error("Catalog I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No catalog found under {0}")]
    NotBuilt(std::path::PathBuf),

    #[error("Catalog data error: {0}")]
    Data(String),
}
