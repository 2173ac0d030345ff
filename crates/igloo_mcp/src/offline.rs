//! Placeholder warehouse for driverless deployments.
//!
//! The real Snowflake driver lives outside this workspace and is wired
//! in by the embedding binary. When none is provided, query and catalog
//! tools fail with an actionable connection error while the report
//! tools keep working entirely from local disk.

use igloo_warehouse::{
    QueryId, QueryStatus, QueryTag, RowSet, SessionContext, WarehouseClient, WarehouseError,
};

const NO_DRIVER: &str =
    "no warehouse driver is configured; construct the server with a WarehouseClient implementation";

/// A `WarehouseClient` that refuses everything.
#[derive(Debug, Clone, Default)]
pub struct UnconfiguredWarehouse;

impl WarehouseClient for UnconfiguredWarehouse {
    fn set_session_context(&self, _ctx: &SessionContext) -> Result<(), WarehouseError> {
        Err(WarehouseError::Connection(NO_DRIVER.to_string()))
    }

    fn submit(&self, _sql: &str, _tag: &QueryTag) -> Result<QueryId, WarehouseError> {
        Err(WarehouseError::Connection(NO_DRIVER.to_string()))
    }

    fn poll(&self, _query_id: &QueryId) -> Result<QueryStatus, WarehouseError> {
        Err(WarehouseError::Connection(NO_DRIVER.to_string()))
    }

    fn fetch(&self, _query_id: &QueryId) -> Result<RowSet, WarehouseError> {
        Err(WarehouseError::Connection(NO_DRIVER.to_string()))
    }

    fn cancel(&self, _query_id: &QueryId) -> Result<(), WarehouseError> {
        Err(WarehouseError::Connection(NO_DRIVER.to_string()))
    }

    fn ping(&self) -> Result<(), WarehouseError> {
        Err(WarehouseError::Connection(NO_DRIVER.to_string()))
    }
}
