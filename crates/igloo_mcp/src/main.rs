//! igloo-mcp binary: wire config, profile, and services, then serve
//! JSON-RPC over stdio.
//!
//! The Snowflake driver is an external collaborator; embedders construct
//! [`igloo_mcp::server::McpServer`] with their own `WarehouseClient`.
//! Run standalone, the server starts with the driverless placeholder so
//! report and catalog-read tools work against local state.

use anyhow::Result;
use clap::Parser;
use igloo_core::Config;
use igloo_mcp::logging::init_logging;
use igloo_mcp::offline::UnconfiguredWarehouse;
use igloo_mcp::server::{McpServer, McpServerConfig};
use igloo_mcp::state::AppState;
use igloo_warehouse::{Profile, SessionContext};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "igloo-mcp", about = "MCP server for the Igloo Snowflake gateway", version)]
struct Cli {
    /// Connection profile name (recorded in history and cache keys)
    #[arg(long, env = "IGLOO_MCP_PROFILE", default_value = "default")]
    profile: String,

    /// Default warehouse for the session
    #[arg(long, env = "IGLOO_MCP_WAREHOUSE")]
    warehouse: Option<String>,

    /// Default database for the session
    #[arg(long, env = "IGLOO_MCP_DATABASE")]
    database: Option<String>,

    /// Default schema for the session
    #[arg(long, env = "IGLOO_MCP_SCHEMA")]
    schema: Option<String>,

    /// Default role for the session
    #[arg(long, env = "IGLOO_MCP_ROLE")]
    role: Option<String>,

    /// Mirror console logging at the file filter level
    #[arg(long, short)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env();

    init_logging(config.paths.logs_dir(), cli.verbose)?;

    let profile = Profile {
        name: cli.profile,
        session: SessionContext {
            warehouse: cli.warehouse,
            database: cli.database,
            schema: cli.schema,
            role: cli.role,
        },
    };

    let state = AppState::new(Arc::new(UnconfiguredWarehouse), profile, config);
    let mut server = McpServer::new(McpServerConfig::default(), state);
    server.run()
}
