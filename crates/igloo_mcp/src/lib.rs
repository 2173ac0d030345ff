//! MCP (Model Context Protocol) Server for the Igloo Snowflake gateway.
//!
//! This crate exposes the query pipeline, catalog engine, and Living
//! Reports engine as MCP tools, enabling AI assistants to interact with
//! a Snowflake warehouse safely.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                   AI Assistant (Claude, ...)                │
//! └────────────────────────────────────────────────────────────┘
//!                       │ JSON-RPC 2.0 over stdio
//!                       ▼
//! ┌────────────────────────────────────────────────────────────┐
//! │ crates/igloo_mcp                                            │
//! │   Server     │ stdio loop, dispatch, response budget        │
//! │   Tools      │ query, catalog, report, search, health       │
//! │   Envelope   │ {status, ..., timing, warnings, request_id}  │
//! ├────────────────────────────────────────────────────────────┤
//! │ igloo_query  │ validate → cache → submit → wait → poll      │
//! │ igloo_catalog│ bounded-pool information_schema crawl        │
//! │ igloo_reports│ outlines, patches, citations, rendering      │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Design principles
//!
//! 1. **Synchronous core:** a blocking stdio loop plus plain threads for
//!    long-running work; no async runtime.
//! 2. **Job-first queries:** a query that outlives its inline budget
//!    returns an `execution_id` immediately; progress is polled via
//!    `fetch_async_query_result`.
//! 3. **Structured failure:** evolve-class validation problems come back
//!    as `status: "validation_failed"` responses with field paths and
//!    examples, never as raised errors.

pub mod envelope;
pub mod health;
pub mod logging;
pub mod offline;
pub mod protocol;
pub mod server;
pub mod state;
pub mod tools;

pub use protocol::{ErrorCode, JsonRpcError, JsonRpcRequest, JsonRpcResponse};
pub use server::{McpServer, McpServerConfig};
pub use state::AppState;
