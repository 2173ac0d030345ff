//! Core primitives shared by every Igloo MCP crate.
//!
//! This crate owns the pieces that everything else builds on:
//!
//! - `config`: the single immutable [`Config`] value built from
//!   `IGLOO_MCP_*` environment variables at process start.
//! - `paths`: global vs. repo-scoped root resolution for logs, artifacts,
//!   cache, catalogs, and reports.
//! - `fsio`: tmp-then-rename atomic writes with directory fsync, plus
//!   JSONL append/read helpers.
//! - `lock`: cross-platform advisory file locks with time-bounded
//!   acquisition.
//! - `hash`: SHA-256 content hashing used for SQL artifacts, cache keys,
//!   and outline digests.
//!
//! No component reads the environment after startup; configuration flows
//! in by value.

pub mod config;
pub mod fsio;
pub mod hash;
pub mod lock;
pub mod paths;

pub use config::{CacheMode, Config};
pub use fsio::{append_jsonl, atomic_write_bytes, atomic_write_json, read_jsonl, read_jsonl_lossy};
pub use hash::sha256_hex;
pub use lock::{FileLock, LockError};
pub use paths::{LogScope, ResolvedPaths};
