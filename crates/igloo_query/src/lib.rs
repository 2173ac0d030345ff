//! Query execution pipeline.
//!
//! The flow for one statement:
//!
//! ```text
//! validate → artifact store → cache lookup → submit (tagged)
//!     → inline wait ──────────────→ success | error | timeout
//!            │
//!            └─ budget exhausted → async poll (background thread)
//!                                    → fetch_async_query_result
//! ```
//!
//! History and artifact writes are best-effort and never fail a request;
//! when both happen for a request they happen in order artifact → history,
//! and cache writes follow a successful history entry.

pub mod artifact;
pub mod cache;
pub mod cancel;
pub mod history;
pub mod pending;
pub mod service;
pub mod truncate;

pub use artifact::ArtifactStore;
pub use cache::{CacheKey, CacheManifest, ResultCache};
pub use cancel::CancellationToken;
pub use history::{HistoryLog, QueryEvent, QueryOutcome};
pub use pending::{AsyncState, PendingExecutions};
pub use service::{QueryError, QueryRequest, QueryResponse, QueryResultData, QueryService};
pub use truncate::{truncate_rows, TruncationPolicy};
