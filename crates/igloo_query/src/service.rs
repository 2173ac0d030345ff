//! The query scheduler.
//!
//! Orchestrates one statement through validate → cache → submit → inline
//! wait → (async handoff | success | timeout | error), recording history
//! and artifacts along the way. See the crate docs for the pipeline
//! diagram.

use crate::artifact::ArtifactStore;
use crate::cache::{CacheKey, ResultCache};
use crate::cancel::CancellationToken;
use crate::history::{statement_preview, HistoryLog, QueryEvent, QueryOutcome};
use crate::pending::{AsyncState, PendingExecutions};
use crate::truncate::{truncate_rows, TruncatedRows, TruncationPolicy};
use chrono::Utc;
use igloo_core::config::{CacheMode, Config};
use igloo_core::sha256_hex;
use igloo_sql::{classify, SourceAttribution, SqlError, StatementPolicy};
use igloo_warehouse::{
    Profile, QueryId, QueryStatus, QueryTag, SessionContext, WarehouseClient, WarehouseError,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How long the scheduler waits inline and how often it polls.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerTiming {
    /// Budget for the whole synchronous RPC.
    pub rpc_budget: Duration,
    /// Headroom reserved for response assembly.
    pub safety_margin: Duration,
    pub poll_interval: Duration,
}

impl Default for SchedulerTiming {
    fn default() -> Self {
        Self {
            rpc_budget: Duration::from_secs(25),
            safety_margin: Duration::from_secs(2),
            poll_interval: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Limits {
    min_timeout_secs: u64,
    max_timeout_secs: u64,
    max_statement_length: usize,
    min_reason_length: usize,
    max_reason_length: usize,
}

/// One execution request, parameters already coerced by the tool layer.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub statement: String,
    pub reason: String,
    pub timeout_seconds: u64,
    pub overrides: SessionContext,
    pub cache_mode: CacheMode,
    pub request_id: Option<String>,
}

/// Rows plus identity for a finished execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResultData {
    pub execution_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_id: Option<String>,
    #[serde(flatten)]
    pub data: TruncatedRows,
    pub duration_ms: u64,
    pub source_databases: Vec<String>,
    pub tables: Vec<String>,
}

/// Terminal (or handed-off) outcome of `execute`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QueryResponse {
    Success {
        #[serde(flatten)]
        result: QueryResultData,
    },
    CacheHit {
        execution_id: String,
        /// Execution that originally produced the cached rows.
        cached_execution_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        query_id: Option<String>,
        #[serde(flatten)]
        data: TruncatedRows,
        source_databases: Vec<String>,
        tables: Vec<String>,
    },
    /// Still running; poll `fetch_async_query_result`.
    Pending {
        execution_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        query_id: Option<String>,
        message: String,
    },
    Timeout {
        execution_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        query_id: Option<String>,
        timeout_seconds: u64,
        guidance: Vec<String>,
    },
    Cancelled {
        execution_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        query_id: Option<String>,
    },
}

/// Errors surfaced to the tool layer.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error(transparent)]
    Sql(#[from] SqlError),

    #[error("reason must be {min}-{max} chars, got {length}")]
    ReasonLength {
        length: usize,
        min: usize,
        max: usize,
    },

    #[error("Query failed: {message}")]
    Execution {
        query_id: Option<String>,
        message: String,
    },

    #[error(transparent)]
    Warehouse(#[from] WarehouseError),
}

/// Guidance attached to every timeout, in fixed order: reduce scanned
/// data via the catalog first, then clustering keys, then a larger
/// timeout as the last resort.
pub fn timeout_guidance() -> Vec<String> {
    vec![
        "Narrow the scan: use search_catalog to find partition and date columns, then filter on them"
            .to_string(),
        "Add WHERE predicates on clustering keys so the warehouse can prune micro-partitions"
            .to_string(),
        "If the query is already minimal, raise timeout_seconds (up to 3600)".to_string(),
    ]
}

/// Common fields for every history event of one request.
#[derive(Clone)]
struct EventTemplate {
    execution_id: String,
    profile: String,
    session: SessionContext,
    preview: String,
    sql_sha256: String,
    timeout_seconds: u64,
    reason: String,
    source_databases: Vec<String>,
    tables: Vec<String>,
    request_id: Option<String>,
}

impl EventTemplate {
    fn event(
        &self,
        status: QueryOutcome,
        rowcount: Option<usize>,
        duration_ms: Option<u64>,
        query_id: Option<String>,
        error: Option<String>,
    ) -> QueryEvent {
        QueryEvent {
            execution_id: self.execution_id.clone(),
            ts: Utc::now(),
            profile: self.profile.clone(),
            session_context: self.session.clone(),
            statement_preview: self.preview.clone(),
            sql_sha256: self.sql_sha256.clone(),
            timeout_seconds: self.timeout_seconds,
            reason: self.reason.clone(),
            source_databases: self.source_databases.clone(),
            tables: self.tables.clone(),
            status,
            rowcount,
            duration_ms,
            query_id,
            error,
            request_id: self.request_id.clone(),
        }
    }
}

/// The scheduler. Shared across tool calls behind an `Arc`.
pub struct QueryService {
    client: Arc<dyn WarehouseClient>,
    profile: Profile,
    policy: StatementPolicy,
    artifacts: ArtifactStore,
    history: Arc<HistoryLog>,
    cache: ResultCache,
    pending: PendingExecutions,
    limits: Limits,
    truncation: TruncationPolicy,
    timing: SchedulerTiming,
}

impl QueryService {
    pub fn new(client: Arc<dyn WarehouseClient>, profile: Profile, config: &Config) -> Self {
        Self {
            client,
            profile,
            policy: StatementPolicy::default(),
            artifacts: ArtifactStore::new(&config.paths.artifact_root),
            history: Arc::new(HistoryLog::open(config.paths.history_path.clone())),
            cache: ResultCache::new(&config.paths.cache_root, config.cache_max_rows),
            pending: PendingExecutions::new(),
            limits: Limits {
                min_timeout_secs: config.min_query_timeout_secs,
                max_timeout_secs: config.max_query_timeout_secs,
                max_statement_length: config.max_sql_statement_length,
                min_reason_length: config.min_reason_length,
                max_reason_length: config.max_reason_length,
            },
            truncation: TruncationPolicy {
                size_limit_mb: config.result_size_limit_mb,
                keep_first_rows: config.result_keep_first_rows,
                keep_last_rows: config.result_keep_last_rows,
                threshold_rows: config.result_truncation_threshold,
            },
            timing: SchedulerTiming::default(),
        }
    }

    /// Replace the statement policy (operator opt-in to writes).
    pub fn with_policy(mut self, policy: StatementPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Shrink timings for tests.
    pub fn with_timing(mut self, timing: SchedulerTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn profile_name(&self) -> &str {
        &self.profile.name
    }

    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    /// Read the state of an execution that went async.
    pub fn fetch_async(&self, execution_id: &str) -> Option<AsyncState> {
        self.pending.get(execution_id)
    }

    /// Execute one statement through the full pipeline.
    pub fn execute(
        &self,
        req: QueryRequest,
        cancel: CancellationToken,
    ) -> Result<QueryResponse, QueryError> {
        // ---- validation, no side effects yet --------------------------------
        if req.statement.len() > self.limits.max_statement_length {
            return Err(SqlError::TooLong {
                length: req.statement.len(),
                max: self.limits.max_statement_length,
            }
            .into());
        }
        let reason_len = req.reason.trim().len();
        if reason_len < self.limits.min_reason_length || reason_len > self.limits.max_reason_length
        {
            return Err(QueryError::ReasonLength {
                length: reason_len,
                min: self.limits.min_reason_length,
                max: self.limits.max_reason_length,
            });
        }
        let timeout_seconds = req
            .timeout_seconds
            .clamp(self.limits.min_timeout_secs, self.limits.max_timeout_secs);

        let kind = classify(&req.statement)?;
        let sql_sha256 = sha256_hex(req.statement.as_bytes());
        let attribution = SourceAttribution::extract(&req.statement);
        let execution_id = Uuid::new_v4().to_string();
        let session = self.profile.session.merged(&req.overrides);

        let template = EventTemplate {
            execution_id: execution_id.clone(),
            profile: self.profile.name.clone(),
            session: session.clone(),
            preview: statement_preview(&req.statement),
            sql_sha256: sql_sha256.clone(),
            timeout_seconds,
            reason: req.reason.clone(),
            source_databases: attribution.source_databases.clone(),
            tables: attribution.tables.clone(),
            request_id: req.request_id.clone(),
        };

        if let Err(denied) = self.policy.validate(kind) {
            // Denials leave exactly one trace: an error history entry.
            self.history.record(&template.event(
                QueryOutcome::Error,
                None,
                None,
                None,
                Some(format!("denied statement kind: {}", kind.as_str())),
            ));
            return Err(denied.into());
        }

        // ---- artifact, then cache lookup ------------------------------------
        if let Err(e) = self.artifacts.store(&req.statement) {
            warn!("Artifact write failed for {}: {}", sql_sha256, e);
        }

        let cache_key = CacheKey::compute(&self.profile.name, &session, &sql_sha256);
        if matches!(req.cache_mode, CacheMode::Enabled | CacheMode::ReadOnly) {
            if let Some((manifest, rows)) = self.cache.lookup(&cache_key) {
                // Attribution comes from the manifest, not recomputed.
                let mut hit_template = template.clone();
                hit_template.source_databases = manifest.source_databases.clone();
                hit_template.tables = manifest.tables.clone();
                self.history.record(&hit_template.event(
                    QueryOutcome::CacheHit,
                    Some(manifest.total_row_count),
                    Some(0),
                    manifest.query_id.clone(),
                    None,
                ));
                return Ok(QueryResponse::CacheHit {
                    execution_id,
                    cached_execution_id: manifest.execution_id.clone(),
                    query_id: manifest.query_id.clone(),
                    data: truncate_rows(&rows, &self.truncation),
                    source_databases: manifest.source_databases,
                    tables: manifest.tables,
                });
            }
        }

        // ---- submit ----------------------------------------------------------
        self.client
            .set_session_context(&session)
            .map_err(|e| self.record_warehouse_error(&template, None, e))?;

        let tag = QueryTag {
            reason: req.reason.clone(),
            execution_id: execution_id.clone(),
        };
        let query_id = self
            .client
            .submit(&req.statement, &tag)
            .map_err(|e| self.record_warehouse_error(&template, None, e))?;

        info!(
            "Submitted {} as {} (timeout {}s)",
            execution_id, query_id, timeout_seconds
        );

        // ---- inline wait -----------------------------------------------------
        let started = Instant::now();
        let timeout = Duration::from_secs(timeout_seconds);
        let inline_budget = timeout.min(
            self.timing
                .rpc_budget
                .saturating_sub(self.timing.safety_margin),
        );

        loop {
            if cancel.is_cancelled() {
                return Ok(self.handle_cancelled(&template, &query_id));
            }

            let status = self
                .client
                .poll(&query_id)
                .map_err(|e| self.record_warehouse_error(&template, Some(&query_id), e))?;

            match status {
                QueryStatus::Complete { .. } => {
                    let result = self.collect_success(
                        &template,
                        &query_id,
                        &cache_key,
                        req.cache_mode,
                        started,
                        &attribution,
                    )?;
                    return Ok(QueryResponse::Success { result });
                }
                QueryStatus::Failed { message } => {
                    self.history.record(&template.event(
                        QueryOutcome::Error,
                        None,
                        Some(started.elapsed().as_millis() as u64),
                        Some(query_id.0.clone()),
                        Some(message.clone()),
                    ));
                    return Err(QueryError::Execution {
                        query_id: Some(query_id.0.clone()),
                        message,
                    });
                }
                QueryStatus::Running => {
                    if started.elapsed() >= timeout {
                        return Ok(self.handle_timeout(&template, &query_id, timeout_seconds));
                    }
                    if started.elapsed() >= inline_budget {
                        self.spawn_async_poller(
                            template.clone(),
                            query_id.clone(),
                            cache_key.clone(),
                            req.cache_mode,
                            attribution.clone(),
                            started,
                            timeout,
                            cancel.clone(),
                        );
                        return Ok(QueryResponse::Pending {
                            execution_id: template.execution_id.clone(),
                            query_id: Some(query_id.0.clone()),
                            message: "Query is still running; poll fetch_async_query_result with \
                                      this execution_id"
                                .to_string(),
                        });
                    }
                    std::thread::sleep(self.timing.poll_interval);
                }
            }
        }
    }

    // ---- helpers -------------------------------------------------------------

    fn record_warehouse_error(
        &self,
        template: &EventTemplate,
        query_id: Option<&QueryId>,
        error: WarehouseError,
    ) -> QueryError {
        self.history.record(&template.event(
            QueryOutcome::Error,
            None,
            None,
            query_id.map(|q| q.0.clone()),
            Some(error.to_string()),
        ));
        QueryError::Warehouse(error)
    }

    fn handle_cancelled(&self, template: &EventTemplate, query_id: &QueryId) -> QueryResponse {
        let _ = self.client.cancel(query_id);
        self.history.record(&template.event(
            QueryOutcome::Timeout,
            None,
            None,
            Some(query_id.0.clone()),
            Some("cancelled".to_string()),
        ));
        QueryResponse::Cancelled {
            execution_id: template.execution_id.clone(),
            query_id: Some(query_id.0.clone()),
        }
    }

    fn handle_timeout(
        &self,
        template: &EventTemplate,
        query_id: &QueryId,
        timeout_seconds: u64,
    ) -> QueryResponse {
        let _ = self.client.cancel(query_id);
        self.history.record(&template.event(
            QueryOutcome::Timeout,
            None,
            Some(timeout_seconds * 1000),
            Some(query_id.0.clone()),
            None,
        ));
        QueryResponse::Timeout {
            execution_id: template.execution_id.clone(),
            query_id: Some(query_id.0.clone()),
            timeout_seconds,
            guidance: timeout_guidance(),
        }
    }

    fn collect_success(
        &self,
        template: &EventTemplate,
        query_id: &QueryId,
        cache_key: &CacheKey,
        cache_mode: CacheMode,
        started: Instant,
        attribution: &SourceAttribution,
    ) -> Result<QueryResultData, QueryError> {
        let rows = self
            .client
            .fetch(query_id)
            .map_err(|e| self.record_warehouse_error(template, Some(query_id), e))?;
        let duration_ms = started.elapsed().as_millis() as u64;

        self.history.record(&template.event(
            QueryOutcome::Success,
            Some(rows.row_count()),
            Some(duration_ms),
            Some(query_id.0.clone()),
            None,
        ));

        // Cache writes happen after the history entry.
        if matches!(cache_mode, CacheMode::Enabled | CacheMode::Refresh) {
            if let Err(e) = self.cache.write(
                cache_key,
                &template.execution_id,
                &template.profile,
                &template.session,
                &template.sql_sha256,
                &rows,
                &attribution.source_databases,
                &attribution.tables,
                Some(&query_id.0),
            ) {
                warn!("Cache write failed for {}: {}", cache_key.0, e);
            }
        }

        Ok(QueryResultData {
            execution_id: template.execution_id.clone(),
            query_id: Some(query_id.0.clone()),
            data: truncate_rows(&rows, &self.truncation),
            duration_ms,
            source_databases: attribution.source_databases.clone(),
            tables: attribution.tables.clone(),
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn spawn_async_poller(
        &self,
        template: EventTemplate,
        query_id: QueryId,
        cache_key: CacheKey,
        cache_mode: CacheMode,
        attribution: SourceAttribution,
        started: Instant,
        timeout: Duration,
        cancel: CancellationToken,
    ) {
        self.pending
            .insert_running(&template.execution_id, Some(query_id.0.clone()));

        let client = Arc::clone(&self.client);
        let history = Arc::clone(&self.history);
        let cache = self.cache.clone();
        let pending = self.pending.clone();
        let poll_interval = self.timing.poll_interval;
        let truncation = self.truncation;

        std::thread::spawn(move || {
            debug!("Async poller started for {}", template.execution_id);
            loop {
                if cancel.is_cancelled() {
                    let _ = client.cancel(&query_id);
                    history.record(&template.event(
                        QueryOutcome::Timeout,
                        None,
                        None,
                        Some(query_id.0.clone()),
                        Some("cancelled".to_string()),
                    ));
                    pending.set(
                        &template.execution_id,
                        AsyncState::Cancelled {
                            query_id: Some(query_id.0.clone()),
                        },
                    );
                    return;
                }

                match client.poll(&query_id) {
                    Ok(QueryStatus::Complete { .. }) => {
                        let rows = match client.fetch(&query_id) {
                            Ok(rows) => rows,
                            Err(e) => {
                                history.record(&template.event(
                                    QueryOutcome::Error,
                                    None,
                                    None,
                                    Some(query_id.0.clone()),
                                    Some(e.to_string()),
                                ));
                                pending.set(
                                    &template.execution_id,
                                    AsyncState::Error {
                                        query_id: Some(query_id.0.clone()),
                                        error: e.to_string(),
                                    },
                                );
                                return;
                            }
                        };
                        let duration_ms = started.elapsed().as_millis() as u64;
                        history.record(&template.event(
                            QueryOutcome::Success,
                            Some(rows.row_count()),
                            Some(duration_ms),
                            Some(query_id.0.clone()),
                            None,
                        ));
                        if matches!(cache_mode, CacheMode::Enabled | CacheMode::Refresh) {
                            if let Err(e) = cache.write(
                                &cache_key,
                                &template.execution_id,
                                &template.profile,
                                &template.session,
                                &template.sql_sha256,
                                &rows,
                                &attribution.source_databases,
                                &attribution.tables,
                                Some(&query_id.0),
                            ) {
                                warn!("Cache write failed for {}: {}", cache_key.0, e);
                            }
                        }
                        pending.set(
                            &template.execution_id,
                            AsyncState::Success {
                                result: QueryResultData {
                                    execution_id: template.execution_id.clone(),
                                    query_id: Some(query_id.0.clone()),
                                    data: truncate_rows(&rows, &truncation),
                                    duration_ms,
                                    source_databases: attribution.source_databases.clone(),
                                    tables: attribution.tables.clone(),
                                },
                            },
                        );
                        return;
                    }
                    Ok(QueryStatus::Failed { message }) => {
                        history.record(&template.event(
                            QueryOutcome::Error,
                            None,
                            Some(started.elapsed().as_millis() as u64),
                            Some(query_id.0.clone()),
                            Some(message.clone()),
                        ));
                        pending.set(
                            &template.execution_id,
                            AsyncState::Error {
                                query_id: Some(query_id.0.clone()),
                                error: message,
                            },
                        );
                        return;
                    }
                    Ok(QueryStatus::Running) => {
                        if started.elapsed() >= timeout {
                            let _ = client.cancel(&query_id);
                            history.record(&template.event(
                                QueryOutcome::Timeout,
                                None,
                                Some(timeout.as_millis() as u64),
                                Some(query_id.0.clone()),
                                None,
                            ));
                            pending.set(
                                &template.execution_id,
                                AsyncState::Timeout {
                                    query_id: Some(query_id.0.clone()),
                                    guidance: timeout_guidance(),
                                },
                            );
                            return;
                        }
                        std::thread::sleep(poll_interval);
                    }
                    Err(e) => {
                        history.record(&template.event(
                            QueryOutcome::Error,
                            None,
                            None,
                            Some(query_id.0.clone()),
                            Some(e.to_string()),
                        ));
                        pending.set(
                            &template.execution_id,
                            AsyncState::Error {
                                query_id: Some(query_id.0.clone()),
                                error: e.to_string(),
                            },
                        );
                        return;
                    }
                }
            }
        });
    }
}
