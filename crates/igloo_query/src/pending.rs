//! Registry of executions that outlived their inline budget.
//!
//! When a query is still running at the end of its inline wait, the
//! scheduler parks it here and a background thread keeps polling. The
//! `fetch_async_query_result` tool reads the registry. Terminal entries
//! are retained for the life of the process; history is the durable
//! record.

use crate::service::QueryResultData;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Where an async execution currently stands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AsyncState {
    Running {
        #[serde(skip_serializing_if = "Option::is_none")]
        query_id: Option<String>,
    },
    Success {
        result: QueryResultData,
    },
    Timeout {
        #[serde(skip_serializing_if = "Option::is_none")]
        query_id: Option<String>,
        guidance: Vec<String>,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        query_id: Option<String>,
        error: String,
    },
    Cancelled {
        #[serde(skip_serializing_if = "Option::is_none")]
        query_id: Option<String>,
    },
}

/// Shared map execution_id → state. Clone shares the underlying map.
#[derive(Debug, Clone, Default)]
pub struct PendingExecutions {
    inner: Arc<Mutex<HashMap<String, AsyncState>>>,
}

impl PendingExecutions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_running(&self, execution_id: &str, query_id: Option<String>) {
        self.inner
            .lock()
            .unwrap()
            .insert(execution_id.to_string(), AsyncState::Running { query_id });
    }

    pub fn set(&self, execution_id: &str, state: AsyncState) {
        self.inner
            .lock()
            .unwrap()
            .insert(execution_id.to_string(), state);
    }

    pub fn get(&self, execution_id: &str) -> Option<AsyncState> {
        self.inner.lock().unwrap().get(execution_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }
}
