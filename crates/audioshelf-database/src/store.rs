//! The operation store contract.
//!
//! The scheduler only ever talks to persistence through [`OperationStore`],
//! so the in-memory and PostgreSQL backends are interchangeable.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use audioshelf_core::result::AppResult;
use audioshelf_entity::operation::{
    LogLevel, NewOperation, Operation, OperationLog, StatusChange,
};

/// Kind of auxiliary JSON state kept next to an operation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateKind {
    /// Resumable progress checkpoint.
    Checkpoint,
    /// Immutable parameters the operation was started with.
    Params,
}

impl StateKind {
    /// Return the kind as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Checkpoint => "checkpoint",
            Self::Params => "params",
        }
    }
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable persistence for operation records, logs and auxiliary state.
///
/// Implementations must be safe for concurrent use from every worker
/// without caller-side locking.
#[async_trait]
pub trait OperationStore: Send + Sync + fmt::Debug {
    /// Insert a new `pending` record.
    ///
    /// A live record with the same id is a `Conflict`. A terminal record
    /// with the same id is replaced, and its logs and state are discarded.
    async fn create_operation(&self, new: &NewOperation) -> AppResult<Operation>;

    /// Fetch a record by id.
    async fn get_operation(&self, id: &str) -> AppResult<Option<Operation>>;

    /// The most recently created records, newest first.
    async fn recent_operations(&self, limit: u32) -> AppResult<Vec<Operation>>;

    /// Records still `pending` or `running`.
    async fn unfinished_operations(&self) -> AppResult<Vec<Operation>>;

    /// Apply a status transition.
    ///
    /// Illegal transitions (including anything out of a terminal status)
    /// are rejected with `Conflict` and leave the record untouched.
    async fn update_operation_status(&self, id: &str, change: &StatusChange)
    -> AppResult<Operation>;

    /// Overwrite the progress fields of a live record.
    async fn update_operation_progress(
        &self,
        id: &str,
        current: i64,
        total: i64,
        message: &str,
    ) -> AppResult<()>;

    /// Append a log line, assigning the next sequence number.
    async fn add_operation_log(
        &self,
        id: &str,
        level: LogLevel,
        message: &str,
        details: Option<&str>,
    ) -> AppResult<OperationLog>;

    /// Log lines in sequence order, optionally only the last `tail` lines.
    async fn get_operation_logs(&self, id: &str, tail: Option<u64>)
    -> AppResult<Vec<OperationLog>>;

    /// Store a JSON state blob, replacing any previous value of that kind.
    async fn put_operation_state(
        &self,
        id: &str,
        kind: StateKind,
        value: &serde_json::Value,
    ) -> AppResult<()>;

    /// Fetch a JSON state blob.
    async fn get_operation_state(
        &self,
        id: &str,
        kind: StateKind,
    ) -> AppResult<Option<serde_json::Value>>;

    /// Remove a JSON state blob. Missing state is not an error.
    async fn delete_operation_state(&self, id: &str, kind: StateKind) -> AppResult<()>;

    /// Remove terminal records completed before `cutoff`, along with their
    /// logs and state. Returns the number of records removed.
    async fn delete_operations_before(&self, cutoff: DateTime<Utc>) -> AppResult<u64>;
}
