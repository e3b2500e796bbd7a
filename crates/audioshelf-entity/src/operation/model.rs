//! Operation entity model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::status::{OperationPriority, OperationStatus};

/// The durable record of one unit of background work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Operation {
    /// Unique operation identifier.
    pub id: String,
    /// Operation type tag (e.g. `"scan"`, `"organize"`, `"itunes_import"`).
    #[serde(rename = "type")]
    pub operation_type: String,
    /// Scheduling priority.
    pub priority: OperationPriority,
    /// Current lifecycle status.
    pub status: OperationStatus,
    /// Items processed so far. Never negative.
    pub progress_current: i64,
    /// Total items; zero means the total is not known yet.
    pub progress_total: i64,
    /// Latest human-readable status string.
    pub message: String,
    /// Error message, set only when the status is `failed`.
    pub error: Option<String>,
    /// Optional display-only description of the target (e.g. a folder path).
    pub subject: Option<String>,
    /// When the operation was enqueued.
    pub created_at: DateTime<Utc>,
    /// When a worker picked the operation up.
    pub started_at: Option<DateTime<Utc>>,
    /// When the operation reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Operation {
    /// Build the initial `pending` record for a new operation.
    pub fn pending(new: &NewOperation, now: DateTime<Utc>) -> Self {
        Self {
            id: new.id.clone(),
            operation_type: new.operation_type.clone(),
            priority: new.priority,
            status: OperationStatus::Pending,
            progress_current: 0,
            progress_total: 0,
            message: "operation queued".to_string(),
            error: None,
            subject: new.subject.clone(),
            created_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Completion percentage in `0..=100`; zero while the total is unknown.
    pub fn percentage(&self) -> u8 {
        percentage(self.progress_current, self.progress_total)
    }

    /// Apply a status change to this record in place.
    pub fn apply(&mut self, change: &StatusChange) {
        self.status = change.status();
        match change {
            StatusChange::Running { started_at } => {
                self.started_at = Some(*started_at);
                self.message = "operation started".to_string();
            }
            StatusChange::Completed {
                completed_at,
                message,
            }
            | StatusChange::Canceled {
                completed_at,
                message,
            } => {
                self.completed_at = Some(*completed_at);
                self.message = message.clone();
            }
            StatusChange::Failed {
                completed_at,
                error,
            } => {
                self.completed_at = Some(*completed_at);
                self.error = Some(error.clone());
                self.message = "operation failed".to_string();
            }
        }
    }
}

/// Percentage helper shared by records and progress events.
pub fn percentage(current: i64, total: i64) -> u8 {
    if total <= 0 || current <= 0 {
        return 0;
    }
    ((current.saturating_mul(100)) / total).min(100) as u8
}

/// Data required to create a new operation record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOperation {
    /// Operation identifier.
    pub id: String,
    /// Operation type tag.
    pub operation_type: String,
    /// Priority.
    pub priority: OperationPriority,
    /// Optional target description.
    pub subject: Option<String>,
}

/// A status transition together with the fields it sets.
///
/// Terminal fields are carried by the terminal variants only, so they are
/// written in the same store call as the final status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum StatusChange {
    /// A worker picked the operation up.
    Running {
        /// Start time.
        started_at: DateTime<Utc>,
    },
    /// The body finished successfully.
    Completed {
        /// Finish time.
        completed_at: DateTime<Utc>,
        /// Final status message.
        message: String,
    },
    /// The body returned an error or panicked.
    Failed {
        /// Finish time.
        completed_at: DateTime<Utc>,
        /// Error message.
        error: String,
    },
    /// Canceled before or during execution.
    Canceled {
        /// Finish time.
        completed_at: DateTime<Utc>,
        /// Final status message.
        message: String,
    },
}

impl StatusChange {
    /// The status this change moves to.
    pub fn status(&self) -> OperationStatus {
        match self {
            Self::Running { .. } => OperationStatus::Running,
            Self::Completed { .. } => OperationStatus::Completed,
            Self::Failed { .. } => OperationStatus::Failed,
            Self::Canceled { .. } => OperationStatus::Canceled,
        }
    }
}

/// Lightweight view of an operation that is still queued or running.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveOperation {
    /// Operation identifier.
    pub id: String,
    /// Operation type tag.
    #[serde(rename = "type")]
    pub operation_type: String,
    /// Priority.
    pub priority: OperationPriority,
    /// `pending` or `running`.
    pub status: OperationStatus,
    /// When the operation was enqueued.
    pub enqueued_at: DateTime<Utc>,
}
