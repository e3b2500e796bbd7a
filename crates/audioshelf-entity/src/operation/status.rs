//! Operation status and priority enumerations.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use audioshelf_core::error::AppError;

/// Lifecycle status of an operation.
///
/// Transitions are one-directional:
/// `pending -> running -> {completed | failed | canceled}` and
/// `pending -> canceled`. Terminal statuses are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "operation_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    /// Waiting in the queue for a worker.
    Pending,
    /// Currently executing on a worker.
    Running,
    /// The body returned successfully.
    Completed,
    /// The body returned an error or panicked.
    Failed,
    /// Canceled before or during execution.
    Canceled,
}

impl OperationStatus {
    /// Check if the status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(&self, next: OperationStatus) -> bool {
        match (self, next) {
            (Self::Pending, Self::Running) => true,
            (Self::Pending, Self::Canceled) => true,
            // A record stranded by a previous process is closed as failed.
            (Self::Pending, Self::Failed) => true,
            (Self::Running, next) => next.is_terminal(),
            _ => false,
        }
    }

    /// Return the status as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OperationStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "canceled" => Ok(Self::Canceled),
            other => Err(AppError::validation(format!(
                "unknown operation status '{other}'"
            ))),
        }
    }
}

/// Scheduling priority of an operation.
///
/// Ordering follows urgency: `Low < Normal < High`.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    sqlx::Type,
)]
#[sqlx(type_name = "operation_priority", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OperationPriority {
    /// Background work, picked up last.
    Low,
    /// Default for user-triggered work.
    #[default]
    Normal,
    /// Picked up before everything else.
    High,
}

impl OperationPriority {
    /// Return the numeric priority (higher = more urgent).
    pub fn numeric_priority(&self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Normal => 1,
            Self::High => 2,
        }
    }

    /// Return the priority as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
        }
    }
}

impl fmt::Display for OperationPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i32> for OperationPriority {
    type Error = AppError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Low),
            1 => Ok(Self::Normal),
            2 => Ok(Self::High),
            other => Err(AppError::validation(format!(
                "invalid operation priority {other}"
            ))),
        }
    }
}

impl FromStr for OperationPriority {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            other => Err(AppError::validation(format!(
                "invalid operation priority '{other}'"
            ))),
        }
    }
}
