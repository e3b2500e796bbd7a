//! Operation event wire shapes.

use serde::{Deserialize, Serialize};

use audioshelf_entity::operation::model::percentage;
use audioshelf_entity::operation::{LogLevel, OperationStatus};

/// One real-time event about an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OperationEvent {
    /// Progress moved forward.
    #[serde(rename = "operation:progress")]
    Progress {
        operation_id: String,
        current: i64,
        total: i64,
        message: String,
        percentage: u8,
    },
    /// The operation changed status.
    #[serde(rename = "operation:status")]
    Status {
        operation_id: String,
        status: OperationStatus,
        details: StatusDetails,
    },
    /// A log line was appended.
    #[serde(rename = "operation:log")]
    Log {
        operation_id: String,
        level: LogLevel,
        message: String,
        details: Option<String>,
    },
}

/// Payload attached to a status event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatusDetails {
    /// Final progress of a completed operation.
    Progress {
        current: i64,
        total: i64,
        message: String,
    },
    /// Error of a failed operation.
    Error { error: String },
    /// Free-form message for the other transitions.
    Message { message: String },
}

impl OperationEvent {
    /// Build a progress event, deriving the percentage.
    pub fn progress(operation_id: &str, current: i64, total: i64, message: &str) -> Self {
        Self::Progress {
            operation_id: operation_id.to_string(),
            current,
            total,
            message: message.to_string(),
            percentage: percentage(current, total),
        }
    }

    /// Build a status event.
    pub fn status(operation_id: &str, status: OperationStatus, details: StatusDetails) -> Self {
        Self::Status {
            operation_id: operation_id.to_string(),
            status,
            details,
        }
    }

    /// Build a log event.
    pub fn log(operation_id: &str, level: LogLevel, message: &str, details: Option<&str>) -> Self {
        Self::Log {
            operation_id: operation_id.to_string(),
            level,
            message: message.to_string(),
            details: details.map(str::to_string),
        }
    }

    /// The operation this event is about.
    pub fn operation_id(&self) -> &str {
        match self {
            Self::Progress { operation_id, .. }
            | Self::Status { operation_id, .. }
            | Self::Log { operation_id, .. } => operation_id,
        }
    }

    /// The value of the `type` tag.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Progress { .. } => "operation:progress",
            Self::Status { .. } => "operation:status",
            Self::Log { .. } => "operation:log",
        }
    }
}
