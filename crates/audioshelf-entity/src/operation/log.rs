//! Per-operation log lines.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Severity of an operation log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "operation_log_level", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Return the level as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One persisted log line.
///
/// `sequence` is assigned by the store and strictly increases per
/// operation, so it doubles as the ordering key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct OperationLog {
    pub operation_id: String,
    pub sequence: i64,
    pub level: LogLevel,
    pub message: String,
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
}
