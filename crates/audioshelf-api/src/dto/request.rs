//! Query-string DTOs.

use serde::Deserialize;

/// Upper bound for `GET /api/operations?limit=`.
pub const MAX_LIST_LIMIT: u32 = 500;

fn default_limit() -> u32 {
    50
}

/// `GET /api/operations` query.
#[derive(Debug, Clone, Deserialize)]
pub struct ListQuery {
    /// Maximum number of records, newest first.
    #[serde(default = "default_limit")]
    pub limit: u32,
}

impl ListQuery {
    /// Limit clamped to `1..=MAX_LIST_LIMIT`.
    pub fn effective_limit(&self) -> u32 {
        self.limit.clamp(1, MAX_LIST_LIMIT)
    }
}

/// `GET /api/operations/{id}/logs` query.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogsQuery {
    /// Return only the last `tail` lines.
    pub tail: Option<u64>,
}

/// `GET /api/events` query.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventsQuery {
    /// Restrict the stream to one operation.
    pub operation: Option<String>,
}

/// `POST /api/operations/prune` query.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PruneQuery {
    /// Override `retention.keep_days` for this run.
    pub keep_days: Option<u32>,
}
