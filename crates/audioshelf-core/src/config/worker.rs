//! Operation scheduler configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Worker pool and progress reporting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of concurrent worker loops. Zero falls back to the default.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Persist/broadcast a progress update at least every N calls.
    #[serde(default = "default_progress_every_n")]
    pub progress_every_n: u32,
    /// Persist/broadcast a progress update at least this often, in milliseconds.
    #[serde(default = "default_progress_interval")]
    pub progress_interval_ms: u64,
    /// Attempts for the terminal status write before giving up.
    #[serde(default = "default_final_write_retries")]
    pub final_write_retries: u32,
    /// Base backoff between terminal status write attempts, in milliseconds.
    #[serde(default = "default_final_write_backoff")]
    pub final_write_backoff_ms: u64,
    /// How long shutdown waits for running operations, in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_seconds: u64,
    /// Auto-cancel operations that run longer than this, in seconds.
    #[serde(default)]
    pub default_timeout_seconds: Option<u64>,
}

impl WorkerConfig {
    /// Worker count with the zero guard applied.
    pub fn effective_concurrency(&self) -> usize {
        if self.concurrency == 0 {
            default_concurrency()
        } else {
            self.concurrency
        }
    }

    /// Minimum interval between flushed progress updates.
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    /// Shutdown wait as a [`Duration`].
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }

    /// Default auto-cancel timeout, if configured.
    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_seconds.map(Duration::from_secs)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            progress_every_n: default_progress_every_n(),
            progress_interval_ms: default_progress_interval(),
            final_write_retries: default_final_write_retries(),
            final_write_backoff_ms: default_final_write_backoff(),
            shutdown_timeout_seconds: default_shutdown_timeout(),
            default_timeout_seconds: None,
        }
    }
}

/// Retention of finished operation records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Whether the periodic prune is scheduled.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Six-field cron expression (seconds first).
    #[serde(default = "default_schedule")]
    pub schedule: String,
    /// Terminal operations older than this many days are removed.
    #[serde(default = "default_keep_days")]
    pub keep_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            schedule: default_schedule(),
            keep_days: default_keep_days(),
        }
    }
}

fn default_concurrency() -> usize {
    2
}

fn default_progress_every_n() -> u32 {
    10
}

fn default_progress_interval() -> u64 {
    500
}

fn default_final_write_retries() -> u32 {
    3
}

fn default_final_write_backoff() -> u64 {
    100
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_schedule() -> String {
    "0 0 3 * * *".to_string()
}

fn default_keep_days() -> u32 {
    30
}
