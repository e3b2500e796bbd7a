//! Per-operation-type execution counters.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Counters for one operation type.
#[derive(Debug, Default)]
struct TypeCounters {
    started: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    canceled: AtomicU64,
    run_millis: AtomicU64,
}

/// Execution metrics keyed by operation type.
#[derive(Debug, Default)]
pub struct OperationMetrics {
    by_type: DashMap<String, TypeCounters>,
}

/// How an operation ended, for counting purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed,
    Canceled,
}

impl OperationMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// A worker began executing an operation.
    pub fn record_started(&self, operation_type: &str) {
        self.by_type
            .entry(operation_type.to_string())
            .or_default()
            .started
            .fetch_add(1, Ordering::Relaxed);
    }

    /// An operation reached a terminal status after running for `elapsed`.
    pub fn record_finished(&self, operation_type: &str, outcome: Outcome, elapsed: Duration) {
        let counters = self.by_type.entry(operation_type.to_string()).or_default();
        let counter = match outcome {
            Outcome::Completed => &counters.completed,
            Outcome::Failed => &counters.failed,
            Outcome::Canceled => &counters.canceled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        counters
            .run_millis
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
    }

    /// Get a snapshot of all counters, sorted by type.
    pub fn snapshot(&self) -> BTreeMap<String, TypeMetricsSnapshot> {
        self.by_type
            .iter()
            .map(|entry| {
                let c = entry.value();
                (
                    entry.key().clone(),
                    TypeMetricsSnapshot {
                        started: c.started.load(Ordering::Relaxed),
                        completed: c.completed.load(Ordering::Relaxed),
                        failed: c.failed.load(Ordering::Relaxed),
                        canceled: c.canceled.load(Ordering::Relaxed),
                        total_run_ms: c.run_millis.load(Ordering::Relaxed),
                    },
                )
            })
            .collect()
    }
}

/// Serializable counters for one operation type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TypeMetricsSnapshot {
    pub started: u64,
    pub completed: u64,
    pub failed: u64,
    pub canceled: u64,
    /// Cumulative wall-clock run time in milliseconds.
    pub total_run_ms: u64,
}
