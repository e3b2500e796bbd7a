//! The handle operation bodies use to talk to the outside world.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use audioshelf_core::error::ErrorKind;
use audioshelf_database::store::OperationStore;
use audioshelf_entity::operation::LogLevel;
use audioshelf_realtime::{EventBroadcaster, OperationEvent};

use crate::checkpoint::OperationState;

/// Progress, logging and cancellation for a running operation.
///
/// Reporting never fails from the body's point of view: collaborator
/// errors are logged and swallowed.
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    /// Id of the operation this reporter is bound to.
    fn operation_id(&self) -> &str;

    /// Report `current` of `total` items done. A total of zero means unknown.
    async fn update_progress(&self, current: i64, total: i64, message: &str);

    /// Append a log line to the operation.
    async fn log(&self, level: LogLevel, message: &str, details: Option<&str>);

    /// Whether cancellation has been requested. Never blocks.
    fn is_canceled(&self) -> bool;

    /// Token that is cancelled together with the flag.
    fn cancellation_token(&self) -> CancellationToken;

    /// Checkpoint and parameter storage for this operation.
    fn state(&self) -> OperationState;

    /// Shorthand for an `info` line without details.
    async fn info(&self, message: &str) {
        self.log(LogLevel::Info, message, None).await;
    }

    /// Shorthand for a `warn` line without details.
    async fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message, None).await;
    }
}

/// Throttling policy for progress writes.
#[derive(Debug, Clone, Copy)]
pub struct ThrottlePolicy {
    /// Flush at least every this many calls.
    pub every_n: u32,
    /// Flush when this much time passed since the last flush.
    pub interval: Duration,
}

#[derive(Debug, Default)]
struct ProgressState {
    current: i64,
    total: i64,
    message: String,
    pending_calls: u32,
    dirty: bool,
    last_flush: Option<Instant>,
}

/// Latest progress seen by a reporter.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProgressSnapshot {
    pub current: i64,
    pub total: i64,
    pub message: String,
}

/// [`ProgressReporter`] bound to one operation.
#[derive(Debug)]
pub struct OperationReporter {
    operation_id: String,
    operation_type: String,
    store: Arc<dyn OperationStore>,
    broadcaster: Arc<dyn EventBroadcaster>,
    token: CancellationToken,
    policy: ThrottlePolicy,
    progress: Mutex<ProgressState>,
}

impl OperationReporter {
    pub fn new(
        operation_id: impl Into<String>,
        operation_type: impl Into<String>,
        store: Arc<dyn OperationStore>,
        broadcaster: Arc<dyn EventBroadcaster>,
        token: CancellationToken,
        policy: ThrottlePolicy,
    ) -> Self {
        Self {
            operation_id: operation_id.into(),
            operation_type: operation_type.into(),
            store,
            broadcaster,
            token,
            policy,
            progress: Mutex::new(ProgressState::default()),
        }
    }

    /// Write out the latest progress if a throttled update is outstanding.
    pub async fn flush(&self) {
        let mut state = self.progress.lock().await;
        if state.dirty {
            self.write_progress(&mut state).await;
        }
    }

    /// Latest progress values, flushed or not.
    pub async fn snapshot(&self) -> ProgressSnapshot {
        let state = self.progress.lock().await;
        ProgressSnapshot {
            current: state.current,
            total: state.total,
            message: state.message.clone(),
        }
    }

    async fn write_progress(&self, state: &mut ProgressState) {
        state.dirty = false;
        state.pending_calls = 0;
        state.last_flush = Some(Instant::now());

        if let Err(e) = self
            .store
            .update_operation_progress(&self.operation_id, state.current, state.total, &state.message)
            .await
        {
            warn!(
                operation_id = %self.operation_id,
                error = %e,
                "Failed to persist operation progress"
            );
        }

        let event =
            OperationEvent::progress(&self.operation_id, state.current, state.total, &state.message);
        if let Err(e) = self.broadcaster.publish(event) {
            warn!(
                operation_id = %self.operation_id,
                error = %e,
                "Failed to broadcast operation progress"
            );
        }
    }
}

#[async_trait]
impl ProgressReporter for OperationReporter {
    fn operation_id(&self) -> &str {
        &self.operation_id
    }

    async fn update_progress(&self, current: i64, total: i64, message: &str) {
        let total = total.max(0);
        let mut current = current.max(0);

        let mut state = self.progress.lock().await;
        // Same total means same phase: progress only moves forward.
        if total == state.total && current < state.current {
            current = state.current;
        }
        state.current = current;
        state.total = total;
        state.message = message.to_string();
        state.dirty = true;
        state.pending_calls += 1;

        let due = match state.last_flush {
            None => true,
            Some(at) => {
                state.pending_calls >= self.policy.every_n.max(1)
                    || at.elapsed() >= self.policy.interval
                    || (total > 0 && current >= total)
            }
        };
        if due {
            self.write_progress(&mut state).await;
        }
    }

    async fn log(&self, level: LogLevel, message: &str, details: Option<&str>) {
        match self
            .store
            .add_operation_log(&self.operation_id, level, message, details)
            .await
        {
            Ok(_) => {
                let event = OperationEvent::log(&self.operation_id, level, message, details);
                if let Err(e) = self.broadcaster.publish(event) {
                    warn!(
                        operation_id = %self.operation_id,
                        error = %e,
                        "Failed to broadcast operation log"
                    );
                }
            }
            Err(e) if e.is(ErrorKind::Conflict) => {
                debug!(
                    operation_id = %self.operation_id,
                    "Dropping log line for finished operation"
                );
            }
            Err(e) => {
                warn!(
                    operation_id = %self.operation_id,
                    error = %e,
                    "Failed to persist operation log"
                );
            }
        }
    }

    fn is_canceled(&self) -> bool {
        self.token.is_cancelled()
    }

    fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    fn state(&self) -> OperationState {
        OperationState::new(
            Arc::clone(&self.store),
            self.operation_id.clone(),
            self.operation_type.clone(),
        )
    }
}
