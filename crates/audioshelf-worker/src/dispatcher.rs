//! The scheduler façade.
//!
//! A [`Dispatcher`] is built once at startup and handed to everything that
//! needs to enqueue or inspect background work. Cloning it is cheap.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use audioshelf_core::config::WorkerConfig;
use audioshelf_core::error::{AppError, ErrorKind};
use audioshelf_core::result::AppResult;
use audioshelf_core::types::OperationId;
use audioshelf_database::store::OperationStore;
use audioshelf_entity::operation::{
    ActiveOperation, NewOperation, Operation, OperationLog, OperationPriority, StatusChange,
};
use audioshelf_realtime::{EventBroadcaster, OperationEvent, StatusDetails};

use crate::checkpoint::OperationState;
use crate::command::Command;
use crate::metrics::{OperationMetrics, Outcome, TypeMetricsSnapshot};
use crate::queue::PriorityQueue;
use crate::registry::{LiveOperation, Registry};
use crate::runner;

/// Per-call enqueue settings.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Auto-cancel the operation once it has run this long. Falls back to
    /// the configured default.
    pub timeout: Option<Duration>,
}

/// State shared between the dispatcher handle and its workers.
#[derive(Debug)]
pub(crate) struct DispatcherShared {
    pub(crate) store: Arc<dyn OperationStore>,
    pub(crate) broadcaster: Arc<dyn EventBroadcaster>,
    pub(crate) config: WorkerConfig,
    pub(crate) queue: PriorityQueue,
    pub(crate) registry: Registry,
    pub(crate) metrics: OperationMetrics,
    /// Serializes enqueue, cancel and shutdown against each other.
    admission: tokio::sync::Mutex<()>,
    root_token: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

/// Bounded-concurrency scheduler for background operations.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    shared: Arc<DispatcherShared>,
}

impl Dispatcher {
    /// Create the dispatcher and start its worker loops.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        store: Arc<dyn OperationStore>,
        broadcaster: Arc<dyn EventBroadcaster>,
        config: WorkerConfig,
    ) -> Self {
        let concurrency = config.effective_concurrency();
        let shared = Arc::new(DispatcherShared {
            store,
            broadcaster,
            config,
            queue: PriorityQueue::new(),
            registry: Registry::new(),
            metrics: OperationMetrics::new(),
            admission: tokio::sync::Mutex::new(()),
            root_token: CancellationToken::new(),
            workers: Mutex::new(Vec::new()),
        });

        let handles = runner::spawn_workers(&shared, concurrency);
        shared
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(handles);

        info!("Operation dispatcher started with {} workers", concurrency);
        Self { shared }
    }

    /// Enqueue an operation with default options.
    pub async fn enqueue(
        &self,
        id: impl Into<String>,
        priority: OperationPriority,
        command: Arc<dyn Command>,
    ) -> AppResult<Operation> {
        self.enqueue_with_options(id, priority, command, EnqueueOptions::default())
            .await
    }

    /// Record a new `pending` operation and queue it for a worker.
    ///
    /// Fails with `Conflict` while an operation with the same id is queued
    /// or running. An id whose previous operation finished starts fresh.
    pub async fn enqueue_with_options(
        &self,
        id: impl Into<String>,
        priority: OperationPriority,
        command: Arc<dyn Command>,
        options: EnqueueOptions,
    ) -> AppResult<Operation> {
        let id = OperationId::parse(id)?.into_string();
        let shared = &self.shared;

        let _admission = shared.admission.lock().await;
        if shared.queue.is_closed() {
            return Err(AppError::service_unavailable(
                "dispatcher is shutting down, not accepting operations",
            ));
        }
        if shared.registry.is_live(&id) {
            return Err(AppError::conflict(format!(
                "operation '{id}' is already queued or running"
            )));
        }

        let record = shared
            .store
            .create_operation(&NewOperation {
                id: id.clone(),
                operation_type: command.operation_type().to_string(),
                priority,
                subject: command.subject(),
            })
            .await?;

        let timeout = options.timeout.or_else(|| shared.config.default_timeout());
        let live = Arc::new(LiveOperation::new(
            id.clone(),
            priority,
            command,
            shared.root_token.child_token(),
            timeout,
        ));
        shared.registry.insert(Arc::clone(&live))?;

        if let Err(e) = shared.queue.push(&id, priority) {
            live.try_cancel_pending();
            shared
                .finalize(
                    &live,
                    StatusChange::Canceled {
                        completed_at: Utc::now(),
                        message: "operation could not be queued".to_string(),
                    },
                    None,
                )
                .await;
            return Err(e);
        }

        debug!(
            operation_id = %id,
            operation_type = %record.operation_type,
            priority = %priority,
            "Operation enqueued"
        );
        Ok(record)
    }

    /// Request cancellation.
    ///
    /// A queued operation is removed and finalized as `canceled` without
    /// running. A running one is flagged and its token cancelled; the body
    /// stops at its next checkpoint.
    pub async fn cancel(&self, id: &str) -> AppResult<()> {
        self.shared.cancel(id).await
    }

    /// Current record for `id`.
    pub async fn status(&self, id: &str) -> AppResult<Option<Operation>> {
        self.shared.store.get_operation(id).await
    }

    /// Log lines for `id`, optionally only the last `tail`.
    pub async fn logs(&self, id: &str, tail: Option<u64>) -> AppResult<Vec<OperationLog>> {
        self.shared.store.get_operation_logs(id, tail).await
    }

    /// Most recent records, newest first.
    pub async fn recent(&self, limit: u32) -> AppResult<Vec<Operation>> {
        self.shared.store.recent_operations(limit).await
    }

    /// Everything currently queued or running.
    pub fn active_operations(&self) -> Vec<ActiveOperation> {
        self.shared.registry.snapshot()
    }

    /// Execution counters per operation type.
    pub fn metrics(&self) -> BTreeMap<String, TypeMetricsSnapshot> {
        self.shared.metrics.snapshot()
    }

    /// Number of operations waiting for a worker.
    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }

    /// Whether the dispatcher still accepts work.
    pub fn is_accepting(&self) -> bool {
        !self.shared.queue.is_closed()
    }

    /// The store backing this dispatcher.
    pub fn store(&self) -> Arc<dyn OperationStore> {
        Arc::clone(&self.shared.store)
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> &Arc<DispatcherShared> {
        &self.shared
    }

    /// Close out records left `pending` or `running` by a previous process.
    ///
    /// Execution is at-most-once, so such records are marked `failed` and
    /// their checkpoints flipped to `interrupted`. Returns how many were
    /// recovered.
    pub async fn recover_interrupted(&self) -> AppResult<usize> {
        let shared = &self.shared;
        let stale = shared.store.unfinished_operations().await?;
        let mut recovered = 0;

        for operation in stale {
            if shared.registry.get(&operation.id).is_some() {
                continue;
            }
            let change = StatusChange::Failed {
                completed_at: Utc::now(),
                error: "interrupted by restart".to_string(),
            };
            if let Err(e) = shared.store.update_operation_status(&operation.id, &change).await {
                warn!(operation_id = %operation.id, error = %e, "Failed to recover operation");
                continue;
            }

            let state = OperationState::new(
                Arc::clone(&shared.store),
                operation.id.clone(),
                operation.operation_type.clone(),
            );
            if let Err(e) = state.mark_interrupted().await {
                warn!(operation_id = %operation.id, error = %e, "Failed to mark checkpoint interrupted");
            }

            shared.publish(OperationEvent::status(
                &operation.id,
                change.status(),
                StatusDetails::Error {
                    error: "interrupted by restart".to_string(),
                },
            ));
            recovered += 1;
        }

        if recovered > 0 {
            info!("Recovered {} interrupted operations", recovered);
        }
        Ok(recovered)
    }

    /// Stop accepting work, cancel everything, and wait for the workers.
    ///
    /// Queued operations are finalized as `canceled`; running ones are asked
    /// to stop. Fails if the workers do not exit within `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> AppResult<()> {
        let shared = &self.shared;
        {
            let _admission = shared.admission.lock().await;
            if shared.queue.is_closed() {
                return Ok(());
            }
            info!("Operation dispatcher shutting down");

            for id in shared.queue.close() {
                let Some(live) = shared.registry.get(&id) else {
                    continue;
                };
                live.request_cancel();
                if live.try_cancel_pending() {
                    shared
                        .finalize(
                            &live,
                            StatusChange::Canceled {
                                completed_at: Utc::now(),
                                message: "canceled by shutdown".to_string(),
                            },
                            None,
                        )
                        .await;
                }
            }

            for live in shared.registry.all() {
                live.request_cancel();
            }
            shared.root_token.cancel();
        }

        let handles: Vec<JoinHandle<()>> = shared
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();

        match tokio::time::timeout(timeout, futures::future::join_all(handles)).await {
            Ok(_) => {
                info!("Operation dispatcher stopped");
                Ok(())
            }
            Err(_) => {
                error!(
                    still_running = shared.registry.len(),
                    "Timed out waiting for running operations"
                );
                Err(AppError::internal(format!(
                    "timed out after {}s waiting for running operations",
                    timeout.as_secs()
                )))
            }
        }
    }
}

impl DispatcherShared {
    async fn cancel(&self, id: &str) -> AppResult<()> {
        let _admission = self.admission.lock().await;

        let live = match self.registry.get(id) {
            Some(live) if live.is_finished() => {
                return Err(AppError::conflict(format!("operation '{id}' is finishing")));
            }
            Some(live) => live,
            None => {
                // No live entry: either settled, or its terminal write never landed.
                return match self.store.get_operation(id).await? {
                    Some(op) if op.status.is_terminal() => Err(AppError::conflict(format!(
                        "operation '{id}' is already {}",
                        op.status
                    ))),
                    Some(_) => Err(AppError::conflict(format!("operation '{id}' is finishing"))),
                    None => Err(AppError::not_found(format!("operation '{id}' not found"))),
                };
            }
        };

        live.request_cancel();
        if live.try_cancel_pending() {
            self.queue.remove(id);
            info!(operation_id = %id, "Canceled queued operation");
            self.finalize(
                &live,
                StatusChange::Canceled {
                    completed_at: Utc::now(),
                    message: "canceled before start".to_string(),
                },
                None,
            )
            .await;
        } else {
            info!(operation_id = %id, "Cancellation requested for running operation");
        }
        Ok(())
    }

    /// Write a status change, retrying transient store failures.
    ///
    /// `Conflict` and `NotFound` are final and returned immediately.
    pub(crate) async fn persist_status(
        &self,
        id: &str,
        change: &StatusChange,
    ) -> AppResult<Operation> {
        let attempts = self.config.final_write_retries.max(1);
        let mut attempt = 1;
        loop {
            match self.store.update_operation_status(id, change).await {
                Ok(op) => return Ok(op),
                Err(e) if e.is(ErrorKind::Conflict) || e.is(ErrorKind::NotFound) => return Err(e),
                Err(e) if attempt >= attempts => return Err(e),
                Err(e) => {
                    warn!(
                        operation_id = %id,
                        attempt,
                        error = %e,
                        "Status write failed, retrying"
                    );
                    let backoff = self.config.final_write_backoff_ms * u64::from(attempt);
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Record the terminal transition, then notify and release the entry.
    pub(crate) async fn finalize(
        &self,
        live: &Arc<LiveOperation>,
        change: StatusChange,
        elapsed: Option<Duration>,
    ) {
        live.mark_finished();

        match self.persist_status(&live.id, &change).await {
            Ok(op) => {
                info!(
                    "Operation {} finished: type='{}', status={}",
                    op.id, op.operation_type, op.status
                );
                let details = match &change {
                    StatusChange::Completed { message, .. } => StatusDetails::Progress {
                        current: op.progress_current,
                        total: op.progress_total,
                        message: message.clone(),
                    },
                    StatusChange::Failed { error, .. } => StatusDetails::Error {
                        error: error.clone(),
                    },
                    StatusChange::Canceled { message, .. } => StatusDetails::Message {
                        message: message.clone(),
                    },
                    StatusChange::Running { .. } => StatusDetails::Message {
                        message: op.message.clone(),
                    },
                };
                self.publish(OperationEvent::status(&live.id, op.status, details));

                if matches!(
                    change,
                    StatusChange::Completed { .. } | StatusChange::Failed { .. }
                ) {
                    let state = OperationState::new(
                        Arc::clone(&self.store),
                        live.id.clone(),
                        live.operation_type.clone(),
                    );
                    if let Err(e) = state.clear().await {
                        warn!(operation_id = %live.id, error = %e, "Failed to clear operation state");
                    }
                }
            }
            Err(e) => {
                error!(
                    operation_id = %live.id,
                    status = %change.status(),
                    error = %e,
                    "Giving up on terminal status write"
                );
            }
        }

        let outcome = match change {
            StatusChange::Completed { .. } => Some(Outcome::Completed),
            StatusChange::Failed { .. } => Some(Outcome::Failed),
            StatusChange::Canceled { .. } => Some(Outcome::Canceled),
            StatusChange::Running { .. } => None,
        };
        if let Some(outcome) = outcome {
            self.metrics.record_finished(
                &live.operation_type,
                outcome,
                elapsed.unwrap_or(Duration::ZERO),
            );
        }

        self.registry.remove(live);
    }

    /// Best-effort broadcast.
    pub(crate) fn publish(&self, event: OperationEvent) {
        let operation_id = event.operation_id().to_string();
        if let Err(e) = self.broadcaster.publish(event) {
            warn!(operation_id = %operation_id, error = %e, "Failed to broadcast operation event");
        }
    }
}
