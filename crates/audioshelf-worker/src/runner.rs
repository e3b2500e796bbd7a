//! Worker loops: pop, run, finalize.

use std::any::Any;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use audioshelf_entity::operation::{LogLevel, OperationStatus, StatusChange};
use audioshelf_realtime::{OperationEvent, StatusDetails};

use crate::command::CommandError;
use crate::dispatcher::DispatcherShared;
use crate::registry::LiveOperation;
use crate::reporter::{OperationReporter, ProgressReporter, ThrottlePolicy};

/// Spawn `count` worker loops.
pub(crate) fn spawn_workers(shared: &Arc<DispatcherShared>, count: usize) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|worker| {
            let shared = Arc::clone(shared);
            tokio::spawn(async move { worker_loop(worker, shared).await })
        })
        .collect()
}

async fn worker_loop(worker: usize, shared: Arc<DispatcherShared>) {
    info!(worker, "Worker started");

    while let Some(id) = shared.queue.pop().await {
        let Some(live) = shared.registry.get(&id) else {
            debug!(worker, operation_id = %id, "Popped operation is no longer tracked");
            continue;
        };
        debug!(worker, operation_id = %id, "Picked up operation");
        run_operation(&shared, live).await;
    }

    info!(worker, "Worker stopped");
}

/// Run one operation end to end. Never panics, whatever the body does.
async fn run_operation(shared: &Arc<DispatcherShared>, live: Arc<LiveOperation>) {
    if !live.try_start() {
        // Cancelled while queued; the cancel path already finalized it.
        return;
    }
    if live.is_cancel_requested() {
        shared
            .finalize(
                &live,
                StatusChange::Canceled {
                    completed_at: Utc::now(),
                    message: "canceled before start".to_string(),
                },
                None,
            )
            .await;
        return;
    }

    let started = Instant::now();
    let start = StatusChange::Running {
        started_at: Utc::now(),
    };
    if let Err(e) = shared.persist_status(&live.id, &start).await {
        error!(operation_id = %live.id, error = %e, "Could not mark operation running");
        shared
            .finalize(
                &live,
                StatusChange::Failed {
                    completed_at: Utc::now(),
                    error: format!("failed to start: {}", e.message),
                },
                None,
            )
            .await;
        return;
    }

    info!(
        "Running operation: id={}, type='{}', priority={}",
        live.id, live.operation_type, live.priority
    );
    shared.metrics.record_started(&live.operation_type);
    shared.publish(OperationEvent::status(
        &live.id,
        OperationStatus::Running,
        StatusDetails::Message {
            message: "operation started".to_string(),
        },
    ));

    let reporter = Arc::new(OperationReporter::new(
        live.id.clone(),
        live.operation_type.clone(),
        Arc::clone(&shared.store),
        Arc::clone(&shared.broadcaster),
        live.token().clone(),
        ThrottlePolicy {
            every_n: shared.config.progress_every_n,
            interval: shared.config.progress_interval(),
        },
    ));

    let timer = live.timeout.map(|limit| {
        let live = Arc::clone(&live);
        let reporter = Arc::clone(&reporter);
        tokio::spawn(async move {
            tokio::select! {
                _ = live.token().cancelled() => {}
                _ = tokio::time::sleep(limit) => {
                    warn!(operation_id = %live.id, ?limit, "Operation timed out, requesting cancellation");
                    reporter
                        .log(
                            LogLevel::Warn,
                            &format!("operation timed out after {limit:?}"),
                            None,
                        )
                        .await;
                    live.request_cancel();
                }
            }
        })
    });

    // The body runs in its own task so a panic stays contained.
    let body = {
        let command = Arc::clone(&live.command);
        let token = live.token().clone();
        let reporter: Arc<dyn ProgressReporter> = reporter.clone();
        tokio::spawn(async move { command.execute(token, reporter).await })
    };
    let outcome = body.await;

    if let Some(timer) = timer {
        timer.abort();
    }
    reporter.flush().await;

    let completed_at = Utc::now();
    let change = match outcome {
        Ok(Ok(())) if live.is_cancel_requested() => StatusChange::Canceled {
            completed_at,
            message: "operation canceled".to_string(),
        },
        Ok(Ok(())) => {
            let progress = reporter.snapshot().await;
            let message = if progress.message.is_empty() {
                "operation completed".to_string()
            } else {
                progress.message
            };
            StatusChange::Completed {
                completed_at,
                message,
            }
        }
        Ok(Err(CommandError::Canceled)) => StatusChange::Canceled {
            completed_at,
            message: "operation canceled".to_string(),
        },
        Ok(Err(e)) => StatusChange::Failed {
            completed_at,
            error: e.to_string(),
        },
        Err(join) if join.is_panic() => StatusChange::Failed {
            completed_at,
            error: format!("operation panicked: {}", panic_message(join.into_panic())),
        },
        Err(_) => StatusChange::Failed {
            completed_at,
            error: "operation task was aborted".to_string(),
        },
    };

    if let StatusChange::Failed { error, .. } = &change {
        warn!(operation_id = %live.id, error = %error, "Operation failed");
        reporter.log(LogLevel::Error, error, None).await;
    }

    shared.finalize(&live, change, Some(started.elapsed())).await;
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
