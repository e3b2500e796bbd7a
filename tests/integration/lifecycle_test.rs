//! Timeouts, shutdown, recovery, retries and the event stream.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use audioshelf_core::error::ErrorKind;
use audioshelf_database::{MemoryOperationStore, OperationStore, StoreCall};
use audioshelf_entity::operation::{
    LogLevel, NewOperation, OperationPriority, OperationStatus, StatusChange,
};
use audioshelf_realtime::{OperationEvent, StatusDetails};
use audioshelf_worker::{
    CheckpointStatus, EnqueueOptions, FnCommand, OperationState,
};

use crate::helpers::{Harness, WAIT, eventually, gated, journaled, until_canceled, worker_config};

#[tokio::test]
async fn test_timeout_cancels_running_operation() {
    let h = Harness::new(1);
    h.dispatcher
        .enqueue_with_options(
            "slow",
            OperationPriority::Normal,
            until_canceled("transcode"),
            EnqueueOptions {
                timeout: Some(Duration::from_millis(50)),
            },
        )
        .await
        .expect("enqueue");

    let done = h.wait_terminal("slow").await;
    assert_eq!(done.status, OperationStatus::Canceled);
    assert!(done.error.is_none());

    let logs = h.dispatcher.logs("slow", None).await.expect("logs");
    assert!(
        logs.iter()
            .any(|l| l.level == LogLevel::Warn && l.message == "operation timed out after 50ms"),
        "missing timeout line: {logs:?}"
    );
}

#[tokio::test]
async fn test_operation_finishing_before_timeout_completes() {
    let h = Harness::new(1);
    let journal = crate::helpers::Journal::default();
    h.dispatcher
        .enqueue_with_options(
            "quick",
            OperationPriority::Normal,
            journaled("quick", journal.clone()),
            EnqueueOptions {
                timeout: Some(Duration::from_secs(30)),
            },
        )
        .await
        .expect("enqueue");

    let done = h.wait_terminal("quick").await;
    assert_eq!(done.status, OperationStatus::Completed);
    assert!(h.dispatcher.logs("quick", None).await.expect("logs").is_empty());
}

#[tokio::test]
async fn test_shutdown_cancels_queued_and_running_work() {
    let h = Harness::new(1);
    h.dispatcher
        .enqueue("running", OperationPriority::Normal, until_canceled("scan"))
        .await
        .expect("enqueue running");
    eventually("operation to start", || async {
        h.operation("running").await.status == OperationStatus::Running
    })
    .await;
    h.dispatcher
        .enqueue(
            "queued",
            OperationPriority::Normal,
            gated("scan", Arc::new(Notify::new())),
        )
        .await
        .expect("enqueue queued");

    h.dispatcher
        .shutdown(Duration::from_secs(5))
        .await
        .expect("shutdown");
    assert!(!h.dispatcher.is_accepting());

    let queued = h.operation("queued").await;
    assert_eq!(queued.status, OperationStatus::Canceled);
    assert_eq!(queued.message, "canceled by shutdown");
    assert!(queued.started_at.is_none());
    assert_eq!(h.operation("running").await.status, OperationStatus::Canceled);
    assert!(h.dispatcher.active_operations().is_empty());

    let err = h
        .dispatcher
        .enqueue("late", OperationPriority::High, until_canceled("scan"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::ServiceUnavailable);

    // Idempotent.
    h.dispatcher
        .shutdown(Duration::from_secs(1))
        .await
        .expect("second shutdown");
}

#[tokio::test]
async fn test_shutdown_times_out_on_stubborn_body() {
    let h = Harness::new(1);
    let command = Arc::new(FnCommand::new("stubborn", |_, _| async {
        tokio::time::sleep(Duration::from_secs(3)).await;
        Ok(())
    }));
    h.dispatcher
        .enqueue("stubborn", OperationPriority::Normal, command)
        .await
        .expect("enqueue");
    eventually("operation to start", || async {
        h.operation("stubborn").await.status == OperationStatus::Running
    })
    .await;

    let err = h
        .dispatcher
        .shutdown(Duration::from_millis(50))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Internal);
}

#[tokio::test]
async fn test_terminal_write_is_retried() {
    let h = Harness::new(1);
    let store = h.store.clone();
    let command = Arc::new(FnCommand::new("scan", move |_, _| {
        let store = store.clone();
        async move {
            store.inject_failures(StoreCall::UpdateStatus, 2);
            Ok(())
        }
    }));
    h.dispatcher
        .enqueue("flaky", OperationPriority::Normal, command)
        .await
        .expect("enqueue");

    let done = h.wait_terminal("flaky").await;
    assert_eq!(done.status, OperationStatus::Completed);
    // running + two failed attempts + the successful one
    assert_eq!(h.store.call_count(StoreCall::UpdateStatus), 4);
}

#[tokio::test]
async fn test_cancel_during_terminal_write_retry_is_a_conflict() {
    let mut config = worker_config(1);
    config.final_write_backoff_ms = 200;
    let h = Harness::with_config(config);
    let store = h.store.clone();
    let command = Arc::new(FnCommand::new("scan", move |_, _| {
        let store = store.clone();
        async move {
            store.inject_failures(StoreCall::UpdateStatus, 2);
            Ok(())
        }
    }));
    h.dispatcher
        .enqueue("settling", OperationPriority::Normal, command)
        .await
        .expect("enqueue");

    // running + the first failed terminal attempt
    eventually("first terminal attempt to fail", || async {
        h.store.call_count(StoreCall::UpdateStatus) >= 2
    })
    .await;
    assert_eq!(h.operation("settling").await.status, OperationStatus::Running);

    let err = h.dispatcher.cancel("settling").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Conflict);
    assert!(err.message.contains("finishing"));

    let done = h.wait_terminal("settling").await;
    assert_eq!(done.status, OperationStatus::Completed);
}

#[tokio::test]
async fn test_exhausted_terminal_write_releases_the_slot() {
    let h = Harness::new(1);
    let store = h.store.clone();
    let command = Arc::new(FnCommand::new("scan", move |_, _| {
        let store = store.clone();
        async move {
            store.inject_failures(StoreCall::UpdateStatus, 100);
            Ok(())
        }
    }));
    h.dispatcher
        .enqueue("doomed", OperationPriority::Normal, command)
        .await
        .expect("enqueue");

    eventually("registry to release the operation", || async {
        h.dispatcher.active_operations().is_empty()
    })
    .await;
    // Default retry budget is three attempts.
    assert_eq!(h.store.call_count(StoreCall::UpdateStatus), 1 + 3);
    assert_eq!(h.operation("doomed").await.status, OperationStatus::Running);
    let err = h.dispatcher.cancel("doomed").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Conflict);
    h.store.inject_failures(StoreCall::UpdateStatus, 0);

    let journal = crate::helpers::Journal::default();
    h.dispatcher
        .enqueue("next", OperationPriority::Normal, journaled("next", journal.clone()))
        .await
        .expect("enqueue next");
    assert_eq!(h.wait_terminal("next").await.status, OperationStatus::Completed);
}

#[tokio::test]
async fn test_final_progress_is_flushed_before_completion() {
    let mut config = worker_config(1);
    config.progress_every_n = 1000;
    config.progress_interval_ms = 3_600_000;
    let h = Harness::with_config(config);
    let command = Arc::new(FnCommand::new("scan", |_, reporter| async move {
        for i in 1..=7 {
            reporter.update_progress(i, 10, &format!("item {i}")).await;
        }
        Ok(())
    }));

    let mut events = h.hub.subscribe(Some("throttled".to_string()));
    h.dispatcher
        .enqueue("throttled", OperationPriority::Normal, command)
        .await
        .expect("enqueue");

    let done = h.wait_terminal("throttled").await;
    assert_eq!((done.progress_current, done.progress_total), (7, 10));
    assert_eq!(done.message, "item 7");
    assert_eq!(h.store.call_count(StoreCall::UpdateProgress), 2);

    let mut progress = Vec::new();
    let terminal = loop {
        let event = tokio::time::timeout(WAIT, events.recv())
            .await
            .expect("event in time")
            .expect("hub open");
        match event {
            OperationEvent::Progress { current, .. } => progress.push(current),
            OperationEvent::Status { status, details, .. } if status.is_terminal() => {
                break details;
            }
            _ => {}
        }
    };
    assert_eq!(progress, vec![1, 7]);
    assert_eq!(
        terminal,
        StatusDetails::Progress {
            current: 7,
            total: 10,
            message: "item 7".to_string(),
        }
    );
}

#[tokio::test]
async fn test_event_sequence_for_failed_operation() {
    let h = Harness::new(1);
    let mut events = h.hub.subscribe(Some("evt".to_string()));
    let mut others = h.hub.subscribe(Some("someone-else".to_string()));

    let command = Arc::new(FnCommand::new("metadata_fetch", |_, reporter| async move {
        reporter.update_progress(1, 2, "fetching").await;
        reporter.warn("rate limited").await;
        Err(audioshelf_worker::CommandError::failed("network timeout"))
    }));
    h.dispatcher
        .enqueue("evt", OperationPriority::Normal, command)
        .await
        .expect("enqueue");
    h.wait_terminal("evt").await;

    let mut types = Vec::new();
    let last = loop {
        let event = tokio::time::timeout(WAIT, events.recv())
            .await
            .expect("event in time")
            .expect("hub open");
        assert_eq!(event.operation_id(), "evt");
        types.push(event.event_type());
        if let OperationEvent::Status { status, details, .. } = event {
            if status.is_terminal() {
                break (status, details);
            }
        }
    };

    assert_eq!(
        types,
        vec![
            "operation:status",
            "operation:progress",
            "operation:log",
            "operation:log",
            "operation:status",
        ]
    );
    assert_eq!(last.0, OperationStatus::Failed);
    assert_eq!(
        last.1,
        StatusDetails::Error {
            error: "network timeout".to_string()
        }
    );

    assert!(
        tokio::time::timeout(Duration::from_millis(20), others.recv())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_checkpoint_state_is_cleared_on_completion() {
    let h = Harness::new(1);
    let gate = Arc::new(Notify::new());
    let release = gate.clone();
    let command = Arc::new(FnCommand::new("organize", move |_, reporter| {
        let release = release.clone();
        async move {
            let state = reporter.state();
            state.save_params(&vec!["/books/a", "/books/b"]).await?;
            state.save_checkpoint("moving files", 2, 3).await?;
            release.notified().await;
            Ok(())
        }
    }));
    h.dispatcher
        .enqueue("organize-2", OperationPriority::Normal, command)
        .await
        .expect("enqueue");

    let state = OperationState::new(h.store.clone(), "organize-2", "organize");
    eventually("checkpoint to be saved", || async {
        state.load_checkpoint().await.expect("load").is_some()
    })
    .await;
    let checkpoint = state.load_checkpoint().await.expect("load").expect("saved");
    assert_eq!(checkpoint.phase, "moving files");
    assert_eq!((checkpoint.phase_index, checkpoint.phase_total), (2, 3));
    assert_eq!(checkpoint.status, CheckpointStatus::Running);
    let params: Vec<String> = state.load_params().await.expect("params").expect("saved");
    assert_eq!(params, vec!["/books/a", "/books/b"]);

    gate.notify_one();
    h.wait_terminal("organize-2").await;
    assert!(state.load_checkpoint().await.expect("load").is_none());
    assert!(state.load_params::<Vec<String>>().await.expect("load").is_none());
}

#[tokio::test]
async fn test_recovery_fails_interrupted_operations() {
    let store = Arc::new(MemoryOperationStore::new());
    for id in ["left-pending", "left-running", "finished"] {
        store
            .create_operation(&NewOperation {
                id: id.to_string(),
                operation_type: "itunes_import".to_string(),
                priority: OperationPriority::Normal,
                subject: None,
            })
            .await
            .expect("create");
    }
    let now = chrono::Utc::now();
    store
        .update_operation_status("left-running", &StatusChange::Running { started_at: now })
        .await
        .expect("running");
    store
        .update_operation_status("finished", &StatusChange::Running { started_at: now })
        .await
        .expect("running");
    store
        .update_operation_status(
            "finished",
            &StatusChange::Completed {
                completed_at: now,
                message: "done".to_string(),
            },
        )
        .await
        .expect("completed");
    OperationState::new(store.clone(), "left-running", "itunes_import")
        .save_checkpoint("importing tracks", 1, 4)
        .await
        .expect("checkpoint");

    let h = Harness::with_store(store, worker_config(1));
    let mut events = h.hub.subscribe(None);
    let recovered = h.dispatcher.recover_interrupted().await.expect("recover");
    assert_eq!(recovered, 2);

    for id in ["left-pending", "left-running"] {
        let op = h.operation(id).await;
        assert_eq!(op.status, OperationStatus::Failed);
        assert_eq!(op.error.as_deref(), Some("interrupted by restart"));
    }
    assert_eq!(h.operation("finished").await.status, OperationStatus::Completed);

    let checkpoint = OperationState::new(h.store.clone(), "left-running", "itunes_import")
        .load_checkpoint()
        .await
        .expect("load")
        .expect("kept");
    assert_eq!(checkpoint.status, CheckpointStatus::Interrupted);

    let event = events.recv().await.expect("event");
    assert_eq!(event.event_type(), "operation:status");
    assert_eq!(h.dispatcher.recover_interrupted().await.expect("again"), 0);
}

#[tokio::test]
async fn test_metrics_count_outcomes_per_type() {
    let h = Harness::new(2);
    let ok = Arc::new(FnCommand::new("scan", |_, _| async { Ok(()) }));
    let bad = Arc::new(FnCommand::new("scan", |_, _| async {
        Err(audioshelf_worker::CommandError::failed("disk full"))
    }));
    h.dispatcher
        .enqueue("m1", OperationPriority::Normal, ok)
        .await
        .expect("enqueue");
    h.dispatcher
        .enqueue("m2", OperationPriority::Normal, bad)
        .await
        .expect("enqueue");
    h.wait_terminal("m1").await;
    h.wait_terminal("m2").await;

    let metrics = h.dispatcher.metrics();
    let scan = metrics.get("scan").expect("scan metrics");
    assert_eq!(scan.started, 2);
    assert_eq!(scan.completed, 1);
    assert_eq!(scan.failed, 1);
    assert_eq!(scan.canceled, 0);
}

#[tokio::test]
async fn test_reporter_exposes_operation_identity() {
    let h = Harness::new(1);
    let seen = Arc::new(tokio::sync::Mutex::new(String::new()));
    let slot = seen.clone();
    let command = Arc::new(FnCommand::new("scan", move |cancel, reporter| {
        let slot = slot.clone();
        async move {
            assert!(!cancel.is_cancelled());
            assert!(!reporter.cancellation_token().is_cancelled());
            *slot.lock().await = reporter.operation_id().to_string();
            Ok(())
        }
    }));
    h.dispatcher
        .enqueue("ident", OperationPriority::Normal, command)
        .await
        .expect("enqueue");
    assert_eq!(h.wait_terminal("ident").await.status, OperationStatus::Completed);
    assert_eq!(*seen.lock().await, "ident");
}
