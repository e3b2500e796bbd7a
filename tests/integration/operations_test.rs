//! Scheduling, cancellation, progress and logging behavior.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, Notify};

use audioshelf_core::error::ErrorKind;
use audioshelf_database::OperationStore;
use audioshelf_entity::operation::{LogLevel, OperationPriority, OperationStatus};
use audioshelf_worker::{CommandError, FnCommand, ProgressReporter};

use crate::helpers::{Harness, Journal, WAIT, eventually, gated, journaled};

#[tokio::test]
async fn test_priority_ordering_with_one_worker() {
    let h = Harness::new(1);
    let gate = Arc::new(Notify::new());
    let journal = Journal::default();

    h.dispatcher
        .enqueue("gate", OperationPriority::High, gated("gate", gate.clone()))
        .await
        .expect("enqueue gate");
    eventually("gate to start", || async {
        h.operation("gate").await.status == OperationStatus::Running
    })
    .await;

    for (id, priority) in [
        ("A", OperationPriority::Low),
        ("B", OperationPriority::Normal),
        ("C", OperationPriority::Normal),
    ] {
        h.dispatcher
            .enqueue(id, priority, journaled(id, journal.clone()))
            .await
            .expect("enqueue");
    }
    assert_eq!(h.dispatcher.queued(), 3);

    gate.notify_one();
    h.wait_terminal("A").await;
    assert_eq!(journal.entries(), vec!["B", "C", "A"]);
}

#[tokio::test]
async fn test_duplicate_live_id_is_rejected() {
    let h = Harness::new(1);
    let gate = Arc::new(Notify::new());

    h.dispatcher
        .enqueue("x", OperationPriority::Normal, gated("scan", gate.clone()))
        .await
        .expect("first enqueue");
    let err = h
        .dispatcher
        .enqueue("x", OperationPriority::Normal, gated("scan", gate.clone()))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Conflict);

    gate.notify_one();
    let done = h.wait_terminal("x").await;
    assert_eq!(done.status, OperationStatus::Completed);

    // A finished id may be reused.
    let journal = Journal::default();
    let again = h
        .dispatcher
        .enqueue("x", OperationPriority::Normal, journaled("second", journal.clone()))
        .await
        .expect("re-enqueue");
    assert_eq!(again.status, OperationStatus::Pending);
    let done = h.wait_terminal("x").await;
    assert_eq!(done.status, OperationStatus::Completed);
    assert_eq!(journal.entries(), vec!["second"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_polled_progress_never_decreases() {
    let h = Harness::new(1);
    let command = Arc::new(FnCommand::new("scan", |_, reporter| async move {
        for i in 0..=40 {
            reporter.update_progress(i, 40, "scanning").await;
            if i == 20 {
                // Same total: clamped to the previous value.
                reporter.update_progress(3, 40, "rewound").await;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        Ok(())
    }));
    h.dispatcher
        .enqueue("scan-1", OperationPriority::Normal, command)
        .await
        .expect("enqueue");

    let mut observed = Vec::new();
    loop {
        let op = h.operation("scan-1").await;
        observed.push(op.progress_current);
        if op.status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    assert!(
        observed.windows(2).all(|w| w[0] <= w[1]),
        "progress went backwards: {observed:?}"
    );
    assert_eq!(observed.last(), Some(&40));
}

#[tokio::test]
async fn test_terminal_state_absorbs_late_writes() {
    let h = Harness::new(1);
    let kept: Arc<Mutex<Option<Arc<dyn ProgressReporter>>>> = Arc::new(Mutex::new(None));

    let slot = kept.clone();
    let command = Arc::new(FnCommand::new("scan", move |_, reporter| {
        let slot = slot.clone();
        async move {
            reporter.update_progress(5, 5, "done").await;
            reporter.info("finished scanning").await;
            *slot.lock().await = Some(reporter);
            Ok(())
        }
    }));
    h.dispatcher
        .enqueue("scan-2", OperationPriority::Normal, command)
        .await
        .expect("enqueue");
    let done = h.wait_terminal("scan-2").await;
    assert_eq!(done.status, OperationStatus::Completed);

    let reporter = kept.lock().await.take().expect("reporter kept");
    reporter.update_progress(1, 100, "late").await;
    reporter.log(LogLevel::Error, "late", None).await;

    let after = h.operation("scan-2").await;
    assert_eq!(after.status, OperationStatus::Completed);
    assert_eq!((after.progress_current, after.progress_total), (5, 5));
    let logs = h.dispatcher.logs("scan-2", None).await.expect("logs");
    assert_eq!(logs.len(), 1);

    let err = h.dispatcher.cancel("scan-2").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Conflict);
    assert_eq!(h.operation("scan-2").await.status, OperationStatus::Completed);
}

#[tokio::test]
async fn test_canceling_pending_operation_never_runs_body() {
    let h = Harness::new(1);
    let gate = Arc::new(Notify::new());
    let ran = Arc::new(AtomicBool::new(false));

    h.dispatcher
        .enqueue("busy", OperationPriority::Normal, gated("scan", gate.clone()))
        .await
        .expect("enqueue busy");

    let flag = ran.clone();
    let command = Arc::new(FnCommand::new("organize", move |_, _| {
        let flag = flag.clone();
        async move {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        }
    }));
    h.dispatcher
        .enqueue("victim", OperationPriority::Normal, command)
        .await
        .expect("enqueue victim");

    h.dispatcher.cancel("victim").await.expect("cancel");
    let canceled = h.operation("victim").await;
    assert_eq!(canceled.status, OperationStatus::Canceled);
    assert!(canceled.started_at.is_none());
    assert!(canceled.error.is_none());
    assert_eq!(h.dispatcher.queued(), 0);

    gate.notify_one();
    h.wait_terminal("busy").await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!ran.load(Ordering::SeqCst));
    assert_eq!(h.operation("victim").await.status, OperationStatus::Canceled);
}

#[tokio::test]
async fn test_panicking_body_fails_and_pool_survives() {
    let h = Harness::new(1);
    let command = Arc::new(FnCommand::new("metadata_fetch", |_, _| async {
        if true {
            panic!("boom");
        }
        Ok(())
    }));
    h.dispatcher
        .enqueue("panics", OperationPriority::Normal, command)
        .await
        .expect("enqueue");

    let failed = h.wait_terminal("panics").await;
    assert_eq!(failed.status, OperationStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some("operation panicked: boom"));

    let journal = Journal::default();
    h.dispatcher
        .enqueue("after", OperationPriority::Normal, journaled("after", journal.clone()))
        .await
        .expect("enqueue after panic");
    let done = h.wait_terminal("after").await;
    assert_eq!(done.status, OperationStatus::Completed);
    assert_eq!(journal.entries(), vec!["after"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_logs_keep_call_order_for_concurrent_readers() {
    let h = Harness::new(1);
    let command = Arc::new(FnCommand::new("itunes_import", |_, reporter| async move {
        for i in 0..30 {
            reporter.info(&format!("line {i}")).await;
            tokio::task::yield_now().await;
        }
        Ok(())
    }));
    h.dispatcher
        .enqueue("import-1", OperationPriority::Normal, command)
        .await
        .expect("enqueue");

    let expected: Vec<String> = (0..30).map(|i| format!("line {i}")).collect();
    loop {
        let logs = h.dispatcher.logs("import-1", None).await.expect("logs");
        let messages: Vec<String> = logs.iter().map(|l| l.message.clone()).collect();
        assert_eq!(messages[..], expected[..messages.len()], "not a prefix");
        if h.operation("import-1").await.status.is_terminal() {
            break;
        }
        tokio::task::yield_now().await;
    }

    let logs = h.dispatcher.logs("import-1", None).await.expect("logs");
    assert_eq!(logs.len(), 30);
    assert!(logs.windows(2).all(|w| w[0].sequence < w[1].sequence));

    let tail = h.dispatcher.logs("import-1", Some(3)).await.expect("tail");
    let tail: Vec<&str> = tail.iter().map(|l| l.message.as_str()).collect();
    assert_eq!(tail, vec!["line 27", "line 28", "line 29"]);
}

#[tokio::test]
async fn test_scan_reports_full_progress() {
    let h = Harness::new(2);
    let command = Arc::new(
        FnCommand::new("scan", |_, reporter| async move {
            reporter.update_progress(0, 10, "start").await;
            for i in 1..=10 {
                reporter
                    .update_progress(i, 10, &format!("scanned {i} of 10"))
                    .await;
            }
            Ok(())
        })
        .with_subject("/library/audiobooks"),
    );
    let queued = h
        .dispatcher
        .enqueue("scan-full", OperationPriority::Normal, command)
        .await
        .expect("enqueue");
    assert_eq!(queued.status, OperationStatus::Pending);
    assert_eq!(queued.subject.as_deref(), Some("/library/audiobooks"));

    let done = h.wait_terminal("scan-full").await;
    assert_eq!(done.status, OperationStatus::Completed);
    assert_eq!((done.progress_current, done.progress_total), (10, 10));
    assert_eq!(done.percentage(), 100);
    assert!(done.started_at.is_some() && done.completed_at.is_some());
    assert!(done.error.is_none());
}

#[tokio::test]
async fn test_cooperative_cancel_of_running_operation() {
    let h = Harness::new(1);
    let reached = Arc::new(Notify::new());
    let signal = reached.clone();
    let command = Arc::new(FnCommand::new("organize", move |_, reporter| {
        let signal = signal.clone();
        async move {
            for i in 0..100 {
                if reporter.is_canceled() {
                    return Ok(());
                }
                reporter.update_progress(i, 100, "organizing").await;
                if i == 5 {
                    signal.notify_one();
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
            Ok(())
        }
    }));
    h.dispatcher
        .enqueue("organize-1", OperationPriority::Normal, command)
        .await
        .expect("enqueue");

    tokio::time::timeout(WAIT, reached.notified())
        .await
        .expect("iteration 5 reached");
    h.dispatcher.cancel("organize-1").await.expect("cancel");

    let done = h.wait_terminal("organize-1").await;
    assert_eq!(done.status, OperationStatus::Canceled);
    assert!(done.error.is_none());
    assert!(done.progress_current < 99);
}

#[tokio::test]
async fn test_body_error_is_recorded_verbatim() {
    let h = Harness::new(1);
    let command = Arc::new(FnCommand::new("metadata_fetch", |_, _| async {
        Err(CommandError::failed("network timeout"))
    }));
    h.dispatcher
        .enqueue("fetch-1", OperationPriority::Normal, command)
        .await
        .expect("enqueue");

    let done = h.wait_terminal("fetch-1").await;
    assert_eq!(done.status, OperationStatus::Failed);
    assert_eq!(done.error.as_deref(), Some("network timeout"));

    let logs = h.dispatcher.logs("fetch-1", None).await.expect("logs");
    let last = logs.last().expect("error log line");
    assert_eq!(last.level, LogLevel::Error);
    assert_eq!(last.message, "network timeout");
}

#[tokio::test]
async fn test_single_worker_runs_operations_one_at_a_time() {
    let h = Harness::new(1);
    let gate = Arc::new(Notify::new());
    let seen_first = Arc::new(Mutex::new(None));

    h.dispatcher
        .enqueue("first", OperationPriority::Normal, gated("scan", gate.clone()))
        .await
        .expect("enqueue first");

    let store = h.store.clone();
    let slot = seen_first.clone();
    let command = Arc::new(FnCommand::new("scan", move |_, _| {
        let store = store.clone();
        let slot = slot.clone();
        async move {
            let first = store.get_operation("first").await?;
            *slot.lock().await = first.map(|op| op.status);
            Ok(())
        }
    }));
    h.dispatcher
        .enqueue("second", OperationPriority::Normal, command)
        .await
        .expect("enqueue second");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.operation("second").await.status, OperationStatus::Pending);

    gate.notify_one();
    h.wait_terminal("second").await;
    assert_eq!(*seen_first.lock().await, Some(OperationStatus::Completed));
}

#[tokio::test]
async fn test_cancel_unknown_id_has_no_side_effects() {
    let h = Harness::new(1);
    let err = h.dispatcher.cancel("nonexistent-id").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
    assert!(h.dispatcher.active_operations().is_empty());
    assert_eq!(h.dispatcher.queued(), 0);
    assert!(h.store.get_operation("nonexistent-id").await.expect("read").is_none());
}
