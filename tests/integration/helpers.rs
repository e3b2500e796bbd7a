//! Shared test helpers for integration tests.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tokio::sync::Notify;
use tower::ServiceExt;

use audioshelf_api::{AppState, build_app};
use audioshelf_core::config::{AppConfig, WorkerConfig};
use audioshelf_database::{MemoryOperationStore, OperationStore};
use audioshelf_entity::operation::Operation;
use audioshelf_realtime::EventHub;
use audioshelf_worker::{Command, CommandError, Dispatcher, FnCommand};

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

/// Worker settings tuned for fast tests.
pub fn worker_config(concurrency: usize) -> WorkerConfig {
    WorkerConfig {
        concurrency,
        final_write_backoff_ms: 5,
        shutdown_timeout_seconds: 5,
        ..WorkerConfig::default()
    }
}

/// Dispatcher wired to an in-memory store and a live event hub.
pub struct Harness {
    pub store: Arc<MemoryOperationStore>,
    pub hub: EventHub,
    pub dispatcher: Dispatcher,
}

impl Harness {
    pub fn new(concurrency: usize) -> Self {
        Self::with_config(worker_config(concurrency))
    }

    pub fn with_config(config: WorkerConfig) -> Self {
        Self::with_store(Arc::new(MemoryOperationStore::new()), config)
    }

    pub fn with_store(store: Arc<MemoryOperationStore>, config: WorkerConfig) -> Self {
        let hub = EventHub::new(1024);
        let dispatcher = Dispatcher::new(store.clone(), Arc::new(hub.clone()), config);
        Self {
            store,
            hub,
            dispatcher,
        }
    }

    /// Current record for `id`; panics if it does not exist.
    pub async fn operation(&self, id: &str) -> Operation {
        self.store
            .get_operation(id)
            .await
            .expect("store read")
            .unwrap_or_else(|| panic!("operation {id} not found"))
    }

    /// Poll until `id` is terminal and no longer tracked by the dispatcher.
    pub async fn wait_terminal(&self, id: &str) -> Operation {
        let waited = tokio::time::timeout(WAIT, async {
            loop {
                let op = self.store.get_operation(id).await.expect("store read");
                let tracked = self
                    .dispatcher
                    .active_operations()
                    .iter()
                    .any(|a| a.id == id);
                if let Some(op) = op {
                    if op.status.is_terminal() && !tracked {
                        return op;
                    }
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        waited.unwrap_or_else(|_| panic!("operation {id} did not finish in time"))
    }
}

/// Wait until `condition` holds.
pub async fn eventually<F, Fut>(what: &str, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let waited = tokio::time::timeout(WAIT, async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

/// Append-only record of what bodies did, in order.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().expect("journal lock").push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().expect("journal lock").clone()
    }
}

/// Command that blocks until `gate` is notified.
pub fn gated(operation_type: &str, gate: Arc<Notify>) -> Arc<dyn Command> {
    Arc::new(FnCommand::new(operation_type, move |_, _| {
        let gate = gate.clone();
        async move {
            gate.notified().await;
            Ok(())
        }
    }))
}

/// Command that writes its name to `journal` and completes.
pub fn journaled(name: &str, journal: Journal) -> Arc<dyn Command> {
    let name = name.to_string();
    Arc::new(FnCommand::new("journaled", move |_, _| {
        let journal = journal.clone();
        let name = name.clone();
        async move {
            journal.push(name);
            Ok(())
        }
    }))
}

/// Command that waits for cancellation and reports it.
pub fn until_canceled(operation_type: &str) -> Arc<dyn Command> {
    Arc::new(FnCommand::new(operation_type, |cancel, _| async move {
        cancel.cancelled().await;
        Err(CommandError::Canceled)
    }))
}

/// Test application context
pub struct TestApp {
    /// The Axum router for making test requests
    pub router: Router,
    /// Dispatcher and store behind the router
    pub harness: Harness,
}

impl TestApp {
    /// Create a new test application
    pub fn new() -> Self {
        let harness = Harness::new(2);
        let config = AppConfig::default();
        let state = AppState::new(
            Arc::new(config),
            harness.dispatcher.clone(),
            harness.hub.clone(),
        );
        Self {
            router: build_app(state),
            harness,
        }
    }

    /// Make an HTTP request to the test app
    pub async fn request(&self, method: &str, path: &str) -> TestResponse {
        let req = Request::builder()
            .method(method)
            .uri(path)
            .body(Body::empty())
            .expect("Failed to build request");

        let response = self
            .router
            .clone()
            .oneshot(req)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .expect("Failed to read body");

        let body: Value = serde_json::from_slice(&body_bytes).unwrap_or(Value::Null);

        TestResponse { status, body }
    }
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    /// HTTP status code
    pub status: StatusCode,
    /// Parsed JSON body
    pub body: Value,
}
