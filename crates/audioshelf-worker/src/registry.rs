//! Index of operations that are queued or running.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use audioshelf_core::error::AppError;
use audioshelf_core::result::AppResult;
use audioshelf_entity::operation::{ActiveOperation, OperationPriority, OperationStatus};

use crate::command::Command;

const PENDING: u8 = 0;
const RUNNING: u8 = 1;
const FINISHED: u8 = 2;

/// Live bookkeeping for one operation, shared by the dispatcher and the
/// worker that runs it.
#[derive(Debug)]
pub struct LiveOperation {
    pub id: String,
    pub operation_type: String,
    pub priority: OperationPriority,
    pub enqueued_at: DateTime<Utc>,
    pub command: Arc<dyn Command>,
    pub timeout: Option<Duration>,
    token: CancellationToken,
    phase: AtomicU8,
    cancel_requested: AtomicBool,
}

impl LiveOperation {
    /// Create a pending entry.
    pub fn new(
        id: String,
        priority: OperationPriority,
        command: Arc<dyn Command>,
        token: CancellationToken,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            id,
            operation_type: command.operation_type().to_string(),
            priority,
            enqueued_at: Utc::now(),
            command,
            timeout,
            token,
            phase: AtomicU8::new(PENDING),
            cancel_requested: AtomicBool::new(false),
        }
    }

    /// `pending -> running`. Only one caller can win.
    pub fn try_start(&self) -> bool {
        self.phase
            .compare_exchange(PENDING, RUNNING, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// `pending -> finished` for a cancel that beats the worker.
    pub fn try_cancel_pending(&self) -> bool {
        self.phase
            .compare_exchange(PENDING, FINISHED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Mark the body as done. No further execution happens for this entry.
    pub fn mark_finished(&self) {
        self.phase.store(FINISHED, Ordering::SeqCst);
    }

    /// Whether the entry has been handed to finalization.
    pub fn is_finished(&self) -> bool {
        self.phase.load(Ordering::SeqCst) == FINISHED
    }

    /// Set the cancellation flag and cancel the token.
    pub fn request_cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
        self.token.cancel();
    }

    /// Whether cancellation was requested.
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    /// The token handed to the body.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Status as seen by the scheduler.
    pub fn status(&self) -> OperationStatus {
        match self.phase.load(Ordering::SeqCst) {
            PENDING => OperationStatus::Pending,
            _ => OperationStatus::Running,
        }
    }

    /// Lightweight public view.
    pub fn snapshot(&self) -> ActiveOperation {
        ActiveOperation {
            id: self.id.clone(),
            operation_type: self.operation_type.clone(),
            priority: self.priority,
            status: self.status(),
            enqueued_at: self.enqueued_at,
        }
    }
}

/// Map of live operations keyed by id.
#[derive(Debug, Default)]
pub struct Registry {
    operations: Mutex<HashMap<String, Arc<LiveOperation>>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<LiveOperation>>> {
        self.operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Track a new entry. An entry that is still executing blocks the id;
    /// one that is only being finalized is replaced.
    pub fn insert(&self, operation: Arc<LiveOperation>) -> AppResult<()> {
        let mut operations = self.lock();
        if let Some(existing) = operations.get(&operation.id) {
            if !existing.is_finished() {
                return Err(AppError::conflict(format!(
                    "operation '{}' is already {}",
                    operation.id,
                    existing.status()
                )));
            }
        }
        operations.insert(operation.id.clone(), operation);
        Ok(())
    }

    /// Look up an entry.
    pub fn get(&self, id: &str) -> Option<Arc<LiveOperation>> {
        self.lock().get(id).cloned()
    }

    /// Whether an entry blocks `id` from being enqueued again.
    pub fn is_live(&self, id: &str) -> bool {
        self.lock().get(id).is_some_and(|op| !op.is_finished())
    }

    /// Remove `operation` if it is still the entry registered under its id.
    pub fn remove(&self, operation: &Arc<LiveOperation>) {
        let mut operations = self.lock();
        if operations
            .get(&operation.id)
            .is_some_and(|current| Arc::ptr_eq(current, operation))
        {
            operations.remove(&operation.id);
        }
    }

    /// All entries, oldest first.
    pub fn all(&self) -> Vec<Arc<LiveOperation>> {
        let mut all: Vec<Arc<LiveOperation>> = self.lock().values().cloned().collect();
        all.sort_by_key(|op| op.enqueued_at);
        all
    }

    /// Public views of every tracked entry, oldest first.
    ///
    /// An entry stays listed until its terminal transition has been fully
    /// recorded and it is removed.
    pub fn snapshot(&self) -> Vec<ActiveOperation> {
        self.all().iter().map(|op| op.snapshot()).collect()
    }

    /// Number of tracked entries.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
