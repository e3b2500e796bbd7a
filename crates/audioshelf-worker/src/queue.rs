//! In-process priority queue of pending operations.
//!
//! Entries are ordered by priority (highest first) and then by enqueue
//! order. Removal by id is O(log n) through a side index.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use audioshelf_core::error::AppError;
use audioshelf_core::result::AppResult;
use audioshelf_entity::operation::OperationPriority;

type QueueKey = (Reverse<OperationPriority>, u64);

#[derive(Debug, Default)]
struct QueueInner {
    entries: BTreeMap<QueueKey, String>,
    index: HashMap<String, QueueKey>,
    next_seq: u64,
    closed: bool,
}

/// Ordered queue of operation ids waiting for a worker.
#[derive(Debug, Default)]
pub struct PriorityQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
}

impl PriorityQueue {
    /// Create an empty, open queue.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add an id. Never blocks. Fails once the queue is closed or if the id
    /// is already queued.
    pub fn push(&self, id: &str, priority: OperationPriority) -> AppResult<()> {
        {
            let mut inner = self.lock();
            if inner.closed {
                return Err(AppError::service_unavailable("operation queue is closed"));
            }
            if inner.index.contains_key(id) {
                return Err(AppError::conflict(format!("operation '{id}' is already queued")));
            }
            let key = (Reverse(priority), inner.next_seq);
            inner.next_seq += 1;
            inner.entries.insert(key, id.to_string());
            inner.index.insert(id.to_string(), key);
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Take the next id without waiting.
    pub fn try_pop(&self) -> Option<String> {
        let mut inner = self.lock();
        let (_, id) = inner.entries.pop_first()?;
        inner.index.remove(&id);
        Some(id)
    }

    /// Wait for the next id. Returns `None` once the queue is closed.
    pub async fn pop(&self) -> Option<String> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a push in between is not missed.
            notified.as_mut().enable();

            {
                let mut inner = self.lock();
                if inner.closed {
                    return None;
                }
                if let Some((_, id)) = inner.entries.pop_first() {
                    inner.index.remove(&id);
                    return Some(id);
                }
            }

            notified.await;
        }
    }

    /// Remove a queued id. Returns whether it was present.
    pub fn remove(&self, id: &str) -> bool {
        let mut inner = self.lock();
        match inner.index.remove(id) {
            Some(key) => inner.entries.remove(&key).is_some(),
            None => false,
        }
    }

    /// Close the queue and return everything still queued, in pop order.
    pub fn close(&self) -> Vec<String> {
        let drained = {
            let mut inner = self.lock();
            inner.closed = true;
            inner.index.clear();
            std::mem::take(&mut inner.entries).into_values().collect()
        };
        self.notify.notify_waiters();
        drained
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of queued ids.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
