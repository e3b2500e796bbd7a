//! In-memory operation store.
//!
//! Used by the default `memory` backend and by tests. Supports injecting
//! failures per call so collaborator error paths can be exercised.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use audioshelf_core::error::AppError;
use audioshelf_core::result::AppResult;
use audioshelf_entity::operation::{
    LogLevel, NewOperation, Operation, OperationLog, OperationStatus, StatusChange,
};

use crate::store::{OperationStore, StateKind};

/// Store methods that can be made to fail on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreCall {
    CreateOperation,
    UpdateStatus,
    UpdateProgress,
    AddLog,
    PutState,
}

#[derive(Debug)]
struct Entry {
    operation: Operation,
    inserted: u64,
    logs: Vec<OperationLog>,
    next_sequence: i64,
    state: HashMap<StateKind, serde_json::Value>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    inserted: u64,
}

/// [`OperationStore`] backed by process memory.
#[derive(Debug, Default)]
pub struct MemoryOperationStore {
    inner: RwLock<Inner>,
    failures: Mutex<HashMap<StoreCall, u32>>,
    calls: Mutex<HashMap<StoreCall, u64>>,
}

impl MemoryOperationStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` invocations of `call` fail with a database error.
    pub fn inject_failures(&self, call: StoreCall, count: u32) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.insert(call, count);
        }
    }

    /// Number of times `call` has been invoked, including failed attempts.
    pub fn call_count(&self, call: StoreCall) -> u64 {
        self.calls
            .lock()
            .map(|calls| calls.get(&call).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    fn record_call(&self, call: StoreCall) -> AppResult<()> {
        if let Ok(mut calls) = self.calls.lock() {
            *calls.entry(call).or_insert(0) += 1;
        }
        let mut failures = self
            .failures
            .lock()
            .map_err(|_| AppError::internal("failure injection lock poisoned"))?;
        match failures.get_mut(&call) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(AppError::database(format!("injected failure for {call:?}")))
            }
            _ => Ok(()),
        }
    }
}

fn live_entry<'a>(inner: &'a mut Inner, id: &str) -> AppResult<&'a mut Entry> {
    let entry = inner
        .entries
        .get_mut(id)
        .ok_or_else(|| AppError::not_found(format!("operation '{id}' not found")))?;
    if entry.operation.status.is_terminal() {
        return Err(AppError::conflict(format!(
            "operation '{id}' is already {}",
            entry.operation.status
        )));
    }
    Ok(entry)
}

#[async_trait]
impl OperationStore for MemoryOperationStore {
    async fn create_operation(&self, new: &NewOperation) -> AppResult<Operation> {
        self.record_call(StoreCall::CreateOperation)?;
        let mut inner = self.inner.write().await;
        if let Some(existing) = inner.entries.get(&new.id) {
            if !existing.operation.status.is_terminal() {
                return Err(AppError::conflict(format!(
                    "operation '{}' is already {}",
                    new.id, existing.operation.status
                )));
            }
        }

        inner.inserted += 1;
        let operation = Operation::pending(new, Utc::now());
        let entry = Entry {
            operation: operation.clone(),
            inserted: inner.inserted,
            logs: Vec::new(),
            next_sequence: 1,
            state: HashMap::new(),
        };
        inner.entries.insert(new.id.clone(), entry);
        Ok(operation)
    }

    async fn get_operation(&self, id: &str) -> AppResult<Option<Operation>> {
        let inner = self.inner.read().await;
        Ok(inner.entries.get(id).map(|e| e.operation.clone()))
    }

    async fn recent_operations(&self, limit: u32) -> AppResult<Vec<Operation>> {
        let inner = self.inner.read().await;
        let mut entries: Vec<&Entry> = inner.entries.values().collect();
        entries.sort_by(|a, b| b.inserted.cmp(&a.inserted));
        Ok(entries
            .into_iter()
            .take(limit as usize)
            .map(|e| e.operation.clone())
            .collect())
    }

    async fn unfinished_operations(&self) -> AppResult<Vec<Operation>> {
        let inner = self.inner.read().await;
        let mut entries: Vec<&Entry> = inner
            .entries
            .values()
            .filter(|e| !e.operation.status.is_terminal())
            .collect();
        entries.sort_by_key(|e| e.inserted);
        Ok(entries.into_iter().map(|e| e.operation.clone()).collect())
    }

    async fn update_operation_status(
        &self,
        id: &str,
        change: &StatusChange,
    ) -> AppResult<Operation> {
        self.record_call(StoreCall::UpdateStatus)?;
        let mut inner = self.inner.write().await;
        let entry = inner
            .entries
            .get_mut(id)
            .ok_or_else(|| AppError::not_found(format!("operation '{id}' not found")))?;

        let next = change.status();
        if !entry.operation.status.can_transition_to(next) {
            return Err(AppError::conflict(format!(
                "illegal transition {} -> {next} for operation '{id}'",
                entry.operation.status
            )));
        }
        entry.operation.apply(change);
        Ok(entry.operation.clone())
    }

    async fn update_operation_progress(
        &self,
        id: &str,
        current: i64,
        total: i64,
        message: &str,
    ) -> AppResult<()> {
        self.record_call(StoreCall::UpdateProgress)?;
        let mut inner = self.inner.write().await;
        let entry = live_entry(&mut inner, id)?;
        entry.operation.progress_current = current.max(0);
        entry.operation.progress_total = total.max(0);
        entry.operation.message = message.to_string();
        Ok(())
    }

    async fn add_operation_log(
        &self,
        id: &str,
        level: LogLevel,
        message: &str,
        details: Option<&str>,
    ) -> AppResult<OperationLog> {
        self.record_call(StoreCall::AddLog)?;
        let mut inner = self.inner.write().await;
        let entry = live_entry(&mut inner, id)?;
        let log = OperationLog {
            operation_id: id.to_string(),
            sequence: entry.next_sequence,
            level,
            message: message.to_string(),
            details: details.map(str::to_string),
            created_at: Utc::now(),
        };
        entry.next_sequence += 1;
        entry.logs.push(log.clone());
        Ok(log)
    }

    async fn get_operation_logs(
        &self,
        id: &str,
        tail: Option<u64>,
    ) -> AppResult<Vec<OperationLog>> {
        let inner = self.inner.read().await;
        let Some(entry) = inner.entries.get(id) else {
            return Ok(Vec::new());
        };
        let skip = match tail {
            Some(n) => entry.logs.len().saturating_sub(n as usize),
            None => 0,
        };
        Ok(entry.logs[skip..].to_vec())
    }

    async fn put_operation_state(
        &self,
        id: &str,
        kind: StateKind,
        value: &serde_json::Value,
    ) -> AppResult<()> {
        self.record_call(StoreCall::PutState)?;
        let mut inner = self.inner.write().await;
        let entry = inner
            .entries
            .get_mut(id)
            .ok_or_else(|| AppError::not_found(format!("operation '{id}' not found")))?;
        entry.state.insert(kind, value.clone());
        Ok(())
    }

    async fn get_operation_state(
        &self,
        id: &str,
        kind: StateKind,
    ) -> AppResult<Option<serde_json::Value>> {
        let inner = self.inner.read().await;
        Ok(inner
            .entries
            .get(id)
            .and_then(|e| e.state.get(&kind).cloned()))
    }

    async fn delete_operation_state(&self, id: &str, kind: StateKind) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.entries.get_mut(id) {
            entry.state.remove(&kind);
        }
        Ok(())
    }

    async fn delete_operations_before(&self, cutoff: DateTime<Utc>) -> AppResult<u64> {
        let mut inner = self.inner.write().await;
        let before = inner.entries.len();
        inner.entries.retain(|_, e| {
            let expired = e.operation.status.is_terminal()
                && e.operation.completed_at.is_some_and(|at| at < cutoff);
            !expired
        });
        Ok((before - inner.entries.len()) as u64)
    }
}
