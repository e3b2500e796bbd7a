//! PostgreSQL operation store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use audioshelf_core::error::{AppError, ErrorKind};
use audioshelf_core::result::AppResult;
use audioshelf_entity::operation::{
    LogLevel, NewOperation, Operation, OperationLog, OperationStatus, StatusChange,
};

use crate::store::{OperationStore, StateKind};

/// [`OperationStore`] persisted in the `operations`, `operation_logs` and
/// `operation_state` tables.
#[derive(Debug, Clone)]
pub struct PgOperationStore {
    pool: PgPool,
}

impl PgOperationStore {
    /// Create a new store over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Distinguish a missing record from a terminal one after a guarded
    /// write matched no rows.
    async fn not_live(&self, id: &str) -> AppError {
        match self.get_operation(id).await {
            Ok(Some(op)) => {
                AppError::conflict(format!("operation '{id}' is already {}", op.status))
            }
            Ok(None) => AppError::not_found(format!("operation '{id}' not found")),
            Err(e) => e,
        }
    }
}

fn db_err(message: &'static str) -> impl FnOnce(sqlx::Error) -> AppError {
    move |e| AppError::with_source(ErrorKind::Database, message, e)
}

#[async_trait]
impl OperationStore for PgOperationStore {
    async fn create_operation(&self, new: &NewOperation) -> AppResult<Operation> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_err("Failed to begin transaction"))?;

        let existing: Option<OperationStatus> =
            sqlx::query_scalar("SELECT status FROM operations WHERE id = $1 FOR UPDATE")
                .bind(&new.id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_err("Failed to look up operation"))?;

        match existing {
            Some(status) if !status.is_terminal() => {
                return Err(AppError::conflict(format!(
                    "operation '{}' is already {status}",
                    new.id
                )));
            }
            Some(_) => {
                // Logs and state cascade with the record.
                sqlx::query("DELETE FROM operations WHERE id = $1")
                    .bind(&new.id)
                    .execute(&mut *tx)
                    .await
                    .map_err(db_err("Failed to replace finished operation"))?;
            }
            None => {}
        }

        let operation = Operation::pending(new, Utc::now());
        let created = sqlx::query_as::<_, Operation>(
            "INSERT INTO operations (id, operation_type, priority, status, progress_current, \
             progress_total, message, subject, created_at) \
             VALUES ($1, $2, $3, $4, 0, 0, $5, $6, $7) RETURNING *",
        )
        .bind(&operation.id)
        .bind(&operation.operation_type)
        .bind(operation.priority)
        .bind(operation.status)
        .bind(&operation.message)
        .bind(&operation.subject)
        .bind(operation.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err("Failed to create operation"))?;

        tx.commit()
            .await
            .map_err(db_err("Failed to commit operation"))?;
        Ok(created)
    }

    async fn get_operation(&self, id: &str) -> AppResult<Option<Operation>> {
        sqlx::query_as::<_, Operation>("SELECT * FROM operations WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err("Failed to find operation"))
    }

    async fn recent_operations(&self, limit: u32) -> AppResult<Vec<Operation>> {
        sqlx::query_as::<_, Operation>(
            "SELECT * FROM operations ORDER BY created_at DESC, id DESC LIMIT $1",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Failed to list operations"))
    }

    async fn unfinished_operations(&self) -> AppResult<Vec<Operation>> {
        sqlx::query_as::<_, Operation>(
            "SELECT * FROM operations WHERE status IN ('pending', 'running') \
             ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Failed to list unfinished operations"))
    }

    async fn update_operation_status(
        &self,
        id: &str,
        change: &StatusChange,
    ) -> AppResult<Operation> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_err("Failed to begin transaction"))?;

        let mut operation =
            sqlx::query_as::<_, Operation>("SELECT * FROM operations WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_err("Failed to find operation"))?
                .ok_or_else(|| AppError::not_found(format!("operation '{id}' not found")))?;

        let next = change.status();
        if !operation.status.can_transition_to(next) {
            return Err(AppError::conflict(format!(
                "illegal transition {} -> {next} for operation '{id}'",
                operation.status
            )));
        }
        operation.apply(change);

        sqlx::query(
            "UPDATE operations SET status = $2, message = $3, error = $4, \
             started_at = $5, completed_at = $6 WHERE id = $1",
        )
        .bind(id)
        .bind(operation.status)
        .bind(&operation.message)
        .bind(&operation.error)
        .bind(operation.started_at)
        .bind(operation.completed_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err("Failed to update operation status"))?;

        tx.commit()
            .await
            .map_err(db_err("Failed to commit status change"))?;
        Ok(operation)
    }

    async fn update_operation_progress(
        &self,
        id: &str,
        current: i64,
        total: i64,
        message: &str,
    ) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE operations SET progress_current = $2, progress_total = $3, message = $4 \
             WHERE id = $1 AND status IN ('pending', 'running')",
        )
        .bind(id)
        .bind(current.max(0))
        .bind(total.max(0))
        .bind(message)
        .execute(&self.pool)
        .await
        .map_err(db_err("Failed to update operation progress"))?;

        if result.rows_affected() == 0 {
            return Err(self.not_live(id).await);
        }
        Ok(())
    }

    async fn add_operation_log(
        &self,
        id: &str,
        level: LogLevel,
        message: &str,
        details: Option<&str>,
    ) -> AppResult<OperationLog> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_err("Failed to begin transaction"))?;

        // Locking the parent row serializes sequence assignment.
        let status: Option<OperationStatus> =
            sqlx::query_scalar("SELECT status FROM operations WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_err("Failed to look up operation"))?;
        match status {
            None => return Err(AppError::not_found(format!("operation '{id}' not found"))),
            Some(s) if s.is_terminal() => {
                return Err(AppError::conflict(format!("operation '{id}' is already {s}")));
            }
            Some(_) => {}
        }

        let log = sqlx::query_as::<_, OperationLog>(
            "INSERT INTO operation_logs (operation_id, sequence, level, message, details, created_at) \
             SELECT $1, COALESCE(MAX(sequence), 0) + 1, $2, $3, $4, NOW() \
             FROM operation_logs WHERE operation_id = $1 \
             RETURNING *",
        )
        .bind(id)
        .bind(level)
        .bind(message)
        .bind(details)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err("Failed to append operation log"))?;

        tx.commit()
            .await
            .map_err(db_err("Failed to commit operation log"))?;
        Ok(log)
    }

    async fn get_operation_logs(
        &self,
        id: &str,
        tail: Option<u64>,
    ) -> AppResult<Vec<OperationLog>> {
        let query = match tail {
            Some(n) => sqlx::query_as::<_, OperationLog>(
                "SELECT * FROM ( \
                    SELECT * FROM operation_logs WHERE operation_id = $1 \
                    ORDER BY sequence DESC LIMIT $2 \
                 ) t ORDER BY sequence ASC",
            )
            .bind(id)
            .bind(i64::try_from(n).unwrap_or(i64::MAX)),
            None => sqlx::query_as::<_, OperationLog>(
                "SELECT * FROM operation_logs WHERE operation_id = $1 ORDER BY sequence ASC",
            )
            .bind(id),
        };

        query
            .fetch_all(&self.pool)
            .await
            .map_err(db_err("Failed to fetch operation logs"))
    }

    async fn put_operation_state(
        &self,
        id: &str,
        kind: StateKind,
        value: &serde_json::Value,
    ) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO operation_state (operation_id, kind, value, updated_at) \
             VALUES ($1, $2, $3, NOW()) \
             ON CONFLICT (operation_id, kind) DO UPDATE SET value = $3, updated_at = NOW()",
        )
        .bind(id)
        .bind(kind.as_str())
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(db_err("Failed to save operation state"))?;
        Ok(())
    }

    async fn get_operation_state(
        &self,
        id: &str,
        kind: StateKind,
    ) -> AppResult<Option<serde_json::Value>> {
        sqlx::query_scalar(
            "SELECT value FROM operation_state WHERE operation_id = $1 AND kind = $2",
        )
        .bind(id)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("Failed to load operation state"))
    }

    async fn delete_operation_state(&self, id: &str, kind: StateKind) -> AppResult<()> {
        sqlx::query("DELETE FROM operation_state WHERE operation_id = $1 AND kind = $2")
            .bind(id)
            .bind(kind.as_str())
            .execute(&self.pool)
            .await
            .map_err(db_err("Failed to delete operation state"))?;
        Ok(())
    }

    async fn delete_operations_before(&self, cutoff: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query(
            "DELETE FROM operations \
             WHERE status IN ('completed', 'failed', 'canceled') AND completed_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(db_err("Failed to prune operations"))?;
        Ok(result.rows_affected())
    }
}
