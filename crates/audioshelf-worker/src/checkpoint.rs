//! Resumable checkpoints and saved parameters.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use audioshelf_core::result::AppResult;
use audioshelf_database::store::{OperationStore, StateKind};

/// Whether the checkpoint belongs to a run that is still going.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointStatus {
    Running,
    Interrupted,
}

/// Where a multi-phase operation got to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub operation_id: String,
    #[serde(rename = "type")]
    pub operation_type: String,
    pub phase: String,
    pub phase_index: u32,
    pub phase_total: u32,
    pub status: CheckpointStatus,
    pub updated_at: DateTime<Utc>,
}

/// Handle to the auxiliary state of one operation.
#[derive(Debug, Clone)]
pub struct OperationState {
    store: Arc<dyn OperationStore>,
    operation_id: String,
    operation_type: String,
}

impl OperationState {
    pub fn new(
        store: Arc<dyn OperationStore>,
        operation_id: impl Into<String>,
        operation_type: impl Into<String>,
    ) -> Self {
        Self {
            store,
            operation_id: operation_id.into(),
            operation_type: operation_type.into(),
        }
    }

    /// Record that the operation has reached `phase` (`phase_index` of `phase_total`).
    pub async fn save_checkpoint(
        &self,
        phase: &str,
        phase_index: u32,
        phase_total: u32,
    ) -> AppResult<()> {
        let checkpoint = Checkpoint {
            operation_id: self.operation_id.clone(),
            operation_type: self.operation_type.clone(),
            phase: phase.to_string(),
            phase_index,
            phase_total,
            status: CheckpointStatus::Running,
            updated_at: Utc::now(),
        };
        self.put(StateKind::Checkpoint, &checkpoint).await
    }

    /// The last saved checkpoint, if any.
    pub async fn load_checkpoint(&self) -> AppResult<Option<Checkpoint>> {
        self.get(StateKind::Checkpoint).await
    }

    /// Flip a saved checkpoint to `interrupted`. Returns whether one existed.
    pub async fn mark_interrupted(&self) -> AppResult<bool> {
        let Some(mut checkpoint) = self.load_checkpoint().await? else {
            return Ok(false);
        };
        checkpoint.status = CheckpointStatus::Interrupted;
        checkpoint.updated_at = Utc::now();
        self.put(StateKind::Checkpoint, &checkpoint).await?;
        Ok(true)
    }

    /// Persist the parameters the operation was started with.
    pub async fn save_params<T: Serialize>(&self, params: &T) -> AppResult<()> {
        self.put(StateKind::Params, params).await
    }

    /// Load previously saved parameters.
    pub async fn load_params<T: DeserializeOwned>(&self) -> AppResult<Option<T>> {
        self.get(StateKind::Params).await
    }

    /// Drop checkpoint and parameters.
    pub async fn clear(&self) -> AppResult<()> {
        self.store
            .delete_operation_state(&self.operation_id, StateKind::Checkpoint)
            .await?;
        self.store
            .delete_operation_state(&self.operation_id, StateKind::Params)
            .await
    }

    async fn put<T: Serialize>(&self, kind: StateKind, value: &T) -> AppResult<()> {
        let value = serde_json::to_value(value)?;
        self.store
            .put_operation_state(&self.operation_id, kind, &value)
            .await
    }

    async fn get<T: DeserializeOwned>(&self, kind: StateKind) -> AppResult<Option<T>> {
        match self.store.get_operation_state(&self.operation_id, kind).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }
}
