//! Retention of finished operation records.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio_util::sync::CancellationToken;
use tracing;

use audioshelf_database::store::OperationStore;

use crate::command::{Command, CommandError};
use crate::reporter::ProgressReporter;

/// Operation type tag of [`PruneOperationsCommand`].
pub const PRUNE_OPERATIONS: &str = "prune_operations";

/// Removes finished operations older than the retention window.
#[derive(Debug)]
pub struct PruneOperationsCommand {
    store: Arc<dyn OperationStore>,
    keep_days: u32,
}

impl PruneOperationsCommand {
    /// Create a prune command keeping `keep_days` days of history.
    pub fn new(store: Arc<dyn OperationStore>, keep_days: u32) -> Self {
        Self { store, keep_days }
    }
}

#[async_trait]
impl Command for PruneOperationsCommand {
    fn operation_type(&self) -> &str {
        PRUNE_OPERATIONS
    }

    fn subject(&self) -> Option<String> {
        Some(format!("older than {} days", self.keep_days))
    }

    async fn execute(
        &self,
        _cancel: CancellationToken,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Result<(), CommandError> {
        let cutoff = Utc::now() - Duration::days(i64::from(self.keep_days));
        reporter
            .update_progress(0, 1, "removing finished operations")
            .await;

        if reporter.is_canceled() {
            return Err(CommandError::Canceled);
        }

        tracing::info!("Pruning operations finished before {}", cutoff);
        let removed = self.store.delete_operations_before(cutoff).await?;
        tracing::info!("Pruned {} finished operations", removed);

        reporter
            .info(&format!("removed {removed} operations finished before {cutoff}"))
            .await;
        reporter
            .update_progress(1, 1, &format!("removed {removed} operations"))
            .await;
        Ok(())
    }
}
