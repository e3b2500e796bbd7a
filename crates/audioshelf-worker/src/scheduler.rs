//! Cron scheduler for periodic maintenance operations.

use std::sync::Arc;

use tokio_cron_scheduler::{Job as CronJob, JobScheduler};
use tracing;

use audioshelf_core::config::RetentionConfig;
use audioshelf_core::error::AppError;
use audioshelf_core::types::OperationId;
use audioshelf_entity::operation::OperationPriority;

use crate::dispatcher::Dispatcher;
use crate::jobs::PruneOperationsCommand;
use crate::jobs::prune::PRUNE_OPERATIONS;

/// Cron-based scheduler that enqueues maintenance operations.
pub struct MaintenanceScheduler {
    /// The underlying job scheduler
    scheduler: JobScheduler,
    /// Dispatcher that runs the scheduled work
    dispatcher: Dispatcher,
}

impl std::fmt::Debug for MaintenanceScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaintenanceScheduler").finish()
    }
}

impl MaintenanceScheduler {
    /// Create a new maintenance scheduler
    pub async fn new(dispatcher: Dispatcher) -> Result<Self, AppError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| AppError::internal(format!("Failed to create scheduler: {}", e)))?;

        Ok(Self {
            scheduler,
            dispatcher,
        })
    }

    /// Enqueue a `prune_operations` run at low priority on the retention schedule.
    pub async fn register_retention(&self, retention: &RetentionConfig) -> Result<(), AppError> {
        let dispatcher = self.dispatcher.clone();
        let keep_days = retention.keep_days;

        let job = CronJob::new_async(retention.schedule.as_str(), move |_uuid, _lock| {
            let dispatcher = dispatcher.clone();
            Box::pin(async move {
                let id = format!("{PRUNE_OPERATIONS}-{}", OperationId::generate());
                let command = Arc::new(PruneOperationsCommand::new(dispatcher.store(), keep_days));
                tracing::debug!("Scheduling {}", id);
                if let Err(e) = dispatcher
                    .enqueue(id, OperationPriority::Low, command)
                    .await
                {
                    tracing::error!("Failed to enqueue {}: {}", PRUNE_OPERATIONS, e);
                }
            })
        })
        .map_err(|e| {
            AppError::internal(format!("Failed to create retention schedule: {}", e))
        })?;

        self.scheduler.add(job).await.map_err(|e| {
            AppError::internal(format!("Failed to add retention schedule: {}", e))
        })?;

        tracing::info!(
            "Registered: {} ('{}', keep {} days)",
            PRUNE_OPERATIONS,
            retention.schedule,
            keep_days
        );
        Ok(())
    }

    /// Start the scheduler
    pub async fn start(&self) -> Result<(), AppError> {
        self.scheduler
            .start()
            .await
            .map_err(|e| AppError::internal(format!("Failed to start scheduler: {}", e)))?;

        tracing::info!("Maintenance scheduler started");
        Ok(())
    }

    /// Shutdown the scheduler
    pub async fn shutdown(&mut self) -> Result<(), AppError> {
        self.scheduler
            .shutdown()
            .await
            .map_err(|e| AppError::internal(format!("Failed to shutdown scheduler: {}", e)))?;

        tracing::info!("Maintenance scheduler shut down");
        Ok(())
    }
}
