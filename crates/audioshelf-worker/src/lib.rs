//! Background operation scheduling for Audioshelf.
//!
//! This crate provides:
//! - A [`Dispatcher`] that records, queues and runs prioritized operations
//!   on a fixed pool of worker loops
//! - The [`Command`] trait implemented by every operation body
//! - A [`ProgressReporter`] through which bodies report progress, write
//!   log lines and observe cancellation
//! - Checkpoint storage, per-type metrics, and a cron scheduler for
//!   periodic maintenance operations

pub mod checkpoint;
pub mod command;
pub mod dispatcher;
pub mod jobs;
pub mod metrics;
pub mod queue;
pub mod registry;
pub mod reporter;
mod runner;
pub mod scheduler;

pub use checkpoint::{Checkpoint, CheckpointStatus, OperationState};
pub use command::{Command, CommandError, FnCommand};
pub use dispatcher::{Dispatcher, EnqueueOptions};
pub use metrics::TypeMetricsSnapshot;
pub use reporter::{OperationReporter, ProgressReporter};
pub use scheduler::MaintenanceScheduler;
