//! Background operation domain entities.

pub mod log;
pub mod model;
pub mod status;

pub use log::{LogLevel, OperationLog};
pub use model::{ActiveOperation, NewOperation, Operation, StatusChange};
pub use status::{OperationPriority, OperationStatus};
