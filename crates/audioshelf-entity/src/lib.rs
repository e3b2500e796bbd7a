//! # audioshelf-entity
//!
//! Domain entity models for the Audioshelf operation subsystem. Every
//! struct in this crate represents a stored record or a domain value
//! object. All entities derive `Debug`, `Clone`, `Serialize`,
//! `Deserialize`, and stored entities additionally derive `sqlx::FromRow`.

pub mod operation;

pub use operation::{
    ActiveOperation, LogLevel, NewOperation, Operation, OperationLog, OperationPriority,
    OperationStatus, StatusChange,
};
