//! Persistent store implementations.

pub mod operation;

pub use operation::PgOperationStore;
