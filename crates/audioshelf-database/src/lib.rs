//! # audioshelf-database
//!
//! The [`OperationStore`] collaborator contract, an in-memory
//! implementation, and the PostgreSQL implementation with its connection
//! pool and embedded schema.

pub mod connection;
pub mod memory;
pub mod repositories;
pub mod store;

pub use connection::DatabasePool;
pub use memory::{MemoryOperationStore, StoreCall};
pub use repositories::PgOperationStore;
pub use store::{OperationStore, StateKind};
