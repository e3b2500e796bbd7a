//! # audioshelf-core
//!
//! Core crate for Audioshelf. Contains configuration schemas, typed
//! identifiers, and the unified error system shared by the operation
//! scheduler and everything built on top of it.
//!
//! This crate has **no** internal dependencies on other Audioshelf crates.

pub mod config;
pub mod error;
pub mod result;
pub mod types;

pub use error::AppError;
pub use result::AppResult;
