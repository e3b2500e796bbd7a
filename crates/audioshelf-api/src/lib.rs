//! # audioshelf-api
//!
//! HTTP API layer for the Audioshelf operation subsystem built on Axum.
//!
//! Provides operation inspection and cancellation endpoints, the
//! Server-Sent Events stream of live operation events, middleware
//! (CORS, request logging), DTOs, and error mapping.

pub mod app;
pub mod dto;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod state;

pub use app::build_app;
pub use error::ApiError;
pub use state::AppState;
