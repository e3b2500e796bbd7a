//! Route definitions for the Audioshelf HTTP API.
//!
//! All routes are mounted under `/api`. The router receives `AppState`
//! and passes it to all handlers via Axum's `State` extractor.

use axum::Router;
use axum::routing::{get, post};

use crate::handlers;
use crate::state::AppState;

/// Build the Axum router with all routes.
///
/// Layers are applied by [`crate::app::build_app`].
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .merge(operation_routes())
        .merge(event_routes())
        .merge(health_routes());

    Router::new().nest("/api", api_routes).with_state(state)
}

/// Operation snapshots, logs, cancellation and maintenance
fn operation_routes() -> Router<AppState> {
    Router::new()
        .route("/operations", get(handlers::operations::list_operations))
        .route(
            "/operations/active",
            get(handlers::operations::active_operations),
        )
        .route(
            "/operations/metrics",
            get(handlers::operations::operation_metrics),
        )
        .route(
            "/operations/prune",
            post(handlers::operations::prune_operations),
        )
        .route("/operations/{id}", get(handlers::operations::get_operation))
        .route(
            "/operations/{id}/logs",
            get(handlers::operations::get_operation_logs),
        )
        .route(
            "/operations/{id}/cancel",
            post(handlers::operations::cancel_operation),
        )
}

/// Live event stream
fn event_routes() -> Router<AppState> {
    Router::new().route("/events", get(handlers::events::event_stream))
}

/// Health check endpoints
fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(handlers::health::health_check))
}
