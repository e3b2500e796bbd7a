//! Application state shared across all handlers and middleware.

use std::sync::Arc;
use std::time::Instant;

use audioshelf_core::config::AppConfig;
use audioshelf_realtime::EventHub;
use audioshelf_worker::Dispatcher;

/// Application state containing all shared dependencies.
///
/// Passed to every Axum handler via `State<AppState>`.
/// Every field is cheap to clone.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<AppConfig>,
    /// Background operation scheduler
    pub dispatcher: Dispatcher,
    /// Live operation event fan-out
    pub events: EventHub,
    /// Process start, for uptime reporting
    pub started_at: Instant,
}

impl AppState {
    /// Build state from its parts.
    pub fn new(config: Arc<AppConfig>, dispatcher: Dispatcher, events: EventHub) -> Self {
        Self {
            config,
            dispatcher,
            events,
            started_at: Instant::now(),
        }
    }
}
