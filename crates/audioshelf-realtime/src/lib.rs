//! # audioshelf-realtime
//!
//! Live operation events. Provides:
//!
//! - The `operation:*` event shapes pushed to clients
//! - The [`EventBroadcaster`] contract the scheduler publishes through
//! - [`EventHub`], an in-process fan-out with per-operation subscriptions

pub mod event;
pub mod hub;

pub use event::{OperationEvent, StatusDetails};
pub use hub::{EventBroadcaster, EventHub, Subscription};
