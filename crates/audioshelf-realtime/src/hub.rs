//! In-process event fan-out.

use std::fmt;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use audioshelf_core::result::AppResult;

use crate::event::OperationEvent;

/// Best-effort publisher of operation events.
///
/// Publishing never blocks. Callers log and drop errors; an event that
/// fails to publish is never fatal to the operation that produced it.
pub trait EventBroadcaster: Send + Sync + fmt::Debug {
    /// Push one event to every interested subscriber.
    fn publish(&self, event: OperationEvent) -> AppResult<()>;
}

/// Broadcast hub backed by a bounded [`broadcast`] channel.
///
/// Slow subscribers skip ahead rather than holding publishers back.
#[derive(Debug, Clone)]
pub struct EventHub {
    tx: broadcast::Sender<OperationEvent>,
}

impl EventHub {
    /// Create a hub whose subscribers buffer up to `buffer_size` events.
    pub fn new(buffer_size: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer_size.max(1));
        Self { tx }
    }

    /// Subscribe to all events, or only to those of one operation.
    pub fn subscribe(&self, operation_id: Option<String>) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            filter: operation_id,
        }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl EventBroadcaster for EventHub {
    fn publish(&self, event: OperationEvent) -> AppResult<()> {
        // Sending with no subscribers is not a failure.
        let _ = self.tx.send(event);
        Ok(())
    }
}

/// A receiver of hub events with an optional per-operation filter.
#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<OperationEvent>,
    filter: Option<String>,
}

impl Subscription {
    /// Wait for the next matching event. Returns `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<OperationEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    if self.matches(&event) {
                        return Some(event);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event subscriber lagged, dropping events");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// The operation this subscription is limited to, if any.
    pub fn filter(&self) -> Option<&str> {
        self.filter.as_deref()
    }

    fn matches(&self, event: &OperationEvent) -> bool {
        self.filter
            .as_deref()
            .is_none_or(|id| event.operation_id() == id)
    }
}
