//! Real-time event stream configuration.

use serde::{Deserialize, Serialize};

/// Event broadcaster and SSE stream configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Buffer size of the broadcast channel. Slow subscribers that fall
    /// further behind than this lose the oldest events.
    #[serde(default = "default_channel_buffer")]
    pub channel_buffer_size: usize,
    /// Keep-alive interval for SSE clients, in seconds.
    #[serde(default = "default_heartbeat")]
    pub heartbeat_seconds: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            channel_buffer_size: default_channel_buffer(),
            heartbeat_seconds: default_heartbeat(),
        }
    }
}

fn default_channel_buffer() -> usize {
    256
}

fn default_heartbeat() -> u64 {
    15
}
