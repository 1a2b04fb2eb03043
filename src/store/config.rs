use serde::{Deserialize, Serialize};

/// Tuning for the store's notification channels.
///
/// "modified" and per-collection "changed" subscribers are unbounded and
/// never lose a message. Only the "cleared" channel is bounded: a subscriber
/// that falls more than its capacity behind observes `RecvError::Lagged` and
/// skips the oldest events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Capacity of the "cleared" channel.
    pub clear_channel_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            clear_channel_capacity: 16,
        }
    }
}

impl StoreConfig {
    pub fn with_clear_channel_capacity(mut self, capacity: usize) -> Self {
        self.clear_channel_capacity = capacity;
        self
    }
}
