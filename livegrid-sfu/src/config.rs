use serde::{Deserialize, Serialize};

/// SFU tuning knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SfuConfig {
    /// Hard cap on subscribers per published track.
    pub max_subscribers_per_stream: usize,
    /// Frames buffered per subscriber before the forwarder drops.
    pub subscriber_channel_capacity: usize,
}

impl Default for SfuConfig {
    fn default() -> Self {
        Self {
            max_subscribers_per_stream: 1000,
            subscriber_channel_capacity: 256,
        }
    }
}
