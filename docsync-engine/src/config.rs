//! Engine configuration.

use std::time::Duration;

/// Tunables for the engine-side schedulers.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Coalescing window for the delta batcher.
    pub batch_window: Duration,
    /// How long a fan-out message may stay unacknowledged before a retry.
    pub ack_timeout: Duration,
    /// Retry budget per pending acknowledgement.
    pub ack_max_retries: u32,
    /// How often the awareness reaper runs.
    pub awareness_reap_interval: Duration,
    /// Idle time after which an awareness entry is reaped.
    pub awareness_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_window: Duration::from_millis(50),
            ack_timeout: Duration::from_secs(5),
            ack_max_retries: 3,
            awareness_reap_interval: Duration::from_secs(30),
            awareness_timeout: Duration::from_secs(30),
        }
    }
}
