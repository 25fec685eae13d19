// ── Runtime cache configuration ──
//
// These knobs describe how long unused entries live and which external
// triggers cause refetches. The CLI builds a `CacheConfig` and hands it
// in; core never reads config files.

use std::time::Duration;

use crate::error::CoreError;

/// Configuration for one [`QueryClient`](crate::QueryClient).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// How long an entry with no subscribers survives before eviction.
    pub keep_unused_for: Duration,
    /// Period of the background eviction sweep.
    pub sweep_interval: Duration,
    /// Refetch subscribed entries when the consumer regains focus.
    pub refetch_on_focus: bool,
    /// Refetch subscribed entries when connectivity returns.
    pub refetch_on_reconnect: bool,
    /// Quiet period before a debounced descriptor is published.
    pub debounce: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            keep_unused_for: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(5),
            refetch_on_focus: true,
            refetch_on_reconnect: true,
            debounce: Duration::from_millis(350),
        }
    }
}

impl CacheConfig {
    /// Reject settings the background tasks cannot run with.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.sweep_interval.is_zero() {
            return Err(CoreError::Config {
                message: "sweep interval must be greater than zero".into(),
            });
        }
        Ok(())
    }
}
