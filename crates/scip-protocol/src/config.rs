//! Protocol timing configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timeouts used by command exchanges and drains
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Wait for each reply line of a command exchange (milliseconds)
    pub reply_timeout_ms: u64,

    /// Wait for each byte while draining stale traffic (milliseconds)
    pub drain_each_timeout_ms: u64,

    /// Hard cap on a whole drain (milliseconds); unset means only the
    /// per-byte wait bounds it
    pub drain_limit_ms: Option<u64>,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            reply_timeout_ms: 1000,
            drain_each_timeout_ms: 100,
            drain_limit_ms: None,
        }
    }
}

impl ProtocolConfig {
    /// Short timeouts for simulated or loopback transports
    pub fn fast() -> Self {
        Self {
            reply_timeout_ms: 50,
            drain_each_timeout_ms: 10,
            drain_limit_ms: Some(500),
        }
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    pub fn drain_each_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_each_timeout_ms)
    }

    pub fn drain_limit(&self) -> Option<Duration> {
        self.drain_limit_ms.map(Duration::from_millis)
    }
}
