//! Session configuration

use scip_protocol::ProtocolConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Command exchange timeouts
    pub protocol: ProtocolConfig,

    /// Wait for the first line of a data reply (milliseconds)
    pub first_line_timeout_ms: u64,

    /// Wait for each following line (milliseconds)
    pub each_line_timeout_ms: u64,

    /// Added to the scaled round trip before switching the host baud rate
    pub baud_switch_margin_ms: u64,

    /// Data replies carry a timestamp line after the status line
    pub data_timestamp: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            protocol: ProtocolConfig::default(),
            first_line_timeout_ms: 1000,
            each_line_timeout_ms: 200,
            baud_switch_margin_ms: 10,
            data_timestamp: true,
        }
    }
}

impl SessionConfig {
    /// Short timeouts for simulated sensors
    pub fn fast() -> Self {
        Self {
            protocol: ProtocolConfig::fast(),
            first_line_timeout_ms: 50,
            each_line_timeout_ms: 20,
            baud_switch_margin_ms: 0,
            ..Default::default()
        }
    }

    /// Generous timeouts for slow links (4800/9600 baud)
    pub fn slow_link() -> Self {
        Self {
            protocol: ProtocolConfig {
                reply_timeout_ms: 3000,
                drain_each_timeout_ms: 300,
                drain_limit_ms: None,
            },
            first_line_timeout_ms: 3000,
            each_line_timeout_ms: 600,
            ..Default::default()
        }
    }

    pub fn first_line_timeout(&self) -> Duration {
        Duration::from_millis(self.first_line_timeout_ms)
    }

    pub fn each_line_timeout(&self) -> Duration {
        Duration::from_millis(self.each_line_timeout_ms)
    }

    pub fn baud_switch_margin(&self) -> Duration {
        Duration::from_millis(self.baud_switch_margin_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_keep_timestamp_line() {
        assert!(SessionConfig::default().data_timestamp);
        assert!(SessionConfig::fast().data_timestamp);
        assert!(SessionConfig::slow_link().first_line_timeout() > SessionConfig::default().first_line_timeout());
    }
}
