//! Gate configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Configuration for one startup gate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateConfig {
    /// How long to wait for participants before a degraded start
    #[serde(rename = "timeout-ms", default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Capacity of the request channel
    #[serde(rename = "channel-buffer", default = "default_channel_buffer")]
    pub channel_buffer: usize,
}

fn default_timeout_ms() -> u64 {
    debug!("default_timeout_ms: called");
    10_000
}

fn default_channel_buffer() -> usize {
    debug!("default_channel_buffer: called");
    64
}

impl Default for GateConfig {
    fn default() -> Self {
        debug!("GateConfig::default: called");
        Self {
            timeout_ms: default_timeout_ms(),
            channel_buffer: default_channel_buffer(),
        }
    }
}

impl GateConfig {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout_ms: timeout.as_millis() as u64,
            ..Self::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GateConfig::default();
        assert_eq!(config.timeout(), Duration::from_secs(10));
        assert_eq!(config.channel_buffer, 64);
    }

    #[test]
    fn test_partial_yaml() {
        let config: GateConfig = serde_yaml::from_str("timeout-ms: 2500").unwrap();
        assert_eq!(config.timeout(), Duration::from_millis(2500));
        assert_eq!(config.channel_buffer, 64);
    }
}
