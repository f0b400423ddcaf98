use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub keep_alive_secs: u64,
    /// Depth of the client's request channel.
    pub request_capacity: usize,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "broker.hivemq.com".to_string(),
            port: 1883,
            keep_alive_secs: 100,
            request_capacity: 32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicConfig {
    pub root: String,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            root: "tank".to_string(),
        }
    }
}

/// Delays between connection attempts.
///
/// `short_delay_ms` follows an orderly disconnect of an accepted session,
/// `long_delay_ms` follows a refused or timed out attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub short_delay_ms: u64,
    pub long_delay_ms: u64,
    pub resolve_retry_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            short_delay_ms: 1_000,
            long_delay_ms: 10_000,
            resolve_retry_ms: 10_000,
        }
    }
}

impl ReconnectConfig {
    pub fn short_delay(&self) -> Duration {
        Duration::from_millis(self.short_delay_ms)
    }

    pub fn long_delay(&self) -> Duration {
        Duration::from_millis(self.long_delay_ms)
    }

    pub fn resolve_retry(&self) -> Duration {
        Duration::from_millis(self.resolve_retry_ms)
    }
}
