//! Engine configuration.
//!
//! The engine consumes configuration, it does not own it: tracked hosts,
//! the UDP listen address, the poll cadence and the backoff policy all come
//! from the embedding application (deserializable from whatever format it
//! uses).

use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;

use musiccast_state::DEFAULT_QUEUE_CAPACITY;

/// The well-known UDP port MusicCast controllers listen on.
pub const DEFAULT_EVENT_PORT: u16 = 41100;

/// One tracked device, by host (IP or `ip:port`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct DeviceEntry {
    pub host: String,
}

impl From<&str> for DeviceEntry {
    fn from(host: &str) -> Self {
        Self { host: host.to_string() }
    }
}

impl From<String> for DeviceEntry {
    fn from(host: String) -> Self {
        Self { host }
    }
}

/// Backoff policy for a device's failing poll loop.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay after the first failure, in milliseconds.
    pub initial_ms: u64,
    /// Ceiling for the doubling delay, in milliseconds.
    pub max_ms: u64,
    /// Consecutive failures after which a device is flagged unreachable.
    pub failure_threshold: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: 1_000,
            max_ms: 60_000,
            failure_threshold: 3,
        }
    }
}

impl BackoffConfig {
    /// Delay before the next attempt after `failures` consecutive failures.
    ///
    /// Doubles from `initial_ms` up to the `max_ms` ceiling.
    pub fn delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        let ms = self
            .initial_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_ms);
        Duration::from_millis(ms)
    }
}

/// Full engine configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Hosts of the devices to track.
    pub devices: Vec<DeviceEntry>,
    /// Local address for the UDP notification socket.
    pub listen_addr: SocketAddr,
    /// Steady-state poll interval per device, in seconds.
    pub poll_interval_secs: u64,
    pub backoff: BackoffConfig,
    /// Per-subscriber notification queue capacity.
    pub dispatch_queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            devices: Vec::new(),
            listen_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_EVENT_PORT)),
            poll_interval_secs: 60,
            backoff: BackoffConfig::default(),
            dispatch_queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl EngineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.listen_addr.port(), 41100);
        assert_eq!(config.poll_interval(), Duration::from_secs(60));
        assert_eq!(config.backoff.failure_threshold, 3);
        assert_eq!(config.dispatch_queue_capacity, 64);
    }

    #[test]
    fn test_backoff_doubles_to_ceiling() {
        let backoff = BackoffConfig {
            initial_ms: 1_000,
            max_ms: 8_000,
            failure_threshold: 3,
        };
        assert_eq!(backoff.delay(1), Duration::from_millis(1_000));
        assert_eq!(backoff.delay(2), Duration::from_millis(2_000));
        assert_eq!(backoff.delay(3), Duration::from_millis(4_000));
        assert_eq!(backoff.delay(4), Duration::from_millis(8_000));
        assert_eq!(backoff.delay(10), Duration::from_millis(8_000));
        // a huge streak must not overflow
        assert_eq!(backoff.delay(u32::MAX), Duration::from_millis(8_000));
    }

    #[test]
    fn test_deserialization() {
        let config: EngineConfig = serde_json::from_str(
            r#"{
                "devices": ["192.168.1.50", "192.168.1.61"],
                "listen_addr": "0.0.0.0:41200",
                "poll_interval_secs": 30,
                "backoff": {"initial_ms": 500, "failure_threshold": 5}
            }"#,
        )
        .unwrap();
        assert_eq!(config.devices.len(), 2);
        assert_eq!(config.devices[0].host, "192.168.1.50");
        assert_eq!(config.listen_addr.port(), 41200);
        assert_eq!(config.backoff.initial_ms, 500);
        assert_eq!(config.backoff.failure_threshold, 5);
        // omitted fields keep their defaults
        assert_eq!(config.backoff.max_ms, 60_000);
        assert_eq!(config.dispatch_queue_capacity, 64);
    }
}
