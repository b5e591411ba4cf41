//! Engine configuration
//!
//! Every field has a default so a partial config file only needs to name what
//! it changes.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use cid_protocol::UpstreamDialect;
use serde::{Deserialize, Serialize};

use crate::error::RelayError;

/// A `host:port` pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Host name or IP address
    pub host: String,
    /// TCP port
    pub port: u16,
}

impl Endpoint {
    /// Create an endpoint
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| RelayError::Config(format!("endpoint {s:?} is not host:port")))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| RelayError::Config(format!("invalid port in endpoint {s:?}")))?;
        if host.is_empty() {
            return Err(RelayError::Config(format!("missing host in endpoint {s:?}")));
        }
        Ok(Self::new(host, port))
    }
}

/// Network timeouts, all in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upstream connect timeout
    pub connect_ms: u64,
    /// Upstream and panel write timeout
    pub write_ms: u64,
    /// Close a panel connection after this long without data
    pub read_idle_ms: u64,
    /// Wait this long for an upstream ACK after each frame; `None` disables ACK handling
    pub ack_ms: Option<u64>,
    /// Bound applied by callers of the queue stats request
    pub stats_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: 5_000,
            write_ms: 5_000,
            read_idle_ms: 300_000,
            ack_ms: None,
            stats_ms: 500,
        }
    }
}

impl TimeoutConfig {
    /// Upstream connect timeout
    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    /// Write timeout
    pub fn write(&self) -> Duration {
        Duration::from_millis(self.write_ms)
    }

    /// Panel idle timeout
    pub fn read_idle(&self) -> Duration {
        Duration::from_millis(self.read_idle_ms)
    }

    /// Upstream acknowledgement timeout
    pub fn ack(&self) -> Option<Duration> {
        self.ack_ms.map(Duration::from_millis)
    }

    /// Stats request bound
    pub fn stats(&self) -> Duration {
        Duration::from_millis(self.stats_ms)
    }
}

/// Exponential backoff for upstream reconnection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt (ms)
    pub initial_delay_ms: u64,
    /// Upper bound on the delay (ms)
    pub max_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
        }
    }
}

impl ReconnectConfig {
    /// Delay before reconnection attempt number `attempt` (0-based)
    ///
    /// `delay = min(initial * 2^attempt, max)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
        let delay = self.initial_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.max_delay_ms.max(self.initial_delay_ms)))
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetranslatorConfig {
    /// Address the panel listener binds to
    pub listen: Endpoint,
    /// Upstream monitoring receiver
    pub upstream: Endpoint,
    /// Outbound queue capacity
    pub queue_capacity: usize,
    /// Events kept in memory before the oldest are evicted
    pub history_capacity: usize,
    /// Maximum events returned by the recent-events view
    pub recent_limit: usize,
    /// Per-feed broadcast buffer for live subscribers
    pub publisher_capacity: usize,
    /// Reply ACK / NAK to panels for each frame
    pub ack_panels: bool,
    /// Upstream frame encoding
    pub dialect: UpstreamDialect,
    /// Network timeouts
    pub timeouts: TimeoutConfig,
    /// Upstream reconnection backoff
    pub reconnect: ReconnectConfig,
}

impl Default for RetranslatorConfig {
    fn default() -> Self {
        Self {
            listen: Endpoint::new("0.0.0.0", 20005),
            upstream: Endpoint::new("127.0.0.1", 20004),
            queue_capacity: 1_000,
            history_capacity: 10_000,
            recent_limit: 500,
            publisher_capacity: 256,
            ack_panels: true,
            dialect: UpstreamDialect::PassThrough,
            timeouts: TimeoutConfig::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl RetranslatorConfig {
    /// Check the values that would make the engine unusable
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.queue_capacity == 0 {
            return Err(RelayError::Config("queue_capacity must be at least 1".into()));
        }
        if self.publisher_capacity == 0 {
            return Err(RelayError::Config(
                "publisher_capacity must be at least 1".into(),
            ));
        }
        if self.history_capacity < self.recent_limit {
            return Err(RelayError::Config(format!(
                "history_capacity ({}) is smaller than recent_limit ({})",
                self.history_capacity, self.recent_limit
            )));
        }
        if self.timeouts.connect_ms == 0 || self.timeouts.write_ms == 0 {
            return Err(RelayError::Config("network timeouts must be non-zero".into()));
        }
        if self.timeouts.read_idle_ms == 0 {
            return Err(RelayError::Config("read_idle_ms must be non-zero".into()));
        }
        if self.timeouts.ack_ms == Some(0) {
            return Err(RelayError::Config(
                "ack_ms must be non-zero; leave it unset to disable ACK handling".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_parse() {
        let ep: Endpoint = "10.0.0.5:20004".parse().unwrap();
        assert_eq!(ep, Endpoint::new("10.0.0.5", 20004));
        assert_eq!(ep.to_string(), "10.0.0.5:20004");

        assert!("nohost".parse::<Endpoint>().is_err());
        assert!(":20004".parse::<Endpoint>().is_err());
        assert!("host:99999".parse::<Endpoint>().is_err());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let reconnect = ReconnectConfig {
            initial_delay_ms: 100,
            max_delay_ms: 1_000,
        };
        assert_eq!(reconnect.delay_for(0), Duration::from_millis(100));
        assert_eq!(reconnect.delay_for(1), Duration::from_millis(200));
        assert_eq!(reconnect.delay_for(3), Duration::from_millis(800));
        assert_eq!(reconnect.delay_for(4), Duration::from_millis(1_000));
        assert_eq!(reconnect.delay_for(200), Duration::from_millis(1_000));
    }

    #[test]
    fn test_defaults_validate() {
        assert!(RetranslatorConfig::default().validate().is_ok());

        let config = RetranslatorConfig {
            queue_capacity: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(RelayError::Config(_))));
    }

    #[test]
    fn test_zero_timeouts_rejected() {
        let mut config = RetranslatorConfig::default();
        config.timeouts.read_idle_ms = 0;
        assert!(matches!(config.validate(), Err(RelayError::Config(_))));

        let mut config = RetranslatorConfig::default();
        config.timeouts.ack_ms = Some(0);
        assert!(matches!(config.validate(), Err(RelayError::Config(_))));

        config.timeouts.ack_ms = Some(1);
        assert!(config.validate().is_ok());
    }
}
