//! Device and queue state types

use std::time::Duration;

use chrono::{DateTime, Utc};
use cid_protocol::Event;
use serde::Serialize;

/// Latest known state of a reporting device (panel account)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Device {
    /// Account / device identifier as received
    pub id: String,
    /// Qualifier + code of the most recent event
    pub last_event_code: String,
    /// Arrival time of the most recent event
    pub last_event_at: DateTime<Utc>,
    /// Number of events received from this device
    pub event_count: u64,
}

impl Device {
    /// Create a device from its first event
    pub fn from_event(event: &Event) -> Self {
        Self {
            id: event.account().to_string(),
            last_event_code: event.code().to_string(),
            last_event_at: event.received_at(),
            event_count: 1,
        }
    }

    /// Record a newer event for this device
    pub fn apply(&mut self, event: &Event) {
        self.last_event_code = event.code().to_string();
        self.last_event_at = event.received_at();
        self.event_count += 1;
    }
}

/// Upstream connection state of the retranslation client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ClientState {
    /// No connection; waiting out the reconnect delay
    Disconnected,
    /// Connection attempt in progress
    Connecting,
    /// Connected and draining the queue
    Connected,
}

/// Point-in-time snapshot of the retranslation counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Whether the upstream connection is currently up
    pub connected: bool,
    /// Frames delivered upstream
    pub accepted: u64,
    /// Events dropped because the outbound queue was full
    pub rejected: u64,
    /// Successful reconnections after a lost connection
    pub reconnects: u64,
    /// In-flight events dropped after their retry also failed
    pub dropped_in_flight: u64,
    /// Events waiting in the outbound queue
    pub queued: usize,
    /// When the current upstream connection was established
    pub connected_since: Option<DateTime<Utc>>,
    /// Age of the current upstream connection
    pub uptime: Duration,
}

impl QueueStats {
    /// Human-readable uptime, whole seconds (e.g. `1h 2m 5s`)
    pub fn uptime_string(&self) -> String {
        let secs = Duration::from_secs(self.uptime.as_secs());
        humantime::format_duration(secs).to_string()
    }
}
