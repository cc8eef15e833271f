use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::message::ByteOrder;
use crate::protocol::{DEFAULT_REPLICATION_RATE, MAX_CONNECTIONS};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Clamped to 1..=255 (indices 0..=254). Index 0 is always the host.
    pub max_connections: usize,
    /// Host names or literals the host listens on, one socket per resolved
    /// address.
    pub listen_hosts: Vec<String>,
    /// Upper bound on the blocking join connect. `None` leaves it to the OS.
    pub connect_timeout_ms: Option<u64>,
    pub byte_order: ByteOrder,
}

impl SessionConfig {
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    pub fn connection_limit(&self) -> usize {
        self.max_connections.clamp(1, MAX_CONNECTIONS)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_connections: MAX_CONNECTIONS,
            listen_hosts: vec![String::from("0.0.0.0")],
            connect_timeout_ms: None,
            byte_order: ByteOrder::Little,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Snapshot sends per second on the host.
    pub tick_hz: u32,
}

impl ReplicationConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_hz.max(1) as f64)
    }
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            tick_hz: DEFAULT_REPLICATION_RATE,
        }
    }
}
