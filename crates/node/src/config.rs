use tether::{Address, DEFAULT_TICK_RATE, ReplicationConfig, SessionConfig};

#[derive(Debug, Clone, Copy)]
pub enum Mode {
    Host { port: u16 },
    Join { address: Address },
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub mode: Mode,
    pub tick_rate: u32,
    /// Ticks between demo nudges sent by a client.
    pub nudge_interval: u32,
    pub session: SessionConfig,
    pub replication: ReplicationConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Host {
                port: tether::DEFAULT_PORT,
            },
            tick_rate: DEFAULT_TICK_RATE,
            nudge_interval: DEFAULT_TICK_RATE * 2,
            session: SessionConfig::default(),
            replication: ReplicationConfig::default(),
        }
    }
}
