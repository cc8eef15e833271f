mod config;
mod node;
mod simulation;

use anyhow::{Context, Result, anyhow};
use clap::Parser;

use config::{Mode, NodeConfig};
use node::Node;
use tether::{Address, ReplicationConfig, SessionConfig};

#[derive(Parser)]
#[command(name = "tether-node")]
#[command(about = "Headless tether peer")]
struct Args {
    #[arg(long, conflicts_with = "join", help = "Host a session (default)")]
    host: bool,

    #[arg(short, long, help = "Join the session hosted at HOST:PORT")]
    join: Option<String>,

    #[arg(short, long, default_value = "0.0.0.0")]
    bind: Vec<String>,

    #[arg(short, long, default_value_t = tether::DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, default_value_t = tether::DEFAULT_TICK_RATE)]
    tick_rate: u32,

    #[arg(short, long, default_value_t = tether::DEFAULT_REPLICATION_RATE)]
    replication_rate: u32,

    #[arg(short, long, default_value_t = tether::MAX_CONNECTIONS)]
    max_connections: usize,

    #[arg(long, help = "Connect timeout in ms when joining")]
    connect_timeout: Option<u64>,

    #[arg(long, default_value_t = 120, help = "Ticks between client nudges (0 = off)")]
    nudge_interval: u32,
}

fn parse_join(target: &str) -> Result<Address> {
    if let Ok(address) = target.parse::<Address>() {
        return Ok(address);
    }

    let (host, port) = target
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("expected HOST:PORT, got '{}'", target))?;
    let port: u16 = port
        .parse()
        .with_context(|| format!("invalid port in '{}'", target))?;

    Address::resolve(host, port)?
        .into_iter()
        .find(|address| !address.is_v6())
        .ok_or_else(|| anyhow!("'{}' did not resolve to an IPv4 address", host))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mode = match &args.join {
        Some(target) if !args.host => Mode::Join {
            address: parse_join(target)?,
        },
        _ => Mode::Host { port: args.port },
    };

    let config = NodeConfig {
        mode,
        tick_rate: args.tick_rate,
        nudge_interval: args.nudge_interval,
        session: SessionConfig {
            max_connections: args.max_connections,
            listen_hosts: args.bind,
            connect_timeout_ms: args.connect_timeout,
            ..Default::default()
        },
        replication: ReplicationConfig {
            tick_hz: args.replication_rate,
        },
    };

    let mut node = Node::new(config);
    node.start().context("failed to start session")?;
    match mode {
        Mode::Host { .. } => log::info!(
            "Node hosting on {:?}, beacon {:?}",
            node.session().listen_addresses(),
            node.beacon_id()
        ),
        Mode::Join { address } => log::info!("Node joining {}", address),
    }

    if let Err(e) = node.run() {
        if e.is_fatal() {
            log::error!("Protocol error, shutting down: {}", e);
        }
        node.shutdown();
        return Err(e.into());
    }

    log::info!(
        "Node shutting down after {} nudges received",
        node.nudges_received()
    );
    Ok(())
}
