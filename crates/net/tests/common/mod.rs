#![allow(dead_code)]

use std::thread;
use std::time::{Duration, Instant};

use tether::{Address, Session, SessionConfig, TcpSession};

pub const TIMEOUT_MS: u64 = 3000;

pub fn local_config() -> SessionConfig {
    SessionConfig {
        listen_hosts: vec![String::from("127.0.0.1")],
        connect_timeout_ms: Some(2000),
        ..Default::default()
    }
}

/// Hosts on an OS-assigned port and returns the address to join.
pub fn start_host(config: SessionConfig) -> (TcpSession, Address) {
    let mut host = TcpSession::new(config);
    host.host(0).unwrap();
    let port = host.listen_addresses()[0].port();
    (host, Address::localhost(port))
}

/// Calls `step` until it returns true, sleeping 1ms between attempts.
pub fn wait_until<F>(timeout_ms: u64, mut step: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(timeout_ms) {
        if step() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    false
}

/// Joins `address` and pumps both sides until the joiner is ready.
pub fn join_ready(host: &mut TcpSession, address: Address) -> TcpSession {
    let mut peer = TcpSession::new(local_config());
    peer.join(address).unwrap();

    let ready = wait_until(TIMEOUT_MS, || {
        host.update().unwrap();
        peer.update().unwrap();
        peer.is_ready()
    });
    assert!(ready, "peer never became ready");
    peer
}
