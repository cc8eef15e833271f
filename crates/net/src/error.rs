use std::io;

use crate::address::Address;
use crate::message::MessageError;

#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    #[error("connect to {address} failed: {source}")]
    Connect { address: Address, source: io::Error },
    #[error("listen on {address} failed: {source}")]
    Listen { address: Address, source: io::Error },
    #[error("accept failed: {0}")]
    Accept(io::Error),
    #[error("send to {address} failed: {source}")]
    Send { address: Address, source: io::Error },
    #[error("receive from {address} failed: {source}")]
    Receive { address: Address, source: io::Error },
    #[error("connection to {0} closed by peer")]
    Closed(Address),
    #[error("socket configuration failed: {0}")]
    Configure(io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error(transparent)]
    Socket(#[from] SocketError),
    #[error(transparent)]
    Message(#[from] MessageError),
    #[error("session is already running")]
    AlreadyRunning,
    #[error("operation requires the host")]
    NotHost,
    #[error("session is not connected")]
    NotConnected,
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("no local address could be resolved from {0:?}")]
    NoLocalAddress(Vec<String>),
    #[error("frame of {0} bytes is outside the accepted range")]
    InvalidFrame(usize),
    #[error("{address} is not reading, {pending} bytes still queued")]
    Backlogged { address: Address, pending: usize },
    #[error("connection index {0} is unavailable")]
    IndexUnavailable(u8),
    #[error("net object type {0} is not registered")]
    UnknownNetObjectType(u8),
    #[error("rpc '{id}' argument mismatch: {reason}")]
    RpcArguments { id: String, reason: String },
}

impl NetError {
    /// Errors that mean the peers disagree on the protocol or the program
    /// misused the envelope. Continuing would corrupt replicated state.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            NetError::Message(_) | NetError::UnknownNetObjectType(_) | NetError::RpcArguments { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatality() {
        assert!(NetError::UnknownNetObjectType(3).is_fatal());
        assert!(
            NetError::Message(MessageError::Overflow {
                requested: 2,
                available: 1
            })
            .is_fatal()
        );
        assert!(!NetError::NotConnected.is_fatal());
        assert!(!NetError::InvalidFrame(0).is_fatal());
        assert!(!NetError::IndexUnavailable(0).is_fatal());
    }

    #[test]
    fn socket_errors_read_well() {
        let address: Address = "127.0.0.1:7777".parse().unwrap();
        let err = SocketError::Closed(address);
        assert_eq!(err.to_string(), "connection to 127.0.0.1:7777 closed by peer");
    }
}
