use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::time::Duration;

use crate::address::Address;
use crate::error::SocketError;

/// Non-blocking TCP stream. Only [`TcpSocket::connect`] blocks.
#[derive(Debug)]
pub struct TcpSocket {
    stream: TcpStream,
    peer: Address,
}

impl TcpSocket {
    /// Blocks until the OS completes or refuses the connection, then switches
    /// the socket to non-blocking mode.
    pub fn connect(address: Address, timeout: Option<Duration>) -> Result<Self, SocketError> {
        let target = address.to_socket_addr();
        let stream = match timeout {
            Some(timeout) => TcpStream::connect_timeout(&target, timeout),
            None => TcpStream::connect(target),
        }
        .map_err(|source| SocketError::Connect { address, source })?;

        Self::from_stream(stream, address)
    }

    pub(crate) fn from_stream(stream: TcpStream, peer: Address) -> Result<Self, SocketError> {
        stream.set_nonblocking(true).map_err(SocketError::Configure)?;
        stream.set_nodelay(true).map_err(SocketError::Configure)?;
        Ok(Self { stream, peer })
    }

    pub fn peer_address(&self) -> Address {
        self.peer
    }

    pub fn local_address(&self) -> Result<Address, SocketError> {
        self.stream
            .local_addr()
            .map(Address::from)
            .map_err(SocketError::Configure)
    }

    /// Writes as much of `bytes` as the socket accepts right now.
    pub fn send(&mut self, bytes: &[u8]) -> Result<usize, SocketError> {
        match self.stream.write(bytes) {
            Ok(0) if !bytes.is_empty() => Err(SocketError::Closed(self.peer)),
            Ok(written) => Ok(written),
            Err(ref e) if is_transient(e) => Ok(0),
            Err(source) => Err(SocketError::Send {
                address: self.peer,
                source,
            }),
        }
    }

    /// Reads whatever is available into `buf`. `Ok(0)` means nothing is
    /// pending; an orderly shutdown by the peer is reported as `Closed`.
    pub fn receive(&mut self, buf: &mut [u8]) -> Result<usize, SocketError> {
        if buf.is_empty() {
            return Ok(0);
        }

        match self.stream.read(buf) {
            Ok(0) => Err(SocketError::Closed(self.peer)),
            Ok(read) => Ok(read),
            Err(ref e) if is_transient(e) => Ok(0),
            Err(source) => Err(SocketError::Receive {
                address: self.peer,
                source,
            }),
        }
    }

    /// Polls for half-close or reset without consuming data.
    pub fn is_disconnected(&self) -> bool {
        let mut peeked = [0u8; 1];
        match self.stream.peek(&mut peeked) {
            Ok(0) => true,
            Ok(_) => false,
            Err(ref e) if is_transient(e) => false,
            Err(_) => true,
        }
    }

    pub fn close(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// Non-blocking listen socket bound to a single local endpoint.
#[derive(Debug)]
pub struct ListenSocket {
    listener: TcpListener,
    address: Address,
}

impl ListenSocket {
    pub fn bind(address: Address) -> Result<Self, SocketError> {
        let listener = TcpListener::bind(address.to_socket_addr())
            .map_err(|source| SocketError::Listen { address, source })?;
        listener
            .set_nonblocking(true)
            .map_err(SocketError::Configure)?;

        let address = listener
            .local_addr()
            .map(Address::from)
            .map_err(SocketError::Configure)?;

        Ok(Self { listener, address })
    }

    pub fn local_address(&self) -> Address {
        self.address
    }

    /// Returns the next pending connection, if any.
    pub fn accept(&self) -> Result<Option<TcpSocket>, SocketError> {
        match self.listener.accept() {
            Ok((stream, peer)) => TcpSocket::from_stream(stream, Address::from(peer)).map(Some),
            Err(ref e) if is_transient(e) => Ok(None),
            Err(e) => Err(SocketError::Accept(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Instant;

    use super::*;

    fn accept_within(listener: &ListenSocket, timeout: Duration) -> Option<TcpSocket> {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if let Some(socket) = listener.accept().unwrap() {
                return Some(socket);
            }
            thread::sleep(Duration::from_millis(1));
        }
        None
    }

    #[test]
    fn accept_send_receive() {
        let listener = ListenSocket::bind(Address::localhost(0)).unwrap();
        assert!(listener.accept().unwrap().is_none());

        let mut client = TcpSocket::connect(listener.local_address(), None).unwrap();
        let mut server = accept_within(&listener, Duration::from_secs(2)).unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(server.receive(&mut buf).unwrap(), 0);

        assert_eq!(client.send(b"ping").unwrap(), 4);

        let start = Instant::now();
        let mut read = 0;
        while read == 0 && start.elapsed() < Duration::from_secs(2) {
            read = server.receive(&mut buf).unwrap();
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(&buf[..read], b"ping");
        assert!(!server.is_disconnected());
    }

    #[test]
    fn detects_peer_close() {
        let listener = ListenSocket::bind(Address::localhost(0)).unwrap();
        let client = TcpSocket::connect(listener.local_address(), None).unwrap();
        let server = accept_within(&listener, Duration::from_secs(2)).unwrap();

        drop(client);

        let start = Instant::now();
        while !server.is_disconnected() {
            assert!(start.elapsed() < Duration::from_secs(2), "close not observed");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn connect_refused_is_reported() {
        let listener = ListenSocket::bind(Address::localhost(0)).unwrap();
        let address = listener.local_address();
        drop(listener);

        let err = TcpSocket::connect(address, Some(Duration::from_millis(500))).unwrap_err();
        assert!(matches!(err, SocketError::Connect { .. }));
    }
}
