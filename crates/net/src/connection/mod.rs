mod loopback;
mod tcp;

use std::fmt;

pub use loopback::LoopBackLink;
pub use tcp::{FrameAccumulator, TcpLink, encode_frame};

use crate::address::Address;
use crate::error::NetError;
use crate::message::{ByteOrder, Message};
use crate::protocol::INVALID_CONNECTION_INDEX;
use crate::socket::TcpSocket;

/// Stable identity of a connection for the lifetime of its session. Unlike
/// the connection index it is never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u32);

impl ConnectionId {
    pub(crate) fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug)]
pub enum Link {
    LoopBack(LoopBackLink),
    Tcp(TcpLink),
}

/// One endpoint of a session. Sessions own their connections exclusively.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    address: Address,
    index: u8,
    link: Link,
}

impl Connection {
    pub fn loopback(id: ConnectionId, address: Address) -> Self {
        Self {
            id,
            address,
            index: INVALID_CONNECTION_INDEX,
            link: Link::LoopBack(LoopBackLink::new()),
        }
    }

    /// Messages received on the link are decoded in `byte_order`.
    pub fn tcp(id: ConnectionId, socket: TcpSocket, byte_order: ByteOrder) -> Self {
        Self {
            id,
            address: socket.peer_address(),
            index: INVALID_CONNECTION_INDEX,
            link: Link::Tcp(TcpLink::new(socket, byte_order)),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Index within the session, or `INVALID_CONNECTION_INDEX` until one is
    /// assigned.
    pub fn index(&self) -> u8 {
        self.index
    }

    pub(crate) fn set_index(&mut self, index: u8) {
        self.index = index;
    }

    pub fn has_index(&self) -> bool {
        self.index != INVALID_CONNECTION_INDEX
    }

    pub fn is_loopback(&self) -> bool {
        matches!(self.link, Link::LoopBack(_))
    }

    pub fn link(&self) -> &Link {
        &self.link
    }

    /// Takes ownership of `message` for delivery.
    pub fn send(&mut self, message: Message) -> Result<(), NetError> {
        match &mut self.link {
            Link::LoopBack(queue) => {
                queue.push(message.into_delivery());
                Ok(())
            }
            Link::Tcp(tcp) => tcp.send(&message),
        }
    }

    /// Yields at most one complete message without blocking. The returned
    /// message carries this connection as its sender.
    pub fn receive(&mut self) -> Result<Option<Message>, NetError> {
        let received = match &mut self.link {
            Link::LoopBack(queue) => queue.pop(),
            Link::Tcp(tcp) => tcp.receive()?,
        };

        Ok(received.map(|mut message| {
            message.set_sender(self.id);
            message
        }))
    }

    pub fn flush(&mut self) -> Result<(), NetError> {
        match &mut self.link {
            Link::LoopBack(_) => Ok(()),
            Link::Tcp(tcp) => tcp.flush(),
        }
    }

    pub fn is_disconnected(&self) -> bool {
        match &self.link {
            Link::LoopBack(_) => false,
            Link::Tcp(tcp) => tcp.is_disconnected(),
        }
    }

    pub fn close(&mut self) {
        if let Link::Tcp(tcp) = &mut self.link {
            tcp.close();
        }
    }
}
