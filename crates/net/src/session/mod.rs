mod registry;
mod tcp;

pub use registry::{MessageHandler, SessionCore};
pub use tcp::TcpSession;

use crate::address::Address;
use crate::error::NetError;
use crate::message::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Disconnected,
    /// Socket to the host is open but no index has been assigned yet.
    Connecting,
    Joining,
    Ready,
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    PeerConnected {
        index: u8,
        address: Address,
    },
    PeerDisconnected {
        index: u8,
        address: Address,
        reason: DisconnectReason,
    },
    /// This process now has an addressable identity.
    Ready {
        index: u8,
    },
    /// An incoming connection was dropped because every index is taken.
    Rejected {
        address: Address,
    },
    Left,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Closed,
    Failed,
    Left,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Closed => "closed by peer",
            DisconnectReason::Failed => "failed",
            DisconnectReason::Left => "left",
        }
    }
}

/// A peer-to-peer session: state machine plus transport. The registry,
/// dispatch table and broadcast helpers live in [`SessionCore`], shared by
/// every transport.
pub trait Session {
    fn core(&self) -> &SessionCore;
    fn core_mut(&mut self) -> &mut SessionCore;

    /// Becomes the host on `port` and transitions straight to `Ready`.
    fn host(&mut self, port: u16) -> Result<(), NetError>;

    /// Connects to a host and transitions to `Connecting`. `Ready` follows
    /// once the host assigns an index.
    fn join(&mut self, address: Address) -> Result<(), NetError>;

    fn leave(&mut self);

    /// Pumps the transport once: accept, drain and dispatch, sweep dead
    /// connections.
    fn update(&mut self) -> Result<(), NetError>;

    fn start_listening(&mut self) -> Result<(), NetError>;
    fn stop_listening(&mut self);
    fn is_listening(&self) -> bool;

    fn state(&self) -> SessionState {
        self.core().state()
    }

    fn is_ready(&self) -> bool {
        self.core().is_ready()
    }

    fn am_i_host(&self) -> bool {
        self.core().am_i_host()
    }

    fn am_i_client(&self) -> bool {
        self.core().am_i_client()
    }

    fn my_index(&self) -> u8 {
        self.core().my_index()
    }

    fn connection_count(&self) -> usize {
        self.core().connection_count()
    }

    fn register_message_function<F>(&mut self, message_type: u8, handler: F)
    where
        F: Fn(&mut SessionCore, &mut Message) -> Result<(), NetError> + 'static,
        Self: Sized,
    {
        self.core_mut()
            .register_message_function(message_type, handler);
    }

    fn send_message_to_all(&mut self, message: &Message) {
        self.core_mut().send_message_to_all(message);
    }

    fn send_message_to_others(&mut self, message: &Message) {
        self.core_mut().send_message_to_others(message);
    }

    fn send_message_to_other(&mut self, index: u8, message: Message) -> Result<(), NetError> {
        self.core_mut().send_message_to_other(index, message)
    }

    fn drain_events(&mut self) -> Vec<SessionEvent> {
        self.core_mut().drain_events().collect()
    }
}
