use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::Rc;

use crate::address::Address;
use crate::config::SessionConfig;
use crate::connection::{Connection, ConnectionId};
use crate::error::NetError;
use crate::message::{ByteOrder, Message};
use crate::protocol::{INVALID_CONNECTION_INDEX, MessageType};

use super::{DisconnectReason, SessionEvent, SessionState};

/// Handler invoked for every received message of one type.
pub type MessageHandler = Rc<dyn Fn(&mut SessionCore, &mut Message) -> Result<(), NetError>>;

const HANDLER_SLOTS: usize = u8::MAX as usize + 1;

/// Transport-independent half of a session: connection registry, index
/// allocation, message dispatch and broadcast.
pub struct SessionCore {
    state: SessionState,
    connections: HashMap<ConnectionId, Connection>,
    /// Send order.
    order: Vec<ConnectionId>,
    /// Connection index -> connection.
    slots: Vec<Option<ConnectionId>>,
    my_connection: Option<ConnectionId>,
    host_connection: Option<ConnectionId>,
    handlers: Vec<Option<MessageHandler>>,
    next_connection_id: u32,
    max_connections: usize,
    byte_order: ByteOrder,
    pending_events: VecDeque<SessionEvent>,
}

impl SessionCore {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            state: SessionState::Disconnected,
            connections: HashMap::new(),
            order: Vec::new(),
            slots: Vec::new(),
            my_connection: None,
            host_connection: None,
            handlers: (0..HANDLER_SLOTS).map(|_| None).collect(),
            next_connection_id: 0,
            max_connections: config.connection_limit(),
            byte_order: config.byte_order,
            pending_events: VecDeque::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            log::debug!("Session state {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state != SessionState::Disconnected
    }

    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    pub fn am_i_host(&self) -> bool {
        self.my_connection.is_some() && self.my_connection == self.host_connection
    }

    pub fn am_i_client(&self) -> bool {
        self.is_connected() && !self.am_i_host()
    }

    pub fn my_connection(&self) -> Option<ConnectionId> {
        self.my_connection
    }

    pub fn host_connection(&self) -> Option<ConnectionId> {
        self.host_connection
    }

    pub(crate) fn set_my_connection(&mut self, id: Option<ConnectionId>) {
        self.my_connection = id;
    }

    pub(crate) fn set_host_connection(&mut self, id: Option<ConnectionId>) {
        self.host_connection = id;
    }

    /// Own connection index, or `INVALID_CONNECTION_INDEX` before the
    /// join handshake completes.
    pub fn my_index(&self) -> u8 {
        self.my_connection
            .and_then(|id| self.connections.get(&id))
            .map_or(INVALID_CONNECTION_INDEX, Connection::index)
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Creates an empty message in the session's byte order.
    pub fn new_message(&self, message_type: u8) -> Message {
        Message::new(message_type).with_byte_order(self.byte_order)
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn connection_by_index(&self, index: u8) -> Option<&Connection> {
        self.connection_id_at(index)
            .and_then(|id| self.connections.get(&id))
    }

    pub fn connection_id_at(&self, index: u8) -> Option<ConnectionId> {
        self.slots.get(index as usize).copied().flatten()
    }

    pub fn connection_address(&self, index: u8) -> Option<Address> {
        self.connection_by_index(index).map(Connection::address)
    }

    pub fn connection_count(&self) -> usize {
        self.order.len()
    }

    /// Connections in send order.
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.order.clone()
    }

    /// Assigned indices in ascending order.
    pub fn connection_indices(&self) -> Vec<u8> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(index, _)| index as u8)
            .collect()
    }

    pub(crate) fn allocate_connection_id(&mut self) -> ConnectionId {
        let id = ConnectionId::new(self.next_connection_id);
        self.next_connection_id = self.next_connection_id.wrapping_add(1);
        id
    }

    pub(crate) fn add_connection(&mut self, connection: Connection) -> ConnectionId {
        let id = connection.id();
        self.order.push(id);
        self.connections.insert(id, connection);
        id
    }

    /// First empty slot, else the next index while under capacity, else
    /// `INVALID_CONNECTION_INDEX` (session full).
    pub fn get_free_connection_index(&self) -> u8 {
        if let Some(index) = self.slots.iter().position(Option::is_none) {
            return index as u8;
        }

        if self.slots.len() < self.max_connections {
            self.slots.len() as u8
        } else {
            INVALID_CONNECTION_INDEX
        }
    }

    /// Places a connection at `index`. Fails if the index is invalid or
    /// held by another connection.
    pub(crate) fn register_connection_index(&mut self, id: ConnectionId, index: u8) -> bool {
        let slot = index as usize;
        if index == INVALID_CONNECTION_INDEX || slot >= self.max_connections {
            return false;
        }

        let Some(connection) = self.connections.get_mut(&id) else {
            return false;
        };

        if self.slots.len() <= slot {
            self.slots.resize(slot + 1, None);
        }

        match self.slots[slot] {
            Some(existing) if existing != id => false,
            _ => {
                self.slots[slot] = Some(id);
                connection.set_index(index);
                true
            }
        }
    }

    /// Installs the handler for `message_type`, replacing any previous one.
    pub fn register_message_function<F>(&mut self, message_type: u8, handler: F)
    where
        F: Fn(&mut SessionCore, &mut Message) -> Result<(), NetError> + 'static,
    {
        if self.handlers[message_type as usize].is_some() {
            log::debug!(
                "Replacing handler for message type {} ({})",
                message_type,
                MessageType::name(message_type)
            );
        }
        self.handlers[message_type as usize] = Some(Rc::new(handler));
    }

    pub fn unregister_message_function(&mut self, message_type: u8) {
        self.handlers[message_type as usize] = None;
    }

    pub fn has_message_function(&self, message_type: u8) -> bool {
        self.handlers[message_type as usize].is_some()
    }

    /// Dispatches `message` to its handler. Unregistered types are dropped.
    pub fn process_message(&mut self, message: &mut Message) -> Result<(), NetError> {
        let message_type = message.message_type();
        let Some(handler) = self.handlers[message_type as usize].clone() else {
            log::debug!("Dropping message of unhandled type {}", message_type);
            return Ok(());
        };

        handler(self, message)
    }

    pub(crate) fn receive_from(&mut self, id: ConnectionId) -> Result<Option<Message>, NetError> {
        match self.connections.get_mut(&id) {
            Some(connection) => connection.receive(),
            None => Ok(None),
        }
    }

    pub(crate) fn flush(&mut self, id: ConnectionId) -> Result<(), NetError> {
        match self.connections.get_mut(&id) {
            Some(connection) => connection.flush(),
            None => Ok(()),
        }
    }

    pub(crate) fn send_to(&mut self, id: ConnectionId, message: Message) -> Result<(), NetError> {
        let connection = self
            .connections
            .get_mut(&id)
            .ok_or(NetError::NotConnected)?;
        connection.send(message)
    }

    fn broadcast<P>(&mut self, message: &Message, mut include: P)
    where
        P: FnMut(ConnectionId) -> bool,
    {
        for &id in &self.order {
            if !include(id) {
                continue;
            }
            let Some(connection) = self.connections.get_mut(&id) else {
                continue;
            };
            if let Err(e) = connection.send(message.clone()) {
                log::warn!("Send to {} failed: {}", connection.address(), e);
            }
        }
    }

    /// Every connection, including the local one.
    pub fn send_message_to_all(&mut self, message: &Message) {
        self.broadcast(message, |_| true);
    }

    /// Every connection except the local one.
    pub fn send_message_to_others(&mut self, message: &Message) {
        let me = self.my_connection;
        self.broadcast(message, |id| Some(id) != me);
    }

    /// Every connection except the local one and the one `message` arrived
    /// on, so relayed traffic never echoes back.
    pub fn send_message_to_others_except_sender(&mut self, message: &Message) {
        let me = self.my_connection;
        let sender = message.sender();
        self.broadcast(message, |id| Some(id) != me && Some(id) != sender);
    }

    /// Unicast to the connection at `index`.
    pub fn send_message_to_other(&mut self, index: u8, message: Message) -> Result<(), NetError> {
        let id = self.connection_id_at(index).ok_or(NetError::NotConnected)?;
        self.send_to(id, message)
    }

    pub fn send_message_to_host(&mut self, message: Message) -> Result<(), NetError> {
        let id = self.host_connection.ok_or(NetError::NotConnected)?;
        self.send_to(id, message)
    }

    /// Removes a connection and everything that refers to it. Unknown ids
    /// are ignored, so callers may iterate over a stale id list.
    pub fn destroy_connection(&mut self, id: ConnectionId, reason: DisconnectReason) {
        if self.my_connection == Some(id) {
            self.my_connection = None;
        }
        if self.host_connection == Some(id) {
            self.host_connection = None;
        }

        let Some(mut connection) = self.connections.remove(&id) else {
            return;
        };

        let index = connection.index();
        if let Some(slot) = self.slots.get_mut(index as usize) {
            if *slot == Some(id) {
                *slot = None;
            }
        }
        while self.slots.last().is_some_and(Option::is_none) {
            self.slots.pop();
        }

        self.order.retain(|&other| other != id);
        connection.close();

        if !connection.is_loopback() {
            log::info!(
                "Connection {} ({}) {}",
                index,
                connection.address(),
                reason.as_str()
            );
            self.pending_events.push_back(SessionEvent::PeerDisconnected {
                index,
                address: connection.address(),
                reason,
            });
        }
    }

    /// Destroys every connection and returns to `Disconnected`.
    pub(crate) fn reset(&mut self, reason: DisconnectReason) {
        if let Some(id) = self.my_connection {
            self.destroy_connection(id, reason);
        }
        if let Some(id) = self.host_connection {
            self.destroy_connection(id, reason);
        }
        for id in self.connection_ids() {
            self.destroy_connection(id, reason);
        }
        self.slots.clear();
        self.set_state(SessionState::Disconnected);
    }

    pub(crate) fn push_event(&mut self, event: SessionEvent) {
        self.pending_events.push_back(event);
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = SessionEvent> + '_ {
        self.pending_events.drain(..)
    }
}

impl fmt::Debug for SessionCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCore")
            .field("state", &self.state)
            .field("connections", &self.order.len())
            .field("my_connection", &self.my_connection)
            .field("host_connection", &self.host_connection)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}
