use crate::address::Address;
use crate::config::SessionConfig;
use crate::connection::{Connection, ConnectionId};
use crate::error::{NetError, SocketError};
use crate::message::Message;
use crate::protocol::{HOST_CONNECTION_INDEX, INVALID_CONNECTION_INDEX, MessageType};
use crate::socket::{ListenSocket, TcpSocket};

use super::{DisconnectReason, Session, SessionCore, SessionEvent, SessionState};

/// Session driven over TCP. Single-threaded: all I/O happens inside
/// [`Session::update`], which must be called once per loop tick.
#[derive(Debug)]
pub struct TcpSession {
    core: SessionCore,
    config: SessionConfig,
    local_addresses: Vec<Address>,
    /// One slot per local address, `None` while not listening.
    listeners: Vec<Option<ListenSocket>>,
}

impl TcpSession {
    pub fn new(config: SessionConfig) -> Self {
        let mut core = SessionCore::new(&config);
        core.register_message_function(MessageType::JOIN_RESPONSE, on_join_response);

        Self {
            core,
            config,
            local_addresses: Vec::new(),
            listeners: Vec::new(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Addresses of the open listen sockets, with the ports actually bound.
    pub fn listen_addresses(&self) -> Vec<Address> {
        self.listeners
            .iter()
            .flatten()
            .map(ListenSocket::local_address)
            .collect()
    }

    fn accept_pending(&mut self) {
        let mut accepted: Vec<TcpSocket> = Vec::new();
        for listener in self.listeners.iter().flatten() {
            loop {
                match listener.accept() {
                    Ok(Some(socket)) => accepted.push(socket),
                    Ok(None) => break,
                    Err(e) => {
                        log::warn!("Accept on {} failed: {}", listener.local_address(), e);
                        break;
                    }
                }
            }
        }

        for socket in accepted {
            self.admit(socket);
        }
    }

    fn admit(&mut self, socket: TcpSocket) {
        let address = socket.peer_address();
        let index = self.core.get_free_connection_index();
        if index == INVALID_CONNECTION_INDEX {
            log::warn!("Session full, dropping connection from {}", address);
            socket.close();
            self.core.push_event(SessionEvent::Rejected { address });
            return;
        }

        let id = self.core.allocate_connection_id();
        self.core
            .add_connection(Connection::tcp(id, socket, self.config.byte_order));
        if !self.core.register_connection_index(id, index) {
            log::warn!("Index {} unavailable, dropping {}", index, address);
            self.core.destroy_connection(id, DisconnectReason::Failed);
            self.core.push_event(SessionEvent::Rejected { address });
            return;
        }

        log::info!("Peer {} connected from {}", index, address);
        self.core
            .push_event(SessionEvent::PeerConnected { index, address });

        let mut response = self.core.new_message(MessageType::JOIN_RESPONSE);
        let sent = response
            .write(&index)
            .map_err(NetError::from)
            .and_then(|_| self.core.send_to(id, response));
        if let Err(e) = sent {
            log::warn!("Join response to {} failed: {}", address, e);
            self.core.destroy_connection(id, DisconnectReason::Failed);
        }
    }

    /// Drains every available message on `id` in arrival order. Transport
    /// failures drop the connection; fatal dispatch errors propagate.
    fn drain_connection(&mut self, id: ConnectionId) -> Result<(), NetError> {
        if let Err(e) = self.core.flush(id) {
            log::warn!("Flush on connection {} failed: {}", id, e);
            self.core.destroy_connection(id, DisconnectReason::Failed);
            return Ok(());
        }

        loop {
            let mut message = match self.core.receive_from(id) {
                Ok(Some(message)) => message,
                Ok(None) => return Ok(()),
                Err(NetError::Socket(SocketError::Closed(address))) => {
                    log::debug!("{} closed the connection", address);
                    self.core.destroy_connection(id, DisconnectReason::Closed);
                    return Ok(());
                }
                Err(e) => {
                    log::warn!("Receive on connection {} failed: {}", id, e);
                    self.core.destroy_connection(id, DisconnectReason::Failed);
                    return Ok(());
                }
            };

            match self.core.process_message(&mut message) {
                Ok(()) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => log::warn!(
                    "Handling {} message failed: {}",
                    MessageType::name(message.message_type()),
                    e
                ),
            }
        }
    }

    fn sweep_disconnected(&mut self) {
        let me = self.core.my_connection();
        let closed: Vec<ConnectionId> = self
            .core
            .connection_ids()
            .into_iter()
            .filter(|&id| Some(id) != me)
            .filter(|&id| {
                self.core
                    .connection(id)
                    .is_some_and(|c| !c.is_loopback() && c.is_disconnected())
            })
            .collect();

        for id in closed {
            self.core.destroy_connection(id, DisconnectReason::Closed);
        }
    }
}

impl Session for TcpSession {
    fn core(&self) -> &SessionCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SessionCore {
        &mut self.core
    }

    fn host(&mut self, port: u16) -> Result<(), NetError> {
        if self.core.is_connected() {
            return Err(NetError::AlreadyRunning);
        }

        let local_addresses = Address::resolve_local(&self.config.listen_hosts, port)?;

        let id = self.core.allocate_connection_id();
        self.core
            .add_connection(Connection::loopback(id, local_addresses[0]));
        if !self.core.register_connection_index(id, HOST_CONNECTION_INDEX) {
            self.core.destroy_connection(id, DisconnectReason::Failed);
            return Err(NetError::IndexUnavailable(HOST_CONNECTION_INDEX));
        }
        self.core.set_my_connection(Some(id));
        self.core.set_host_connection(Some(id));

        self.listeners = (0..local_addresses.len()).map(|_| None).collect();
        self.local_addresses = local_addresses;
        self.core.set_state(SessionState::Ready);

        if let Err(e) = self.start_listening() {
            log::error!("Hosting on port {} failed: {}", port, e);
            self.leave();
            return Err(e);
        }

        log::info!("Hosting on {:?}", self.listen_addresses());
        self.core.push_event(SessionEvent::Ready {
            index: HOST_CONNECTION_INDEX,
        });
        Ok(())
    }

    fn join(&mut self, address: Address) -> Result<(), NetError> {
        if self.core.is_connected() {
            return Err(NetError::AlreadyRunning);
        }

        log::info!("Joining {}", address);
        let socket = match TcpSocket::connect(address, self.config.connect_timeout()) {
            Ok(socket) => socket,
            Err(e) => {
                log::error!("Join failed: {}", e);
                self.leave();
                return Err(e.into());
            }
        };
        let local = socket
            .local_address()
            .unwrap_or(Address::unspecified(0));

        let host_id = self.core.allocate_connection_id();
        self.core
            .add_connection(Connection::tcp(host_id, socket, self.config.byte_order));
        if !self.core.register_connection_index(host_id, HOST_CONNECTION_INDEX) {
            log::error!("Join failed: no room for the host connection");
            self.leave();
            return Err(NetError::IndexUnavailable(HOST_CONNECTION_INDEX));
        }
        self.core.set_host_connection(Some(host_id));

        let my_id = self.core.allocate_connection_id();
        self.core.add_connection(Connection::loopback(my_id, local));
        self.core.set_my_connection(Some(my_id));

        self.core.set_state(SessionState::Connecting);
        Ok(())
    }

    fn leave(&mut self) {
        let was_connected = self.core.is_connected();
        self.stop_listening();
        self.listeners.clear();
        self.local_addresses.clear();
        self.core.reset(DisconnectReason::Left);

        if was_connected {
            log::info!("Left session");
            self.core.push_event(SessionEvent::Left);
        }
    }

    fn update(&mut self) -> Result<(), NetError> {
        if !self.core.is_connected() {
            return Ok(());
        }

        if self.is_listening() {
            self.accept_pending();
        }

        for id in self.core.connection_ids() {
            self.drain_connection(id)?;
        }

        self.sweep_disconnected();

        if self.core.host_connection().is_none() {
            log::warn!("Lost connection to host");
            self.leave();
        }

        Ok(())
    }

    fn start_listening(&mut self) -> Result<(), NetError> {
        if !self.core.am_i_host() {
            return Err(NetError::NotHost);
        }

        let mut first_error = None;
        for (slot, address) in self.listeners.iter_mut().zip(&self.local_addresses) {
            if slot.is_some() {
                continue;
            }
            match ListenSocket::bind(*address) {
                Ok(listener) => {
                    log::debug!("Listening on {}", listener.local_address());
                    *slot = Some(listener);
                }
                Err(e) => {
                    log::warn!("{}", e);
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) if !self.is_listening() => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn stop_listening(&mut self) {
        for slot in &mut self.listeners {
            *slot = None;
        }
    }

    fn is_listening(&self) -> bool {
        self.listeners.iter().any(Option::is_some)
    }
}

impl Drop for TcpSession {
    fn drop(&mut self) {
        self.leave();
    }
}

/// Completes the join handshake: the host has assigned our index.
fn on_join_response(core: &mut SessionCore, message: &mut Message) -> Result<(), NetError> {
    let index: u8 = message.read()?;

    if core.state() != SessionState::Connecting {
        log::debug!("Ignoring join response in state {:?}", core.state());
        return Ok(());
    }

    let Some(me) = core.my_connection() else {
        return Err(NetError::NotConnected);
    };

    if !core.register_connection_index(me, index) {
        log::error!("Host assigned unusable index {}", index);
        return Err(NetError::NotConnected);
    }

    log::info!("Joined session as peer {}", index);
    core.set_state(SessionState::Ready);
    core.push_event(SessionEvent::Ready { index });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_config() -> SessionConfig {
        SessionConfig {
            listen_hosts: vec![String::from("127.0.0.1")],
            ..Default::default()
        }
    }

    #[test]
    fn host_is_ready_immediately() {
        let mut session = TcpSession::new(local_config());
        session.host(0).unwrap();

        assert_eq!(session.state(), SessionState::Ready);
        assert!(session.am_i_host());
        assert!(!session.am_i_client());
        assert!(session.is_listening());
        assert_eq!(session.my_index(), HOST_CONNECTION_INDEX);
        assert_eq!(session.connection_count(), 1);
        assert!(matches!(
            session.drain_events().as_slice(),
            [SessionEvent::Ready { index: 0 }]
        ));
    }

    #[test]
    fn host_twice_is_refused() {
        let mut session = TcpSession::new(local_config());
        session.host(0).unwrap();
        assert!(matches!(session.host(0), Err(NetError::AlreadyRunning)));
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[test]
    fn listening_requires_host() {
        let mut session = TcpSession::new(local_config());
        assert!(matches!(
            session.start_listening(),
            Err(NetError::NotHost)
        ));
    }

    #[test]
    fn stop_and_resume_listening() {
        let mut session = TcpSession::new(local_config());
        session.host(0).unwrap();
        session.stop_listening();
        assert!(!session.is_listening());
        assert!(session.listen_addresses().is_empty());
        assert_eq!(session.state(), SessionState::Ready);

        session.start_listening().unwrap();
        assert!(session.is_listening());
    }

    #[test]
    fn leave_from_host_resets() {
        let mut session = TcpSession::new(local_config());
        session.host(0).unwrap();
        session.leave();

        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(session.connection_count(), 0);
        assert!(!session.is_listening());
        assert!(!session.am_i_host());
        session.update().unwrap();
    }

    #[test]
    fn failed_join_stays_disconnected() {
        let listener = ListenSocket::bind(Address::localhost(0)).unwrap();
        let address = listener.local_address();
        drop(listener);

        let mut session = TcpSession::new(local_config());
        assert!(session.join(address).is_err());
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(session.connection_count(), 0);
    }

    #[test]
    fn join_response_only_applies_while_connecting() {
        let mut core = SessionCore::new(&local_config());
        let me = core.allocate_connection_id();
        core.add_connection(Connection::loopback(me, Address::localhost(0)));
        core.set_my_connection(Some(me));

        let mut response = core.new_message(MessageType::JOIN_RESPONSE);
        response.write(&3u8).unwrap();

        on_join_response(&mut core, &mut response.clone()).unwrap();
        assert_eq!(core.my_index(), INVALID_CONNECTION_INDEX);

        core.set_state(SessionState::Connecting);
        on_join_response(&mut core, &mut response).unwrap();
        assert_eq!(core.state(), SessionState::Ready);
        assert_eq!(core.my_index(), 3);
    }
}
