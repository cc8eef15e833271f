use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::config::ReplicationConfig;
use crate::error::NetError;
use crate::message::Message;
use crate::protocol::MessageType;
use crate::session::SessionCore;

use super::object::{
    INVALID_NETWORK_ID, NetObject, NetworkId, ReplicaSlot, Replicated, Tracked, TypeDefinition,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationEvent {
    /// A replica was built from a remote create message.
    Created { network_id: NetworkId, type_id: u8 },
    /// A replica was torn down by a remote destroy message.
    Destroyed { network_id: NetworkId, type_id: u8 },
}

#[derive(Debug)]
struct Registry {
    objects: BTreeMap<NetworkId, NetObject>,
    types: HashMap<u8, TypeDefinition>,
    last_network_id: NetworkId,
    interval: Duration,
    last_send: Instant,
    pending_events: VecDeque<ReplicationEvent>,
}

impl Registry {
    /// Next unused id after the last one handed out, wrapping and skipping
    /// the invalid id.
    fn allocate_network_id(&mut self) -> Option<NetworkId> {
        let mut candidate = self.last_network_id;
        for _ in 0..INVALID_NETWORK_ID {
            candidate = candidate.wrapping_add(1);
            if candidate == INVALID_NETWORK_ID {
                candidate = 0;
            }
            if !self.objects.contains_key(&candidate) {
                self.last_network_id = candidate;
                return Some(candidate);
            }
        }
        None
    }
}

/// Tick-driven replication of registered object kinds over a session.
///
/// Only the host sends snapshots. Replicas keep the most recent snapshot
/// that arrived and apply it on the next [`NetObjectSystem::system_step`],
/// so later updates simply overwrite earlier unapplied ones.
#[derive(Debug)]
pub struct NetObjectSystem {
    registry: Rc<RefCell<Registry>>,
}

impl NetObjectSystem {
    /// Creates the replication tables and installs the create, destroy and
    /// update handlers on `session`.
    pub fn startup(session: &mut SessionCore, config: &ReplicationConfig) -> Self {
        let registry = Rc::new(RefCell::new(Registry {
            objects: BTreeMap::new(),
            types: HashMap::new(),
            last_network_id: INVALID_NETWORK_ID,
            interval: config.interval(),
            last_send: Instant::now(),
            pending_events: VecDeque::new(),
        }));

        let state = Rc::clone(&registry);
        session.register_message_function(MessageType::NET_CREATE, move |core, message| {
            on_create(&state, core, message)
        });
        let state = Rc::clone(&registry);
        session.register_message_function(MessageType::NET_DESTROY, move |core, message| {
            on_destroy(&state, core, message)
        });
        let state = Rc::clone(&registry);
        session.register_message_function(MessageType::NET_UPDATE, move |core, message| {
            on_update(&state, core, message)
        });

        log::debug!("Replication started at {} Hz", config.tick_hz);
        Self { registry }
    }

    /// Removes the handlers and drops every tracked object and type.
    pub fn shutdown(self, session: &mut SessionCore) {
        session.unregister_message_function(MessageType::NET_CREATE);
        session.unregister_message_function(MessageType::NET_DESTROY);
        session.unregister_message_function(MessageType::NET_UPDATE);

        let mut registry = self.registry.borrow_mut();
        log::debug!(
            "Replication stopped with {} objects tracked",
            registry.objects.len()
        );
        registry.objects.clear();
        registry.types.clear();
    }

    pub fn register_type<T: Replicated>(&self, type_id: u8) {
        let definition = TypeDefinition::of::<T>(type_id);
        if let Some(previous) = self
            .registry
            .borrow_mut()
            .types
            .insert(type_id, definition)
        {
            log::warn!(
                "Net object type {} re-registered (was {})",
                type_id,
                previous.name()
            );
        }
    }

    pub fn is_type_registered(&self, type_id: u8) -> bool {
        self.registry.borrow().types.contains_key(&type_id)
    }

    /// Starts replicating `object` to every other peer. Returns `None` if
    /// the type is not registered for `T` or no network id is free.
    pub fn replicate<T: Replicated>(
        &self,
        session: &mut SessionCore,
        object: Rc<RefCell<T>>,
        type_id: u8,
    ) -> Result<Option<NetworkId>, NetError> {
        let mut registry = self.registry.borrow_mut();

        match registry.types.get(&type_id) {
            Some(definition) if definition.is::<T>() => {}
            Some(definition) => {
                log::warn!(
                    "Type {} is registered for {}, not {}",
                    type_id,
                    definition.name(),
                    std::any::type_name::<T>()
                );
                return Ok(None);
            }
            None => {
                log::warn!("Cannot replicate unregistered type {}", type_id);
                return Ok(None);
            }
        }

        let Some(network_id) = registry.allocate_network_id() else {
            log::warn!("No free network id for type {}", type_id);
            return Ok(None);
        };

        let slot = Box::new(Tracked::new(object));
        let mut message = session.new_message(MessageType::NET_CREATE);
        message.write(&type_id)?;
        message.write(&network_id)?;
        slot.write_create(&mut message)?;

        registry
            .objects
            .insert(network_id, NetObject::new(network_id, type_id, slot));
        drop(registry);

        session.send_message_to_others(&message);
        log::debug!("Replicating object {} of type {}", network_id, type_id);
        Ok(Some(network_id))
    }

    /// Stops replicating `network_id` and tells the other peers to destroy
    /// their replicas. Unknown ids are a no-op.
    pub fn stop_replication(
        &self,
        session: &mut SessionCore,
        network_id: NetworkId,
    ) -> Result<bool, NetError> {
        let Some(object) = self.registry.borrow_mut().objects.remove(&network_id) else {
            return Ok(false);
        };

        let mut message = session.new_message(MessageType::NET_DESTROY);
        message.write(&network_id)?;
        object.slot.write_destroy(&mut message)?;

        session.send_message_to_others(&message);
        log::debug!("Stopped replicating object {}", network_id);
        Ok(true)
    }

    /// Once per frame. The host sends snapshots at the configured rate;
    /// everyone else applies whatever snapshots arrived since last step.
    pub fn system_step(&self, session: &mut SessionCore) -> Result<(), NetError> {
        if session.am_i_host() {
            let due = {
                let mut registry = self.registry.borrow_mut();
                let due = registry.last_send.elapsed() >= registry.interval;
                if due {
                    registry.last_send = Instant::now();
                }
                due
            };
            if due {
                self.send_net_object_updates(session)?;
            }
        } else if session.is_connected() {
            self.apply_received_snapshots();
        }
        Ok(())
    }

    /// Captures a fresh snapshot of every object and sends it to every
    /// other peer.
    pub fn send_net_object_updates(&self, session: &mut SessionCore) -> Result<(), NetError> {
        let mut updates = Vec::new();
        {
            let mut registry = self.registry.borrow_mut();
            for (&network_id, object) in registry.objects.iter_mut() {
                if !object.slot.capture_snapshot() {
                    log::debug!("Object {} is busy, keeping previous snapshot", network_id);
                }

                let mut message = session.new_message(MessageType::NET_UPDATE);
                message.write(&network_id)?;
                if object.slot.write_current_snapshot(&mut message)? {
                    updates.push(message);
                }
            }
        }

        for message in &updates {
            session.send_message_to_others(message);
        }
        Ok(())
    }

    /// Applies each object's pending snapshot. Returns how many applied.
    pub fn apply_received_snapshots(&self) -> usize {
        let mut registry = self.registry.borrow_mut();
        registry
            .objects
            .values_mut()
            .map(|object| object.slot.apply_received())
            .filter(|&applied| applied)
            .count()
    }

    /// Sends a create message for every tracked object to the peer at
    /// `index`, typically one that just joined.
    pub fn send_existing_to(&self, session: &mut SessionCore, index: u8) -> Result<(), NetError> {
        let mut creates = Vec::new();
        {
            let registry = self.registry.borrow();
            for object in registry.objects.values() {
                let mut message = session.new_message(MessageType::NET_CREATE);
                message.write(&object.type_id())?;
                message.write(&object.network_id())?;
                object.slot.write_create(&mut message)?;
                creates.push(message);
            }
        }

        log::debug!("Sending {} existing objects to peer {}", creates.len(), index);
        for message in creates {
            session.send_message_to_other(index, message)?;
        }
        Ok(())
    }

    pub fn object<T: Replicated>(&self, network_id: NetworkId) -> Option<Rc<RefCell<T>>> {
        self.registry
            .borrow()
            .objects
            .get(&network_id)
            .and_then(NetObject::object::<T>)
    }

    pub fn contains(&self, network_id: NetworkId) -> bool {
        self.registry.borrow().objects.contains_key(&network_id)
    }

    pub fn type_of(&self, network_id: NetworkId) -> Option<u8> {
        self.registry
            .borrow()
            .objects
            .get(&network_id)
            .map(NetObject::type_id)
    }

    pub fn network_ids(&self) -> Vec<NetworkId> {
        self.registry.borrow().objects.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.registry.borrow().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn drain_events(&self) -> Vec<ReplicationEvent> {
        self.registry.borrow_mut().pending_events.drain(..).collect()
    }
}

/// The host forwards creates and destroys from clients to everyone else so
/// all peers see the same set of objects.
fn relay_from_client(core: &mut SessionCore, message: &mut Message) {
    if core.am_i_host() && message.sender() != core.my_connection() {
        message.rewind();
        core.send_message_to_others_except_sender(message);
    }
}

fn on_create(
    registry: &Rc<RefCell<Registry>>,
    core: &mut SessionCore,
    message: &mut Message,
) -> Result<(), NetError> {
    let type_id: u8 = message.read()?;
    let network_id: NetworkId = message.read()?;

    let create = registry
        .borrow()
        .types
        .get(&type_id)
        .map(|definition| definition.create)
        .ok_or(NetError::UnknownNetObjectType(type_id))?;

    let slot = create(message)?;

    {
        let mut registry = registry.borrow_mut();
        if registry
            .objects
            .insert(network_id, NetObject::new(network_id, type_id, slot))
            .is_some()
        {
            log::warn!("Net object {} recreated", network_id);
        }
        registry.pending_events.push_back(ReplicationEvent::Created {
            network_id,
            type_id,
        });
    }

    log::debug!("Created replica {} of type {}", network_id, type_id);
    relay_from_client(core, message);
    Ok(())
}

fn on_destroy(
    registry: &Rc<RefCell<Registry>>,
    core: &mut SessionCore,
    message: &mut Message,
) -> Result<(), NetError> {
    let network_id: NetworkId = message.read()?;

    let Some(mut object) = registry.borrow_mut().objects.remove(&network_id) else {
        log::debug!("Destroy for unknown net object {}", network_id);
        return Ok(());
    };

    object.slot.destroy_with(message)?;
    registry
        .borrow_mut()
        .pending_events
        .push_back(ReplicationEvent::Destroyed {
            network_id,
            type_id: object.type_id(),
        });

    log::debug!("Destroyed replica {}", network_id);
    relay_from_client(core, message);
    Ok(())
}

fn on_update(
    registry: &Rc<RefCell<Registry>>,
    _core: &mut SessionCore,
    message: &mut Message,
) -> Result<(), NetError> {
    let network_id: NetworkId = message.read()?;

    let mut registry = registry.borrow_mut();
    match registry.objects.get_mut(&network_id) {
        Some(object) => object.slot.receive_snapshot(message)?,
        None => log::trace!("Update for unknown net object {}", network_id),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use crate::config::SessionConfig;
    use crate::connection::{Connection, ConnectionId};
    use crate::message::MessageError;
    use crate::session::SessionState;

    #[derive(Debug)]
    struct Beacon {
        label: String,
        level: u32,
        applied: Vec<u32>,
        destroyed: bool,
    }

    impl Replicated for Beacon {
        type Snapshot = u32;

        fn write_create(&self, message: &mut Message) -> Result<(), MessageError> {
            message.write(&self.label)?;
            message.write(&self.level)
        }

        fn create_from(message: &mut Message) -> Result<Self, MessageError> {
            Ok(Beacon {
                label: message.read()?,
                level: message.read()?,
                applied: Vec::new(),
                destroyed: false,
            })
        }

        fn destroy_with(&mut self, _message: &mut Message) -> Result<(), MessageError> {
            self.destroyed = true;
            Ok(())
        }

        fn snapshot(&self) -> u32 {
            self.level
        }

        fn apply_snapshot(&mut self, snapshot: &u32) {
            self.level = *snapshot;
            self.applied.push(*snapshot);
        }

        fn write_snapshot(snapshot: &u32, message: &mut Message) -> Result<(), MessageError> {
            message.write(snapshot)
        }

        fn read_snapshot(message: &mut Message) -> Result<u32, MessageError> {
            message.read()
        }
    }

    fn beacon(label: &str, level: u32) -> Rc<RefCell<Beacon>> {
        Rc::new(RefCell::new(Beacon {
            label: label.to_string(),
            level,
            applied: Vec::new(),
            destroyed: false,
        }))
    }

    /// A core whose own connection is index 0, plus `peers` loopback queues
    /// standing in for remote peers at indices 1..
    fn core_with_peers(host: bool, peers: usize) -> (SessionCore, Vec<ConnectionId>) {
        let mut core = SessionCore::new(&SessionConfig::default());
        let mut ids = Vec::new();
        for index in 0..=peers {
            let id = core.allocate_connection_id();
            core.add_connection(Connection::loopback(id, Address::localhost(0)));
            assert!(core.register_connection_index(id, index as u8));
            ids.push(id);
        }
        core.set_my_connection(Some(ids[0]));
        core.set_host_connection(Some(if host { ids[0] } else { ids[1] }));
        core.set_state(SessionState::Ready);
        (core, ids)
    }

    fn drain(core: &mut SessionCore, id: ConnectionId) -> Vec<Message> {
        let mut messages = Vec::new();
        while let Some(message) = core.receive_from(id).unwrap() {
            messages.push(message);
        }
        messages
    }

    fn fast_config() -> ReplicationConfig {
        ReplicationConfig { tick_hz: 1000 }
    }

    #[test]
    fn replicate_broadcasts_create_to_others() {
        let (mut core, ids) = core_with_peers(true, 2);
        let system = NetObjectSystem::startup(&mut core, &fast_config());
        system.register_type::<Beacon>(7);

        let id = system
            .replicate(&mut core, beacon("north", 3), 7)
            .unwrap()
            .unwrap();
        assert_eq!(id, 0);
        assert!(system.contains(id));

        assert!(drain(&mut core, ids[0]).is_empty());
        for &peer in &ids[1..] {
            let mut created = drain(&mut core, peer);
            assert_eq!(created.len(), 1);
            let message = &mut created[0];
            assert_eq!(message.message_type(), MessageType::NET_CREATE);
            assert_eq!(message.read::<u8>().unwrap(), 7);
            assert_eq!(message.read::<u16>().unwrap(), id);
            assert_eq!(message.read::<String>().unwrap(), "north");
            assert_eq!(message.read::<u32>().unwrap(), 3);
        }
    }

    #[test]
    fn replicate_rejects_unknown_or_mismatched_types() {
        let (mut core, ids) = core_with_peers(true, 1);
        let system = NetObjectSystem::startup(&mut core, &fast_config());
        assert_eq!(system.replicate(&mut core, beacon("a", 0), 1).unwrap(), None);

        #[derive(Debug)]
        struct Other;
        impl Replicated for Other {
            type Snapshot = ();
            fn write_create(&self, _: &mut Message) -> Result<(), MessageError> {
                Ok(())
            }
            fn create_from(_: &mut Message) -> Result<Self, MessageError> {
                Ok(Other)
            }
            fn snapshot(&self) {}
            fn apply_snapshot(&mut self, _: &()) {}
            fn write_snapshot(_: &(), _: &mut Message) -> Result<(), MessageError> {
                Ok(())
            }
            fn read_snapshot(_: &mut Message) -> Result<(), MessageError> {
                Ok(())
            }
        }

        system.register_type::<Other>(1);
        assert_eq!(system.replicate(&mut core, beacon("a", 0), 1).unwrap(), None);
        assert!(system.is_empty());
        assert!(drain(&mut core, ids[1]).is_empty());
    }

    #[test]
    fn network_ids_skip_used_and_wrap() {
        let mut registry = Registry {
            objects: BTreeMap::new(),
            types: HashMap::new(),
            last_network_id: 0xFFFD,
            interval: Duration::ZERO,
            last_send: Instant::now(),
            pending_events: VecDeque::new(),
        };
        registry.objects.insert(0, NetObject::new(0, 0, Box::new(Tracked::new(beacon("x", 0)))));

        assert_eq!(registry.allocate_network_id(), Some(0xFFFE));
        assert_eq!(registry.allocate_network_id(), Some(1));
        assert_eq!(registry.allocate_network_id(), Some(2));
    }

    #[test]
    fn stop_replication_unknown_is_noop() {
        let (mut core, ids) = core_with_peers(true, 1);
        let system = NetObjectSystem::startup(&mut core, &fast_config());
        system.register_type::<Beacon>(7);

        assert!(!system.stop_replication(&mut core, 42).unwrap());
        assert!(drain(&mut core, ids[1]).is_empty());

        let id = system
            .replicate(&mut core, beacon("a", 1), 7)
            .unwrap()
            .unwrap();
        drain(&mut core, ids[1]);

        assert!(system.stop_replication(&mut core, id).unwrap());
        assert!(!system.stop_replication(&mut core, id).unwrap());

        let destroys = drain(&mut core, ids[1]);
        assert_eq!(destroys.len(), 1);
        assert_eq!(destroys[0].message_type(), MessageType::NET_DESTROY);
    }

    #[test]
    fn create_for_unregistered_type_is_fatal() {
        let (mut core, _) = core_with_peers(false, 1);
        let _system = NetObjectSystem::startup(&mut core, &fast_config());

        let mut message = core.new_message(MessageType::NET_CREATE);
        message.write(&99u8).unwrap();
        message.write(&5u16).unwrap();

        let err = core.process_message(&mut message).unwrap_err();
        assert!(matches!(err, NetError::UnknownNetObjectType(99)));
        assert!(err.is_fatal());
    }

    #[test]
    fn replica_lifecycle_on_client() {
        let (mut core, _) = core_with_peers(false, 1);
        let system = NetObjectSystem::startup(&mut core, &fast_config());
        system.register_type::<Beacon>(7);

        let mut create = core.new_message(MessageType::NET_CREATE);
        create.write(&7u8).unwrap();
        create.write(&11u16).unwrap();
        create.write(&String::from("east")).unwrap();
        create.write(&2u32).unwrap();
        core.process_message(&mut create).unwrap();

        let replica = system.object::<Beacon>(11).unwrap();
        assert_eq!(replica.borrow().label, "east");
        assert_eq!(system.type_of(11), Some(7));

        let mut destroy = core.new_message(MessageType::NET_DESTROY);
        destroy.write(&11u16).unwrap();
        core.process_message(&mut destroy).unwrap();

        assert!(!system.contains(11));
        assert!(replica.borrow().destroyed);
        assert_eq!(
            system.drain_events(),
            vec![
                ReplicationEvent::Created {
                    network_id: 11,
                    type_id: 7
                },
                ReplicationEvent::Destroyed {
                    network_id: 11,
                    type_id: 7
                },
            ]
        );

        // unknown ids are ignored
        let mut destroy = core.new_message(MessageType::NET_DESTROY);
        destroy.write(&11u16).unwrap();
        core.process_message(&mut destroy).unwrap();
        let mut update = core.new_message(MessageType::NET_UPDATE);
        update.write(&11u16).unwrap();
        update.write(&1u32).unwrap();
        core.process_message(&mut update).unwrap();
    }

    #[test]
    fn last_received_update_wins() {
        let (mut core, _) = core_with_peers(false, 1);
        let system = NetObjectSystem::startup(&mut core, &fast_config());
        system.register_type::<Beacon>(7);

        let mut create = core.new_message(MessageType::NET_CREATE);
        create.write(&7u8).unwrap();
        create.write(&3u16).unwrap();
        create.write(&String::from("west")).unwrap();
        create.write(&0u32).unwrap();
        core.process_message(&mut create).unwrap();

        for level in [10u32, 20] {
            let mut update = core.new_message(MessageType::NET_UPDATE);
            update.write(&3u16).unwrap();
            update.write(&level).unwrap();
            core.process_message(&mut update).unwrap();
        }

        let replica = system.object::<Beacon>(3).unwrap();
        assert!(replica.borrow().applied.is_empty());

        system.system_step(&mut core).unwrap();
        assert_eq!(replica.borrow().applied, vec![20]);
        assert_eq!(replica.borrow().level, 20);

        system.system_step(&mut core).unwrap();
        assert_eq!(replica.borrow().applied, vec![20]);
    }

    #[test]
    fn host_sends_updates_on_interval() {
        let (mut core, ids) = core_with_peers(true, 1);
        let system = NetObjectSystem::startup(&mut core, &fast_config());
        system.register_type::<Beacon>(7);

        let object = beacon("south", 1);
        let id = system
            .replicate(&mut core, Rc::clone(&object), 7)
            .unwrap()
            .unwrap();
        drain(&mut core, ids[1]);

        object.borrow_mut().level = 8;
        std::thread::sleep(Duration::from_millis(5));
        system.system_step(&mut core).unwrap();

        let mut updates = drain(&mut core, ids[1]);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].message_type(), MessageType::NET_UPDATE);
        assert_eq!(updates[0].read::<u16>().unwrap(), id);
        assert_eq!(updates[0].read::<u32>().unwrap(), 8);
        assert!(drain(&mut core, ids[0]).is_empty());

        // host never applies received snapshots to its own objects
        assert!(object.borrow().applied.is_empty());
    }

    #[test]
    fn host_relays_client_creates() {
        let (mut core, ids) = core_with_peers(true, 2);
        let system = NetObjectSystem::startup(&mut core, &fast_config());
        system.register_type::<Beacon>(7);

        let mut create = core.new_message(MessageType::NET_CREATE);
        create.write(&7u8).unwrap();
        create.write(&40u16).unwrap();
        create.write(&String::from("relay")).unwrap();
        create.write(&5u32).unwrap();
        create.set_sender(ids[1]);
        core.process_message(&mut create).unwrap();

        assert!(system.contains(40));
        assert!(drain(&mut core, ids[0]).is_empty());
        assert!(drain(&mut core, ids[1]).is_empty());

        let mut relayed = drain(&mut core, ids[2]);
        assert_eq!(relayed.len(), 1);
        assert_eq!(relayed[0].read::<u8>().unwrap(), 7);
        assert_eq!(relayed[0].read::<u16>().unwrap(), 40);
    }

    #[test]
    fn late_joiner_receives_existing_objects() {
        let (mut core, ids) = core_with_peers(true, 1);
        let system = NetObjectSystem::startup(&mut core, &fast_config());
        system.register_type::<Beacon>(7);
        system.replicate(&mut core, beacon("a", 1), 7).unwrap();
        system.replicate(&mut core, beacon("b", 2), 7).unwrap();
        drain(&mut core, ids[1]);

        system.send_existing_to(&mut core, 1).unwrap();
        let creates = drain(&mut core, ids[1]);
        assert_eq!(creates.len(), 2);
        assert!(creates
            .iter()
            .all(|m| m.message_type() == MessageType::NET_CREATE));
    }

    #[test]
    fn shutdown_unregisters_handlers() {
        let (mut core, _) = core_with_peers(false, 1);
        let system = NetObjectSystem::startup(&mut core, &fast_config());
        assert!(core.has_message_function(MessageType::NET_UPDATE));

        system.shutdown(&mut core);
        assert!(!core.has_message_function(MessageType::NET_CREATE));
        assert!(!core.has_message_function(MessageType::NET_DESTROY));
        assert!(!core.has_message_function(MessageType::NET_UPDATE));
    }
}
