use std::any::{Any, TypeId, type_name};
use std::cell::RefCell;
use std::rc::Rc;

use crate::message::{Message, MessageError};

pub type NetworkId = u16;
pub const INVALID_NETWORK_ID: NetworkId = 0xFFFF;

/// A kind of game object that can be mirrored on other peers.
///
/// The replication layer never looks inside the object; it only routes the
/// bytes these methods produce and consume.
pub trait Replicated: 'static {
    type Snapshot: 'static;

    /// Everything a replica needs to construct itself.
    fn write_create(&self, message: &mut Message) -> Result<(), MessageError>;

    /// Builds the replica from the bytes written by `write_create`.
    fn create_from(message: &mut Message) -> Result<Self, MessageError>
    where
        Self: Sized;

    fn write_destroy(&self, _message: &mut Message) -> Result<(), MessageError> {
        Ok(())
    }

    /// Runs on the replica before it is dropped from the registry.
    fn destroy_with(&mut self, _message: &mut Message) -> Result<(), MessageError> {
        Ok(())
    }

    fn snapshot(&self) -> Self::Snapshot;
    fn apply_snapshot(&mut self, snapshot: &Self::Snapshot);

    fn write_snapshot(snapshot: &Self::Snapshot, message: &mut Message)
    -> Result<(), MessageError>;
    fn read_snapshot(message: &mut Message) -> Result<Self::Snapshot, MessageError>;
}

/// Type-erased view of a tracked object used by the registry.
pub(crate) trait ReplicaSlot {
    fn write_create(&self, message: &mut Message) -> Result<(), MessageError>;
    fn write_destroy(&self, message: &mut Message) -> Result<(), MessageError>;
    fn destroy_with(&mut self, message: &mut Message) -> Result<(), MessageError>;

    /// Refreshes the current snapshot from the object. Returns false if the
    /// object is borrowed elsewhere.
    fn capture_snapshot(&mut self) -> bool;
    fn write_current_snapshot(&self, message: &mut Message) -> Result<bool, MessageError>;

    /// Stores an incoming snapshot, replacing any unapplied one.
    fn receive_snapshot(&mut self, message: &mut Message) -> Result<(), MessageError>;

    /// Applies the pending received snapshot, if any.
    fn apply_received(&mut self) -> bool;
    fn has_pending_snapshot(&self) -> bool;

    fn as_any(&self) -> &dyn Any;
}

pub(crate) struct Tracked<T: Replicated> {
    object: Rc<RefCell<T>>,
    last_received: Option<T::Snapshot>,
    current: Option<T::Snapshot>,
}

impl<T: Replicated> Tracked<T> {
    pub(crate) fn new(object: Rc<RefCell<T>>) -> Self {
        Self {
            object,
            last_received: None,
            current: None,
        }
    }

    pub(crate) fn object(&self) -> Rc<RefCell<T>> {
        Rc::clone(&self.object)
    }
}

impl<T: Replicated> ReplicaSlot for Tracked<T> {
    fn write_create(&self, message: &mut Message) -> Result<(), MessageError> {
        self.object.borrow().write_create(message)
    }

    fn write_destroy(&self, message: &mut Message) -> Result<(), MessageError> {
        self.object.borrow().write_destroy(message)
    }

    fn destroy_with(&mut self, message: &mut Message) -> Result<(), MessageError> {
        self.object.borrow_mut().destroy_with(message)
    }

    fn capture_snapshot(&mut self) -> bool {
        match self.object.try_borrow() {
            Ok(object) => {
                self.current = Some(object.snapshot());
                true
            }
            Err(_) => false,
        }
    }

    fn write_current_snapshot(&self, message: &mut Message) -> Result<bool, MessageError> {
        match &self.current {
            Some(snapshot) => T::write_snapshot(snapshot, message).map(|_| true),
            None => Ok(false),
        }
    }

    fn receive_snapshot(&mut self, message: &mut Message) -> Result<(), MessageError> {
        self.last_received = Some(T::read_snapshot(message)?);
        Ok(())
    }

    fn apply_received(&mut self) -> bool {
        if self.last_received.is_none() {
            return false;
        }
        let Ok(mut object) = self.object.try_borrow_mut() else {
            // retried next step
            return false;
        };
        if let Some(snapshot) = self.last_received.take() {
            object.apply_snapshot(&snapshot);
        }
        true
    }

    fn has_pending_snapshot(&self) -> bool {
        self.last_received.is_some()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(crate) type CreateFn = fn(&mut Message) -> Result<Box<dyn ReplicaSlot>, MessageError>;

fn create_slot<T: Replicated>(message: &mut Message) -> Result<Box<dyn ReplicaSlot>, MessageError> {
    let object = T::create_from(message)?;
    Ok(Box::new(Tracked::new(Rc::new(RefCell::new(object)))))
}

/// Registered replicated kind, keyed by a one-byte type id.
#[derive(Debug, Clone)]
pub struct TypeDefinition {
    type_id: u8,
    name: &'static str,
    rust_type: TypeId,
    pub(crate) create: CreateFn,
}

impl TypeDefinition {
    pub(crate) fn of<T: Replicated>(type_id: u8) -> Self {
        Self {
            type_id,
            name: type_name::<T>(),
            rust_type: TypeId::of::<T>(),
            create: create_slot::<T>,
        }
    }

    pub fn type_id(&self) -> u8 {
        self.type_id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is<T: Replicated>(&self) -> bool {
        self.rust_type == TypeId::of::<T>()
    }
}

/// Replication-side identity of one local object.
pub struct NetObject {
    network_id: NetworkId,
    type_id: u8,
    pub(crate) slot: Box<dyn ReplicaSlot>,
}

impl NetObject {
    pub(crate) fn new(network_id: NetworkId, type_id: u8, slot: Box<dyn ReplicaSlot>) -> Self {
        Self {
            network_id,
            type_id,
            slot,
        }
    }

    pub fn network_id(&self) -> NetworkId {
        self.network_id
    }

    pub fn type_id(&self) -> u8 {
        self.type_id
    }

    /// The local object, if it is a `T`.
    pub fn object<T: Replicated>(&self) -> Option<Rc<RefCell<T>>> {
        self.slot
            .as_any()
            .downcast_ref::<Tracked<T>>()
            .map(Tracked::object)
    }

    pub fn has_pending_snapshot(&self) -> bool {
        self.slot.has_pending_snapshot()
    }
}

impl std::fmt::Debug for NetObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetObject")
            .field("network_id", &self.network_id)
            .field("type_id", &self.type_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Counter {
        value: u32,
        applied: Vec<u32>,
    }

    impl Replicated for Counter {
        type Snapshot = u32;

        fn write_create(&self, message: &mut Message) -> Result<(), MessageError> {
            message.write(&self.value)
        }

        fn create_from(message: &mut Message) -> Result<Self, MessageError> {
            Ok(Counter {
                value: message.read()?,
                applied: Vec::new(),
            })
        }

        fn snapshot(&self) -> u32 {
            self.value
        }

        fn apply_snapshot(&mut self, snapshot: &u32) {
            self.value = *snapshot;
            self.applied.push(*snapshot);
        }

        fn write_snapshot(snapshot: &u32, message: &mut Message) -> Result<(), MessageError> {
            message.write(snapshot)
        }

        fn read_snapshot(message: &mut Message) -> Result<u32, MessageError> {
            message.read()
        }
    }

    fn counter(value: u32) -> Rc<RefCell<Counter>> {
        Rc::new(RefCell::new(Counter {
            value,
            applied: Vec::new(),
        }))
    }

    #[test]
    fn definition_creates_typed_slot() {
        let definition = TypeDefinition::of::<Counter>(4);
        assert!(definition.is::<Counter>());
        assert!(definition.name().ends_with("Counter"));

        let mut message = Message::new(0);
        message.write(&77u32).unwrap();
        let slot = (definition.create)(&mut message).unwrap();
        let object = NetObject::new(1, 4, slot);

        assert_eq!(object.object::<Counter>().unwrap().borrow().value, 77);
    }

    #[test]
    fn only_latest_received_snapshot_applies() {
        let object = counter(0);
        let mut tracked = Tracked::new(Rc::clone(&object));

        for value in [5u32, 9] {
            let mut message = Message::new(0);
            message.write(&value).unwrap();
            tracked.receive_snapshot(&mut message).unwrap();
        }

        assert!(tracked.apply_received());
        assert!(!tracked.apply_received());
        assert_eq!(object.borrow().applied, vec![9]);
    }

    #[test]
    fn borrowed_object_defers_apply() {
        let object = counter(0);
        let mut tracked = Tracked::new(Rc::clone(&object));

        let mut message = Message::new(0);
        message.write(&3u32).unwrap();
        tracked.receive_snapshot(&mut message).unwrap();

        {
            let _guard = object.borrow();
            assert!(!tracked.apply_received());
            assert!(tracked.has_pending_snapshot());
        }
        assert!(tracked.apply_received());
        assert_eq!(object.borrow().value, 3);
    }

    #[test]
    fn current_snapshot_written_after_capture() {
        let mut tracked = Tracked::new(counter(12));
        let mut message = Message::new(0);
        assert!(!tracked.write_current_snapshot(&mut message).unwrap());

        assert!(tracked.capture_snapshot());
        assert!(tracked.write_current_snapshot(&mut message).unwrap());
        assert_eq!(message.read::<u32>().unwrap(), 12);
    }
}
