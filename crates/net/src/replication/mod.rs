mod object;
mod system;

pub use object::{INVALID_NETWORK_ID, NetObject, NetworkId, Replicated, TypeDefinition};
pub use system::{NetObjectSystem, ReplicationEvent};
