pub mod address;
pub mod config;
pub mod connection;
pub mod error;
pub mod message;
pub mod protocol;
pub mod replication;
pub mod rpc;
pub mod session;
pub mod socket;

pub use address::{Address, Ip};
pub use config::{ReplicationConfig, SessionConfig};
pub use connection::{Connection, ConnectionId, Link};
pub use error::{NetError, SocketError};
pub use message::{ByteOrder, Message, MessageError, NetCodec};
pub use protocol::{
    DEFAULT_PORT, DEFAULT_REPLICATION_RATE, DEFAULT_TICK_RATE, HOST_CONNECTION_INDEX,
    INVALID_CONNECTION_INDEX, MAX_CONNECTIONS, MESSAGE_CAPACITY, MessageType,
};
pub use replication::{
    INVALID_NETWORK_ID, NetObject, NetObjectSystem, NetworkId, Replicated, ReplicationEvent,
    TypeDefinition,
};
pub use rpc::{RpcEntry, RpcFunction, RpcSystem, RpcType, RpcValue};
pub use session::{
    DisconnectReason, MessageHandler, Session, SessionCore, SessionEvent, SessionState,
    TcpSession,
};
pub use socket::{ListenSocket, TcpSocket};
