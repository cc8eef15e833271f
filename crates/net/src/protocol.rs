/// Payload bytes a single [`Message`](crate::Message) can carry.
pub const MESSAGE_CAPACITY: usize = 1024;

/// `[u16 length][u8 type]` prefix in front of every payload on the wire.
pub const FRAME_HEADER_SIZE: usize = 3;
pub const MAX_FRAME_SIZE: usize = MESSAGE_CAPACITY + FRAME_HEADER_SIZE;

/// Unsent bytes a TCP link may hold before the peer is dropped.
pub const MAX_PENDING_OUTBOUND: usize = 64 * MAX_FRAME_SIZE;

pub const DEFAULT_PORT: u16 = 7777;
pub const DEFAULT_TICK_RATE: u32 = 60;
pub const DEFAULT_REPLICATION_RATE: u32 = 20;

/// Highest number of peers a session can address (indices 0..=254).
pub const MAX_CONNECTIONS: usize = 255;
pub const INVALID_CONNECTION_INDEX: u8 = 0xFF;
pub const HOST_CONNECTION_INDEX: u8 = 0;

/// Length prefix that marks an absent string.
pub const NULL_STRING_LENGTH: u16 = 0xFFFF;
pub const MAX_STRING_LENGTH: usize = 0xFFFE;

/// Reserved message type tags. Application types may use any other value.
pub struct MessageType;

impl MessageType {
    pub const JOIN_RESPONSE: u8 = 0;
    pub const PING: u8 = 1;
    pub const PONG: u8 = 2;
    pub const NET_CREATE: u8 = 34;
    pub const NET_DESTROY: u8 = 35;
    pub const NET_UPDATE: u8 = 36;
    pub const RPC_CALL: u8 = 37;
    pub const RPC_RETURN: u8 = 38;

    pub fn name(message_type: u8) -> &'static str {
        match message_type {
            Self::JOIN_RESPONSE => "join_response",
            Self::PING => "ping",
            Self::PONG => "pong",
            Self::NET_CREATE => "net_create",
            Self::NET_DESTROY => "net_destroy",
            Self::NET_UPDATE => "net_update",
            Self::RPC_CALL => "rpc_call",
            Self::RPC_RETURN => "rpc_return",
            _ => "user",
        }
    }
}
