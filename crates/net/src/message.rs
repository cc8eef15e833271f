use std::fmt;
use std::mem::size_of;

use glam::{Mat4, Quat, Vec2, Vec3, Vec4};
use serde::{Deserialize, Serialize};

use crate::connection::ConnectionId;
use crate::protocol::{MAX_STRING_LENGTH, MESSAGE_CAPACITY, NULL_STRING_LENGTH};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    #[error("write of {requested} bytes overflows message ({available} bytes left)")]
    Overflow { requested: usize, available: usize },
    #[error("read of {requested} bytes underflows message ({remaining} bytes unread)")]
    Underflow { requested: usize, remaining: usize },
}

/// Byte order used for multi-byte primitives. Peers never negotiate it, so
/// both sides must be configured alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
}

/// Fixed-capacity binary envelope with independent read and write cursors.
///
/// Invariant: `read_pos <= write_pos <= MESSAGE_CAPACITY`.
#[derive(Clone)]
pub struct Message {
    message_type: u8,
    buffer: Box<[u8; MESSAGE_CAPACITY]>,
    write_pos: usize,
    read_pos: usize,
    byte_order: ByteOrder,
    sender: Option<ConnectionId>,
}

impl Message {
    pub fn new(message_type: u8) -> Self {
        Self {
            message_type,
            buffer: Box::new([0u8; MESSAGE_CAPACITY]),
            write_pos: 0,
            read_pos: 0,
            byte_order: ByteOrder::default(),
            sender: None,
        }
    }

    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = byte_order;
        self
    }

    /// Builds a message around a payload received from the wire.
    pub fn from_payload(message_type: u8, payload: &[u8]) -> Result<Self, MessageError> {
        let mut message = Self::new(message_type);
        message.write_bytes(payload)?;
        Ok(message)
    }

    pub fn message_type(&self) -> u8 {
        self.message_type
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    /// Connection the message arrived on. Only set on receipt.
    pub fn sender(&self) -> Option<ConnectionId> {
        self.sender
    }

    pub(crate) fn set_sender(&mut self, sender: ConnectionId) {
        self.sender = Some(sender);
    }

    /// The message as a receiver sees it: cursor at the start, no sender.
    pub(crate) fn into_delivery(mut self) -> Self {
        self.read_pos = 0;
        self.sender = None;
        self
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer[..self.write_pos]
    }

    pub fn len(&self) -> usize {
        self.write_pos
    }

    pub fn is_empty(&self) -> bool {
        self.write_pos == 0
    }

    pub fn available(&self) -> usize {
        MESSAGE_CAPACITY - self.write_pos
    }

    pub fn remaining(&self) -> usize {
        self.write_pos - self.read_pos
    }

    pub fn read_position(&self) -> usize {
        self.read_pos
    }

    /// Moves the read cursor back to the start of the payload.
    pub fn rewind(&mut self) {
        self.read_pos = 0;
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), MessageError> {
        if bytes.len() > self.available() {
            return Err(MessageError::Overflow {
                requested: bytes.len(),
                available: self.available(),
            });
        }

        self.buffer[self.write_pos..self.write_pos + bytes.len()].copy_from_slice(bytes);
        self.write_pos += bytes.len();
        Ok(())
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&[u8], MessageError> {
        if len > self.remaining() {
            return Err(MessageError::Underflow {
                requested: len,
                remaining: self.remaining(),
            });
        }

        let start = self.read_pos;
        self.read_pos += len;
        Ok(&self.buffer[start..start + len])
    }

    /// Everything between the read cursor and the write cursor, consumed.
    pub fn read_remaining(&mut self) -> &[u8] {
        let start = self.read_pos;
        self.read_pos = self.write_pos;
        &self.buffer[start..self.write_pos]
    }

    pub fn write<T: NetCodec>(&mut self, value: &T) -> Result<(), MessageError> {
        value.encode(self)
    }

    pub fn read<T: NetCodec>(&mut self) -> Result<T, MessageError> {
        T::decode(self)
    }

    /// Writes a 16-bit length prefix followed by the UTF-8 bytes. `None` is
    /// encoded as the null length; longer strings are clamped.
    pub fn write_string(&mut self, value: Option<&str>) -> Result<(), MessageError> {
        let Some(value) = value else {
            return self.write(&NULL_STRING_LENGTH);
        };

        let bytes = &value.as_bytes()[..value.len().min(MAX_STRING_LENGTH)];
        if 2 + bytes.len() > self.available() {
            return Err(MessageError::Overflow {
                requested: 2 + bytes.len(),
                available: self.available(),
            });
        }

        self.write(&(bytes.len() as u16))?;
        self.write_bytes(bytes)
    }

    pub fn read_optional_string(&mut self) -> Result<Option<String>, MessageError> {
        let len: u16 = self.read()?;
        if len == NULL_STRING_LENGTH {
            return Ok(None);
        }

        let bytes = self.read_bytes(len as usize)?;
        Ok(Some(String::from_utf8_lossy(bytes).into_owned()))
    }

    /// Reads a string written by [`Message::write_string`]; a null string
    /// reads back as empty.
    pub fn read_string(&mut self) -> Result<String, MessageError> {
        Ok(self.read_optional_string()?.unwrap_or_default())
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("message_type", &self.message_type)
            .field("len", &self.write_pos)
            .field("read_pos", &self.read_pos)
            .field("byte_order", &self.byte_order)
            .field("sender", &self.sender)
            .finish()
    }
}

/// Binary encoding of a value inside a [`Message`].
pub trait NetCodec: Sized {
    fn encode(&self, message: &mut Message) -> Result<(), MessageError>;
    fn decode(message: &mut Message) -> Result<Self, MessageError>;
}

macro_rules! impl_primitive_codec {
    ($($ty:ty),* $(,)?) => {
        $(
            impl NetCodec for $ty {
                fn encode(&self, message: &mut Message) -> Result<(), MessageError> {
                    let bytes = match message.byte_order() {
                        ByteOrder::Little => self.to_le_bytes(),
                        ByteOrder::Big => self.to_be_bytes(),
                    };
                    message.write_bytes(&bytes)
                }

                fn decode(message: &mut Message) -> Result<Self, MessageError> {
                    let byte_order = message.byte_order();
                    let mut raw = [0u8; size_of::<$ty>()];
                    raw.copy_from_slice(message.read_bytes(size_of::<$ty>())?);
                    Ok(match byte_order {
                        ByteOrder::Little => <$ty>::from_le_bytes(raw),
                        ByteOrder::Big => <$ty>::from_be_bytes(raw),
                    })
                }
            }
        )*
    };
}

impl_primitive_codec!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

impl NetCodec for bool {
    fn encode(&self, message: &mut Message) -> Result<(), MessageError> {
        message.write(&(*self as u8))
    }

    fn decode(message: &mut Message) -> Result<Self, MessageError> {
        Ok(message.read::<u8>()? != 0)
    }
}

impl NetCodec for String {
    fn encode(&self, message: &mut Message) -> Result<(), MessageError> {
        message.write_string(Some(self.as_str()))
    }

    fn decode(message: &mut Message) -> Result<Self, MessageError> {
        message.read_string()
    }
}

impl<const N: usize> NetCodec for [f32; N] {
    fn encode(&self, message: &mut Message) -> Result<(), MessageError> {
        if N * 4 > message.available() {
            return Err(MessageError::Overflow {
                requested: N * 4,
                available: message.available(),
            });
        }
        for value in self {
            message.write(value)?;
        }
        Ok(())
    }

    fn decode(message: &mut Message) -> Result<Self, MessageError> {
        if N * 4 > message.remaining() {
            return Err(MessageError::Underflow {
                requested: N * 4,
                remaining: message.remaining(),
            });
        }
        let mut values = [0.0f32; N];
        for value in &mut values {
            *value = message.read()?;
        }
        Ok(values)
    }
}

impl NetCodec for Vec2 {
    fn encode(&self, message: &mut Message) -> Result<(), MessageError> {
        message.write(&self.to_array())
    }

    fn decode(message: &mut Message) -> Result<Self, MessageError> {
        Ok(Vec2::from_array(message.read()?))
    }
}

impl NetCodec for Vec3 {
    fn encode(&self, message: &mut Message) -> Result<(), MessageError> {
        message.write(&self.to_array())
    }

    fn decode(message: &mut Message) -> Result<Self, MessageError> {
        Ok(Vec3::from_array(message.read()?))
    }
}

impl NetCodec for Vec4 {
    fn encode(&self, message: &mut Message) -> Result<(), MessageError> {
        message.write(&self.to_array())
    }

    fn decode(message: &mut Message) -> Result<Self, MessageError> {
        Ok(Vec4::from_array(message.read()?))
    }
}

impl NetCodec for Quat {
    fn encode(&self, message: &mut Message) -> Result<(), MessageError> {
        message.write(&self.to_array())
    }

    fn decode(message: &mut Message) -> Result<Self, MessageError> {
        Ok(Quat::from_array(message.read()?))
    }
}

impl NetCodec for Mat4 {
    fn encode(&self, message: &mut Message) -> Result<(), MessageError> {
        message.write(&self.to_cols_array())
    }

    fn decode(message: &mut Message) -> Result<Self, MessageError> {
        Ok(Mat4::from_cols_array(&message.read()?))
    }
}
