use std::fmt;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::error::NetError;
use crate::message::{Message, MessageError};

/// Argument kinds an RPC signature can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum RpcType {
    U8 = 0,
    U32 = 1,
    I32 = 2,
    I64 = 3,
    F32 = 4,
    F64 = 5,
    Bool = 6,
    Str = 7,
    Vec3 = 8,
    Bytes = 9,
}

impl RpcType {
    pub fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => RpcType::U8,
            1 => RpcType::U32,
            2 => RpcType::I32,
            3 => RpcType::I64,
            4 => RpcType::F32,
            5 => RpcType::F64,
            6 => RpcType::Bool,
            7 => RpcType::Str,
            8 => RpcType::Vec3,
            9 => RpcType::Bytes,
            _ => return None,
        })
    }

    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Encoded size for fixed-width kinds.
    pub fn fixed_size(self) -> Option<usize> {
        match self {
            RpcType::U8 | RpcType::Bool => Some(1),
            RpcType::U32 | RpcType::I32 | RpcType::F32 => Some(4),
            RpcType::I64 | RpcType::F64 => Some(8),
            RpcType::Vec3 => Some(12),
            RpcType::Str | RpcType::Bytes => None,
        }
    }
}

/// One marshalled RPC argument. On the wire every argument is
/// `[u8 tag][u16 length][length bytes]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RpcValue {
    U8(u8),
    U32(u32),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Bool(bool),
    Str(String),
    Vec3(Vec3),
    Bytes(Vec<u8>),
}

impl RpcValue {
    pub fn kind(&self) -> RpcType {
        match self {
            RpcValue::U8(_) => RpcType::U8,
            RpcValue::U32(_) => RpcType::U32,
            RpcValue::I32(_) => RpcType::I32,
            RpcValue::I64(_) => RpcType::I64,
            RpcValue::F32(_) => RpcType::F32,
            RpcValue::F64(_) => RpcType::F64,
            RpcValue::Bool(_) => RpcType::Bool,
            RpcValue::Str(_) => RpcType::Str,
            RpcValue::Vec3(_) => RpcType::Vec3,
            RpcValue::Bytes(_) => RpcType::Bytes,
        }
    }

    fn encoded_len(&self) -> usize {
        match self {
            RpcValue::Str(value) => value.len(),
            RpcValue::Bytes(value) => value.len(),
            other => other.kind().fixed_size().unwrap_or(0),
        }
    }

    pub fn as_u8(&self) -> Option<u8> {
        match self {
            RpcValue::U8(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            RpcValue::U32(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            RpcValue::I32(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            RpcValue::F32(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            RpcValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            RpcValue::Str(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_vec3(&self) -> Option<Vec3> {
        match self {
            RpcValue::Vec3(value) => Some(*value),
            _ => None,
        }
    }

    fn write_to(&self, message: &mut Message) -> Result<(), MessageError> {
        let len = self.encoded_len();
        if len > u16::MAX as usize {
            return Err(MessageError::Overflow {
                requested: len,
                available: message.available(),
            });
        }

        message.write(&self.kind().tag())?;
        message.write(&(len as u16))?;
        match self {
            RpcValue::U8(value) => message.write(value),
            RpcValue::U32(value) => message.write(value),
            RpcValue::I32(value) => message.write(value),
            RpcValue::I64(value) => message.write(value),
            RpcValue::F32(value) => message.write(value),
            RpcValue::F64(value) => message.write(value),
            RpcValue::Bool(value) => message.write(value),
            RpcValue::Str(value) => message.write_bytes(value.as_bytes()),
            RpcValue::Vec3(value) => message.write(value),
            RpcValue::Bytes(value) => message.write_bytes(value),
        }
    }
}

impl fmt::Display for RpcValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcValue::U8(value) => write!(f, "{}", value),
            RpcValue::U32(value) => write!(f, "{}", value),
            RpcValue::I32(value) => write!(f, "{}", value),
            RpcValue::I64(value) => write!(f, "{}", value),
            RpcValue::F32(value) => write!(f, "{}", value),
            RpcValue::F64(value) => write!(f, "{}", value),
            RpcValue::Bool(value) => write!(f, "{}", value),
            RpcValue::Str(value) => write!(f, "{:?}", value),
            RpcValue::Vec3(value) => write!(f, "{}", value),
            RpcValue::Bytes(value) => write!(f, "<{} bytes>", value.len()),
        }
    }
}

fn mismatch(id: &str, reason: String) -> NetError {
    NetError::RpcArguments {
        id: id.to_string(),
        reason,
    }
}

/// Checks `args` against `signature` before anything is sent.
pub(crate) fn check_arguments(
    id: &str,
    signature: &[RpcType],
    args: &[RpcValue],
) -> Result<(), NetError> {
    if args.len() != signature.len() {
        return Err(mismatch(
            id,
            format!("expected {} arguments, got {}", signature.len(), args.len()),
        ));
    }

    for (position, (expected, value)) in signature.iter().zip(args).enumerate() {
        if value.kind() != *expected {
            return Err(mismatch(
                id,
                format!(
                    "argument {} is {:?}, expected {:?}",
                    position,
                    value.kind(),
                    expected
                ),
            ));
        }
    }
    Ok(())
}

/// Writes the argument count followed by each argument.
pub(crate) fn write_arguments(
    message: &mut Message,
    args: &[RpcValue],
) -> Result<(), MessageError> {
    message.write(&(args.len() as u8))?;
    for arg in args {
        arg.write_to(message)?;
    }
    Ok(())
}

/// Reads the arguments written by [`write_arguments`], validating each
/// against `signature`.
pub(crate) fn read_arguments(
    id: &str,
    signature: &[RpcType],
    message: &mut Message,
) -> Result<Vec<RpcValue>, NetError> {
    let count: u8 = message.read()?;
    if count as usize != signature.len() {
        return Err(mismatch(
            id,
            format!("expected {} arguments, got {}", signature.len(), count),
        ));
    }

    let mut args = Vec::with_capacity(signature.len());
    for (position, expected) in signature.iter().enumerate() {
        let tag: u8 = message.read()?;
        let len: u16 = message.read()?;
        let len = len as usize;

        let Some(kind) = RpcType::from_tag(tag) else {
            return Err(mismatch(id, format!("argument {} has unknown tag {}", position, tag)));
        };
        if kind != *expected {
            return Err(mismatch(
                id,
                format!("argument {} is {:?}, expected {:?}", position, kind, expected),
            ));
        }
        if kind.fixed_size().is_some_and(|size| size != len) {
            return Err(mismatch(
                id,
                format!("argument {} has length {} for {:?}", position, len, kind),
            ));
        }

        let value = match kind {
            RpcType::U8 => RpcValue::U8(message.read()?),
            RpcType::U32 => RpcValue::U32(message.read()?),
            RpcType::I32 => RpcValue::I32(message.read()?),
            RpcType::I64 => RpcValue::I64(message.read()?),
            RpcType::F32 => RpcValue::F32(message.read()?),
            RpcType::F64 => RpcValue::F64(message.read()?),
            RpcType::Bool => RpcValue::Bool(message.read()?),
            RpcType::Vec3 => RpcValue::Vec3(message.read()?),
            RpcType::Str => {
                let bytes = message.read_bytes(len)?;
                RpcValue::Str(String::from_utf8_lossy(bytes).into_owned())
            }
            RpcType::Bytes => RpcValue::Bytes(message.read_bytes(len)?.to_vec()),
        };
        args.push(value);
    }
    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_stable() {
        for tag in 0..=9u8 {
            assert_eq!(RpcType::from_tag(tag).unwrap().tag(), tag);
        }
        assert_eq!(RpcType::from_tag(10), None);
    }

    #[test]
    fn arguments_survive_the_wire() {
        let signature = [RpcType::Str, RpcType::Vec3, RpcType::I32, RpcType::Bytes];
        let args = vec![
            RpcValue::Str(String::from("boost")),
            RpcValue::Vec3(Vec3::new(1.0, -2.0, 0.5)),
            RpcValue::I32(-40),
            RpcValue::Bytes(vec![1, 2, 3]),
        ];
        check_arguments("boost", &signature, &args).unwrap();

        let mut message = Message::new(0);
        write_arguments(&mut message, &args).unwrap();
        // count + 4 headers + 5 + 12 + 4 + 3
        assert_eq!(message.len(), 1 + 4 * 3 + 5 + 12 + 4 + 3);

        let decoded = read_arguments("boost", &signature, &mut message).unwrap();
        assert_eq!(decoded, args);
        assert_eq!(decoded[0].as_str(), Some("boost"));
        assert_eq!(decoded[2].as_i32(), Some(-40));
    }

    #[test]
    fn mismatched_arguments_are_fatal() {
        let err = check_arguments("jump", &[RpcType::F32], &[RpcValue::U8(1)]).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("jump"));

        let err = check_arguments("jump", &[RpcType::F32], &[]).unwrap_err();
        assert!(matches!(err, NetError::RpcArguments { .. }));

        let mut message = Message::new(0);
        write_arguments(&mut message, &[RpcValue::U8(1)]).unwrap();
        let err = read_arguments("jump", &[RpcType::Bool], &mut message).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn bad_fixed_length_is_rejected() {
        let mut message = Message::new(0);
        message.write(&1u8).unwrap();
        message.write(&RpcType::U32.tag()).unwrap();
        message.write(&2u16).unwrap();
        message.write(&7u16).unwrap();

        let err = read_arguments("n", &[RpcType::U32], &mut message).unwrap_err();
        assert!(matches!(err, NetError::RpcArguments { .. }));
    }
}
