mod system;
mod value;

pub use system::{RpcEntry, RpcFunction, RpcSystem};
pub use value::{RpcType, RpcValue};
