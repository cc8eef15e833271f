use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::error::NetError;
use crate::message::Message;
use crate::protocol::{INVALID_CONNECTION_INDEX, MessageType};
use crate::session::SessionCore;

use super::value::{RpcType, RpcValue, check_arguments, read_arguments, write_arguments};

/// Function behind an RPC id: receives the caller's index and the decoded
/// arguments, returns the result reported back in RPC_RETURN.
pub type RpcFunction = Rc<dyn Fn(u8, &[RpcValue]) -> i32>;

#[derive(Clone)]
pub struct RpcEntry {
    id: String,
    signature: Vec<RpcType>,
    function: RpcFunction,
}

impl RpcEntry {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn signature(&self) -> &[RpcType] {
        &self.signature
    }
}

impl fmt::Debug for RpcEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcEntry")
            .field("id", &self.id)
            .field("signature", &self.signature)
            .finish()
    }
}

/// Named remote calls. Every call travels to the host, which either runs
/// it or forwards it unchanged to the target peer.
#[derive(Debug)]
pub struct RpcSystem {
    entries: Rc<RefCell<HashMap<String, RpcEntry>>>,
}

impl RpcSystem {
    /// Installs the call and return handlers on `session`.
    pub fn startup(session: &mut SessionCore) -> Self {
        let entries = Rc::new(RefCell::new(HashMap::new()));

        let table = Rc::clone(&entries);
        session.register_message_function(MessageType::RPC_CALL, move |core, message| {
            on_call(&table, core, message)
        });
        session.register_message_function(MessageType::RPC_RETURN, on_return);

        Self { entries }
    }

    pub fn shutdown(self, session: &mut SessionCore) {
        session.unregister_message_function(MessageType::RPC_CALL);
        session.unregister_message_function(MessageType::RPC_RETURN);
        self.entries.borrow_mut().clear();
    }

    /// Registers `function` under `id`, replacing any previous entry.
    pub fn register<F>(&self, id: &str, signature: &[RpcType], function: F)
    where
        F: Fn(u8, &[RpcValue]) -> i32 + 'static,
    {
        let entry = RpcEntry {
            id: id.to_string(),
            signature: signature.to_vec(),
            function: Rc::new(function),
        };
        if self
            .entries
            .borrow_mut()
            .insert(id.to_string(), entry)
            .is_some()
        {
            log::debug!("RPC '{}' re-registered", id);
        }
    }

    pub fn unregister(&self, id: &str) -> bool {
        self.entries.borrow_mut().remove(id).is_some()
    }

    pub fn is_registered(&self, id: &str) -> bool {
        self.entries.borrow().contains_key(id)
    }

    pub fn entry(&self, id: &str) -> Option<RpcEntry> {
        self.entries.borrow().get(id).cloned()
    }

    /// Sends `{source, target, id, args}` to the host. Returns `Ok(false)`
    /// without sending if `id` is not registered locally.
    pub fn call_rpc(
        &self,
        session: &mut SessionCore,
        source: u8,
        target: u8,
        id: &str,
        args: &[RpcValue],
    ) -> Result<bool, NetError> {
        let Some(entry) = self.entry(id) else {
            log::debug!("Ignoring call to unregistered RPC '{}'", id);
            return Ok(false);
        };
        check_arguments(id, &entry.signature, args)?;

        let mut message = session.new_message(MessageType::RPC_CALL);
        message.write(&source)?;
        message.write(&target)?;
        message.write_string(Some(id))?;
        write_arguments(&mut message, args)?;

        session.send_message_to_host(message)?;
        log::debug!("RPC '{}' {} -> {}", id, source, target);
        Ok(true)
    }
}

fn on_call(
    entries: &Rc<RefCell<HashMap<String, RpcEntry>>>,
    core: &mut SessionCore,
    message: &mut Message,
) -> Result<(), NetError> {
    let source: u8 = message.read()?;
    let target: u8 = message.read()?;

    if core.am_i_host() && target != core.my_index() {
        message.rewind();
        if let Err(e) = core.send_message_to_other(target, message.clone()) {
            log::warn!("Cannot forward RPC from {} to {}: {}", source, target, e);
        }
        return Ok(());
    }

    let id = message.read_string()?;
    let Some(entry) = entries.borrow().get(&id).cloned() else {
        log::debug!("Call to unregistered RPC '{}' from {}", id, source);
        return Ok(());
    };

    let args = read_arguments(&id, &entry.signature, message)?;
    let result = (entry.function)(source, &args);
    log::debug!("RPC '{}' from {} returned {}", id, source, result);

    let Some(arrived_on) = message.sender() else {
        return Ok(());
    };
    let mut reply = core.new_message(MessageType::RPC_RETURN);
    let me = core.my_index();
    reply.write(&me)?;
    reply.write(&result)?;
    if let Err(e) = core.send_to(arrived_on, reply) {
        log::debug!("Cannot return RPC '{}' result: {}", id, e);
    }
    Ok(())
}

fn on_return(_core: &mut SessionCore, message: &mut Message) -> Result<(), NetError> {
    let sender: u8 = message.read()?;
    let result: i32 = message.read()?;
    if sender == INVALID_CONNECTION_INDEX {
        log::info!("RPC returned {} from unindexed peer", result);
    } else {
        log::info!("RPC returned {} from peer {}", result, sender);
    }
    Ok(())
}
