use std::collections::VecDeque;

use crate::message::Message;

/// In-process queue standing in for the local peer, so broadcasts reach
/// "myself" through the same path as remote peers.
#[derive(Debug, Default)]
pub struct LoopBackLink {
    queue: VecDeque<Message>,
}

impl LoopBackLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) {
        self.queue.push_back(message);
    }

    pub fn pop(&mut self) -> Option<Message> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
