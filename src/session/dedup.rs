//! Bounded memory of already-processed events.

use std::collections::{HashSet, VecDeque};

use crate::dispatch::event::InboundEvent;

/// Default number of identifiers remembered.
pub const DEFAULT_DEDUP_CAPACITY: usize = 1024;

/// Identifier used to recognise a redelivered event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DedupKey {
    /// Platform event id (Telegram `update_id`).
    Event(String),
    /// A message within a conversation.
    Message { chat_id: String, message_id: i64 },
}

impl DedupKey {
    /// Key for an event: the conversation/message pair when the message id
    /// is known, otherwise the event id.
    pub fn for_event(event: &InboundEvent) -> Self {
        match event.message_id {
            Some(message_id) => Self::Message {
                chat_id: event.chat_id.clone(),
                message_id,
            },
            None => Self::Event(event.event_id.clone()),
        }
    }
}

/// FIFO-evicting set of [`DedupKey`]s.
///
/// Holds at most `capacity` keys; inserting past that drops the oldest.
#[derive(Debug)]
pub struct DedupWindow {
    capacity: usize,
    keys: HashSet<DedupKey>,
    order: VecDeque<DedupKey>,
}

impl DedupWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            keys: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    /// Test-and-set: returns `true` if `key` was already present, otherwise
    /// records it and returns `false`.
    pub fn seen(&mut self, key: DedupKey) -> bool {
        if self.keys.contains(&key) {
            return true;
        }
        self.keys.insert(key.clone());
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.keys.remove(&oldest);
            }
        }
        false
    }

    pub fn contains(&self, key: &DedupKey) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for DedupWindow {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_CAPACITY)
    }
}
