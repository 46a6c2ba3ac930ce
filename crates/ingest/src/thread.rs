use std::collections::{HashMap, hash_map::Entry};

use core_model::StoredMessage;

/// The message set of one channel, keyed by timestamp and built in discovery
/// order. A reply seen before its parent creates a placeholder that the real
/// parent later fills in, so the final set does not depend on file order.
#[derive(Debug, Default)]
pub struct ChannelThreads {
    messages: HashMap<String, StoredMessage>,
}

impl ChannelThreads {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn absorb(&mut self, message: StoredMessage) {
        // Broadcasts are top-level but still belong to their parent's thread.
        if let Some(parent) = message.parent_timestamp.as_deref() {
            match self.messages.entry(parent.to_string()) {
                Entry::Occupied(mut slot) => slot.get_mut().add_reply(&message.timestamp),
                Entry::Vacant(slot) => {
                    slot.insert(StoredMessage::placeholder(parent, &message.timestamp));
                }
            }
        }
        match self.messages.entry(message.timestamp.clone()) {
            Entry::Occupied(mut slot) => slot.get_mut().merge_content(message),
            Entry::Vacant(slot) => {
                slot.insert(message);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, timestamp: &str) -> Option<&StoredMessage> {
        self.messages.get(timestamp)
    }

    pub fn into_messages(self) -> impl Iterator<Item = StoredMessage> {
        self.messages.into_values()
    }
}
