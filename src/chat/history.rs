//! Bounded per-room message history.

use std::collections::VecDeque;
use std::sync::Arc;

use super::message::{Message, RoomMsgs};

/// Insertion-ordered message history capped at `capacity` entries.
///
/// The oldest message is evicted once the cap is exceeded. A snapshot of the
/// current contents is cached until the next append.
#[derive(Debug)]
pub struct MessageLog {
    room: String,
    capacity: usize,
    msgs: VecDeque<Message>,
    cached: Option<Arc<RoomMsgs>>,
}

impl MessageLog {
    /// Create an empty log. A zero capacity is treated as one.
    pub fn new(room: impl Into<String>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            room: room.into(),
            capacity,
            msgs: VecDeque::with_capacity(capacity),
            cached: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.msgs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.msgs.is_empty()
    }

    /// Append a message, evicting the oldest ones past the cap.
    pub fn push(&mut self, msg: Message) {
        self.msgs.push_back(msg);
        while self.msgs.len() > self.capacity {
            self.msgs.pop_front();
        }
        self.cached = None;
    }

    /// Snapshot of the current history, rebuilt only after a change.
    pub fn recent(&mut self) -> Arc<RoomMsgs> {
        if let Some(cached) = &self.cached {
            return Arc::clone(cached);
        }
        let snapshot = Arc::new(RoomMsgs::new(
            self.room.clone(),
            self.msgs.iter().cloned().collect(),
        ));
        self.cached = Some(Arc::clone(&snapshot));
        snapshot
    }
}
