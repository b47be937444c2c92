//! Locally sent messages awaiting server acknowledgement.

/// Slot table mapping a message id to the text sent under it.
///
/// Acknowledged slots are reused, first empty slot first, so the table only
/// grows with the number of messages in flight at once.
#[derive(Debug, Default)]
pub struct PendingMessages {
    slots: Vec<Option<String>>,
}

impl PendingMessages {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `content` and return its id.
    pub fn reserve(&mut self, content: impl Into<String>) -> usize {
        let content = Some(content.into());
        match self.slots.iter().position(Option::is_none) {
            Some(id) => {
                self.slots[id] = content;
                id
            }
            None => {
                self.slots.push(content);
                self.slots.len() - 1
            }
        }
    }

    /// Take back the text stored under `id`, freeing the slot.
    pub fn resolve(&mut self, id: usize) -> Option<String> {
        self.slots.get_mut(id).and_then(Option::take)
    }

    /// Number of unacknowledged messages.
    pub fn in_flight(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}
