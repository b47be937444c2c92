//! Chat messages and room log snapshots.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A chat message. Never mutated after it is appended to a room's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Sender's nick at the time of posting.
    pub from: String,
    /// Message text.
    pub content: String,
    /// Creation time.
    pub time: DateTime<Utc>,
}

impl Message {
    /// Create a message stamped with the current time.
    pub fn new(from: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            content: content.into(),
            time: Utc::now(),
        }
    }

    /// Format the message for display.
    pub fn format(&self) -> String {
        format!(
            "[{}] {}: {}",
            self.time.format("%b %d %H:%M:%SZ"),
            self.from,
            self.content
        )
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format())
    }
}

/// A batch of messages from one room, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomMsgs {
    pub room: String,
    pub msgs: Vec<Message>,
}

impl RoomMsgs {
    pub fn new(room: impl Into<String>, msgs: Vec<Message>) -> Self {
        Self {
            room: room.into(),
            msgs,
        }
    }

    pub fn single(room: impl Into<String>, msg: Message) -> Self {
        Self::new(room, vec![msg])
    }

    pub fn is_empty(&self) -> bool {
        self.msgs.is_empty()
    }
}

impl fmt::Display for RoomMsgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "#{}:", self.room)?;
        for msg in &self.msgs {
            writeln!(f, "{msg}")?;
        }
        Ok(())
    }
}
