//! Chat module for lounge.
//!
//! This module provides the shared chat state:
//! - Messages and per-room bounded history
//! - Rooms with member fan-out
//! - The room registry
//! - Client-side tracking of unacknowledged messages

mod history;
mod message;
mod pending;
mod registry;
mod room;

pub use history::MessageLog;
pub use message::{Message, RoomMsgs};
pub use pending::PendingMessages;
pub use registry::{RoomInfo, RoomRegistry};
pub use room::{swap_membership, BroadcastReport, Room};
