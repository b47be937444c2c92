//! lounge - a multi-room chat service
//!
//! Chatters connect over TCP, gather in named rooms, exchange messages with
//! a short per-room history, and share files per room with checksummed
//! chunked transfers.

pub mod chat;
pub mod client;
pub mod config;
pub mod error;
pub mod file;
pub mod logging;
pub mod peer;
pub mod server;
pub mod service;

pub use chat::{Message, Room, RoomInfo, RoomMsgs, RoomRegistry};
pub use client::{ChatClient, ClientEvent, RoomEntry, TransferOutcome};
pub use config::Config;
pub use error::{LoungeError, Result};
pub use file::{FileEntry, RoomStorage, TransferError, UploadPolicy};
pub use peer::{Call, Event, Reply, SessionId};
pub use server::{ChatServer, Chatter};
pub use service::ChatService;
