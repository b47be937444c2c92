//! Peer link between a chat service and a remote session.
//!
//! A session talks to the service with [`Call`]s and raw chunks; the
//! service answers with [`Reply`]s correlated by call id, pushes
//! [`Event`]s, and streams chunks back for downloads. See [`wire`] for
//! the framing.

pub mod wire;

use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::chat::{RoomInfo, RoomMsgs};
use crate::file::FileEntry;

/// Correlation id of a call. Events use id 0.
pub type CallId = u64;

/// Unique id of a connected session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Operations a remote session may invoke.
///
/// `Say` carries its text as the frame payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Call {
    SetNick {
        nick: String,
    },
    GotoRoom {
        room: String,
    },
    Say {
        msg_id: usize,
    },
    /// Ask whether an upload of `size` bytes would be accepted.
    UploadRequest {
        room: String,
        filename: String,
        size: u64,
    },
    /// Start an accepted upload; chunk frames with the same id follow.
    UploadFile {
        room: String,
        filename: String,
        size: u64,
    },
    ListFiles {
        room: String,
    },
    DownloadFile {
        room: String,
        filename: String,
    },
}

impl Call {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Call::SetNick { .. } => "set_nick",
            Call::GotoRoom { .. } => "goto_room",
            Call::Say { .. } => "say",
            Call::UploadRequest { .. } => "upload_request",
            Call::UploadFile { .. } => "upload_file",
            Call::ListFiles { .. } => "list_files",
            Call::DownloadFile { .. } => "download_file",
        }
    }
}

/// Frame bodies sent by a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Call(Call),
    Chunk,
}

/// Answers to calls, sent with the id of the call they answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum Reply {
    /// The nick actually stored, possibly moderated.
    NickAccepted { nick: String },
    EnteredRoom {
        room: String,
        notice: String,
        log: RoomMsgs,
    },
    Said { msg_id: usize },
    /// `refusal` is `None` when the upload is accepted; chunks must then be
    /// `chunk_size` bytes except the last.
    UploadVerdict {
        refusal: Option<String>,
        chunk_size: usize,
    },
    Checksum { crc: u32 },
    FileList { files: Vec<FileEntry> },
    /// A negative `size` means the file is unavailable and `note` says why.
    DownloadOffer {
        size: i64,
        note: String,
        chunk_size: usize,
    },
    Failed { reason: String },
}

/// Notifications pushed to a session without a preceding call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    Welcome {
        nick: String,
        room: String,
        rooms: Vec<RoomInfo>,
        notice: String,
    },
    ChatterJoined { nick: String, room: String },
    ChatterLeft { nick: String, room: String },
    RoomMsgs { log: RoomMsgs },
    Notice { text: String },
}

/// Frame bodies sent by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Reply(Reply),
    Event(Event),
    Chunk,
}

/// A frame header. `len` raw payload bytes follow it on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<B> {
    pub id: CallId,
    pub len: usize,
    pub body: B,
}

/// What the connection reader hands to a session.
#[derive(Debug)]
pub enum Inbound {
    Call {
        id: CallId,
        call: Call,
        payload: Vec<u8>,
    },
    Chunk {
        id: CallId,
        data: Vec<u8>,
    },
    /// The frame was well delimited but its body could not be understood.
    Malformed {
        id: CallId,
        reason: String,
    },
    /// The link closed, with an error description if it did not end cleanly.
    Closed(Option<String>),
}

/// A frame queued for a session's writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub id: CallId,
    pub body: Response,
    pub payload: Vec<u8>,
}

impl Outbound {
    pub fn reply(id: CallId, reply: Reply) -> Self {
        Self {
            id,
            body: Response::Reply(reply),
            payload: Vec::new(),
        }
    }

    pub fn event(event: Event) -> Self {
        Self {
            id: 0,
            body: Response::Event(event),
            payload: Vec::new(),
        }
    }

    pub fn chunk(id: CallId, data: Vec<u8>) -> Self {
        Self {
            id,
            body: Response::Chunk,
            payload: data,
        }
    }
}

/// Why a frame could not be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The queue is full; the peer is not keeping up.
    #[error("outbound queue full")]
    Backlogged,
    /// The writer is gone; the peer disconnected.
    #[error("peer gone")]
    Gone,
}

/// Sending half of a session's bounded outbound queue.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::Sender<Outbound>,
}

impl Outbox {
    /// Create a queue holding at most `capacity` frames.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Queue a notification without waiting.
    pub fn push(&self, frame: Outbound) -> Result<(), DeliveryError> {
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Backlogged,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Gone,
        })
    }

    /// Queue a frame, waiting for room in the queue.
    pub async fn send(&self, frame: Outbound) -> Result<(), DeliveryError> {
        self.tx.send(frame).await.map_err(|_| DeliveryError::Gone)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Endpoint identity of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerInfo {
    pub remote: SocketAddr,
    pub local: SocketAddr,
}
