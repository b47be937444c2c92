//! Server-side state of one connected chatter.
//!
//! A [`Chatter`] is driven by a single task: it reads [`Inbound`] items from
//! its connection, dispatches calls, and answers through its [`Outbox`].
//! Usage faults are answered with [`Reply::Failed`]; anything else ends the
//! session.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::chat::{swap_membership, Room};
use crate::file::{
    size_in_kib, validate_file_name, validate_room_id, FileReceiver, FileSender, TransferError,
};
use crate::peer::{Call, CallId, Event, Inbound, Outbound, Outbox, PeerInfo, Reply, SessionId};
use crate::service::ChatService;
use crate::{LoungeError, Result};

/// Lifecycle of a chatter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatterState {
    /// Entering the default room.
    Joining,
    /// Serving calls.
    Active,
    /// Left its room; no further notifications.
    Disconnected,
}

/// Trim a requested nick, falling back to `default` when nothing is left.
pub fn moderate_nick(requested: &str, default: &str) -> String {
    let nick = requested.trim();
    if nick.is_empty() {
        default.to_string()
    } else {
        nick.to_string()
    }
}

/// A connected chatter.
pub struct Chatter {
    id: SessionId,
    service: Arc<ChatService>,
    peer: PeerInfo,
    outbox: Outbox,
    default_nick: String,
    nick: String,
    room: Arc<Room>,
    state: ChatterState,
}

impl Chatter {
    /// Put a new chatter into the default room, tell the room, and send the
    /// welcome notice.
    pub async fn connect(service: Arc<ChatService>, peer: PeerInfo, outbox: Outbox) -> Result<Self> {
        let id = SessionId::new();
        let default_nick = format!("Stranger@{}", peer.remote);
        let room = service.registry.prepare_room("").await;

        let mut chatter = Self {
            id,
            service,
            peer,
            outbox,
            nick: default_nick.clone(),
            default_nick,
            room,
            state: ChatterState::Joining,
        };

        chatter.room.join(id, chatter.outbox.clone()).await;
        info!(session = %id, remote = %peer.remote, room = %chatter.room.id(), "Chatter connected");

        chatter
            .room
            .broadcast(
                Event::ChatterJoined {
                    nick: chatter.nick.clone(),
                    room: chatter.room.id().to_string(),
                },
                Some(id),
            )
            .await;

        if let Err(e) = chatter.welcome().await {
            chatter.disconnect(Some(&e.to_string())).await;
            return Err(e);
        }
        chatter.state = ChatterState::Active;
        Ok(chatter)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn nick(&self) -> &str {
        &self.nick
    }

    pub fn room_id(&self) -> &str {
        self.room.id()
    }

    pub fn state(&self) -> ChatterState {
        self.state
    }

    async fn welcome(&self) -> Result<()> {
        let rooms = self.service.registry.list_rooms().await;

        let mut notice = format!(
            "\n@@ Welcome {}, this is chat service at {} !\n -\n@@ There're {} room(s) open, and you are in #{} now.\n",
            self.nick,
            self.peer.local,
            rooms.len(),
            self.room.id()
        );
        for info in &rooms {
            notice.push_str(&format!(
                "  -*-\t{} chatter(s) in room #{}\n",
                info.occupancy, info.id
            ));
        }

        self.send(Outbound::event(Event::Welcome {
            nick: self.nick.clone(),
            room: self.room.id().to_string(),
            rooms,
            notice,
        }))
        .await
    }

    /// Serve calls until the link closes, then leave the room.
    pub async fn run(mut self, mut inbox: mpsc::Receiver<Inbound>) -> Result<()> {
        let outcome = self.serve(&mut inbox).await;
        let reason = match &outcome {
            Ok(reason) => reason.clone(),
            Err(e) => Some(e.to_string()),
        };
        self.disconnect(reason.as_deref()).await;
        outcome.map(|_| ())
    }

    async fn serve(&mut self, inbox: &mut mpsc::Receiver<Inbound>) -> Result<Option<String>> {
        while let Some(inbound) = inbox.recv().await {
            match inbound {
                Inbound::Call { id, call, payload } => {
                    debug!(session = %self.id, id, call = call.name(), "Call");
                    if let Err(e) = self.dispatch(id, call, payload, inbox).await {
                        if !e.is_rejection() {
                            return Err(e);
                        }
                        debug!(session = %self.id, id, "Rejected: {}", e);
                        self.reply(id, Reply::Failed { reason: e.to_string() })
                            .await?;
                    }
                }
                Inbound::Chunk { id, data } => {
                    debug!(session = %self.id, id, len = data.len(), "Discarding stray chunk");
                }
                Inbound::Malformed { id, reason } => {
                    debug!(session = %self.id, id, "Malformed frame: {}", reason);
                    self.reply(id, Reply::Failed { reason }).await?;
                }
                Inbound::Closed(reason) => return Ok(reason),
            }
        }
        Ok(None)
    }

    async fn dispatch(
        &mut self,
        id: CallId,
        call: Call,
        payload: Vec<u8>,
        inbox: &mut mpsc::Receiver<Inbound>,
    ) -> Result<()> {
        match call {
            Call::SetNick { nick } => self.set_nick(id, &nick).await,
            Call::GotoRoom { room } => self.goto_room(id, &room).await,
            Call::Say { msg_id } => self.say(id, msg_id, payload).await,
            Call::UploadRequest {
                room,
                filename,
                size,
            } => self.upload_request(id, &room, &filename, size).await,
            Call::UploadFile {
                room,
                filename,
                size,
            } => self.upload_file(id, &room, &filename, size, inbox).await,
            Call::ListFiles { room } => self.list_files(id, &room).await,
            Call::DownloadFile { room, filename } => {
                self.download_file(id, &room, &filename).await
            }
        }
    }

    async fn set_nick(&mut self, id: CallId, requested: &str) -> Result<()> {
        self.nick = moderate_nick(requested, &self.default_nick);
        debug!(session = %self.id, nick = %self.nick, "Nick changed");
        self.reply(
            id,
            Reply::NickAccepted {
                nick: self.nick.clone(),
            },
        )
        .await
    }

    async fn goto_room(&mut self, id: CallId, target: &str) -> Result<()> {
        let target = self.service.registry.normalize(target).to_string();
        validate_room_id(&target)?;

        let new_room = self.service.registry.prepare_room(&target).await;
        let old_room = std::mem::replace(&mut self.room, Arc::clone(&new_room));
        let occupancy = swap_membership(&old_room, &new_room, self.id, self.outbox.clone()).await;

        if !Arc::ptr_eq(&old_room, &new_room) {
            info!(session = %self.id, from = %old_room.id(), to = %new_room.id(), "Changed room");
            old_room
                .broadcast(
                    Event::ChatterLeft {
                        nick: self.nick.clone(),
                        room: old_room.id().to_string(),
                    },
                    Some(self.id),
                )
                .await;
            new_room
                .broadcast(
                    Event::ChatterJoined {
                        nick: self.nick.clone(),
                        room: new_room.id().to_string(),
                    },
                    Some(self.id),
                )
                .await;
        }

        let log = new_room.recent_log().await;
        self.reply(
            id,
            Reply::EnteredRoom {
                room: new_room.id().to_string(),
                notice: format!(
                    "@@ You are in #{} now, {} chatter(s).",
                    new_room.id(),
                    occupancy
                ),
                log: (*log).clone(),
            },
        )
        .await
    }

    async fn say(&mut self, id: CallId, msg_id: usize, payload: Vec<u8>) -> Result<()> {
        let content = String::from_utf8(payload)
            .map_err(|_| LoungeError::Protocol("message is not valid UTF-8".to_string()))?;

        let (_, report) = self
            .room
            .post_and_broadcast(self.id, &self.nick, content)
            .await;
        debug!(session = %self.id, room = %self.room.id(), ?report, "Said");

        self.reply(id, Reply::Said { msg_id }).await
    }

    /// Reason an upload would be refused, if any.
    fn upload_refusal(&self, room: &str, filename: &str, size: u64) -> Result<Option<String>> {
        if let Err(e) = validate_room_id(room).and_then(|_| validate_file_name(filename)) {
            return Ok(Some(e.to_string()));
        }
        let existing = self
            .service
            .storage
            .stat(room, filename)?
            .map(|stat| stat.size);
        Ok(self.service.policy.check(size, existing).err())
    }

    async fn upload_request(
        &mut self,
        id: CallId,
        room: &str,
        filename: &str,
        size: u64,
    ) -> Result<()> {
        let room = self.service.registry.normalize(room).to_string();
        let refusal = self.upload_refusal(&room, filename, size)?;
        if let Some(reason) = &refusal {
            info!(session = %self.id, %room, filename, size, "Upload refused: {}", reason);
        }

        self.reply(
            id,
            Reply::UploadVerdict {
                refusal,
                chunk_size: self.service.chunk_size,
            },
        )
        .await
    }

    async fn upload_file(
        &mut self,
        id: CallId,
        room: &str,
        filename: &str,
        size: u64,
        inbox: &mut mpsc::Receiver<Inbound>,
    ) -> Result<()> {
        let room = self.service.registry.normalize(room).to_string();
        if let Some(reason) = self.upload_refusal(&room, filename, size)? {
            return Err(LoungeError::Validation(reason));
        }

        let storage = &self.service.storage;
        let path = storage.ensure_room_dir(&room)?.join(filename);
        storage.remove(&room, filename)?;

        let mut receiver = FileReceiver::create(&path, size, self.service.chunk_size).await?;
        while !receiver.is_complete() {
            match inbox.recv().await {
                Some(Inbound::Chunk { id: chunk_id, data }) if chunk_id == id => {
                    receiver.write_chunk(&data).await?;
                }
                Some(Inbound::Closed(_)) | None => {
                    return Err(TransferError::Disconnected {
                        received: receiver.plan().done(),
                        expected: size,
                    }
                    .into());
                }
                Some(other) => {
                    return Err(TransferError::UnexpectedFrame(describe(&other)).into());
                }
            }
        }
        let crc = receiver.finish().await?;
        info!(session = %self.id, %room, filename, size, crc = %format!("{crc:x}"), "Upload complete");

        self.reply(id, Reply::Checksum { crc }).await?;

        let announcement = format!(
            "@*@ I just uploaded a file {crc:x} {} KB [{filename}]",
            size_in_kib(size)
        );
        // Announced where the uploader chats, whichever room got the file.
        self.room
            .post_and_broadcast(self.id, &self.nick, announcement)
            .await;
        Ok(())
    }

    async fn list_files(&mut self, id: CallId, room: &str) -> Result<()> {
        let room = self.service.registry.normalize(room).to_string();
        let files = self.service.storage.list(&room)?;
        self.reply(id, Reply::FileList { files }).await
    }

    async fn download_file(&mut self, id: CallId, room: &str, filename: &str) -> Result<()> {
        let room = self.service.registry.normalize(room).to_string();
        let chunk_size = self.service.chunk_size;

        let stat = match self.service.storage.stat(&room, filename) {
            Ok(Some(stat)) => stat,
            Ok(None) => return self.refuse_download(id, "no such file".to_string()).await,
            Err(e) if e.is_rejection() => return self.refuse_download(id, e.to_string()).await,
            Err(e) => return Err(e),
        };

        let mut sender = match FileSender::open(&stat.path, chunk_size).await {
            Ok(sender) => sender,
            Err(TransferError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return self.refuse_download(id, "no such file".to_string()).await;
            }
            Err(e) => return Err(e.into()),
        };

        self.reply(
            id,
            Reply::DownloadOffer {
                size: sender.size() as i64,
                note: stat.describe(),
                chunk_size,
            },
        )
        .await?;

        loop {
            match sender.next_chunk().await {
                Ok(Some(chunk)) => self.send(Outbound::chunk(id, chunk)).await?,
                Ok(None) => break,
                Err(e @ TransferError::FileShrunk { .. }) => {
                    warn!(session = %self.id, %room, filename, "Download failed: {}", e);
                    return self
                        .reply(id, Reply::Failed { reason: e.to_string() })
                        .await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        debug!(session = %self.id, %room, filename, size = sender.size(), "Download complete");
        self.reply(
            id,
            Reply::Checksum {
                crc: sender.checksum(),
            },
        )
        .await
    }

    async fn refuse_download(&self, id: CallId, note: String) -> Result<()> {
        self.reply(
            id,
            Reply::DownloadOffer {
                size: -1,
                note,
                chunk_size: self.service.chunk_size,
            },
        )
        .await
    }

    /// Leave the current room. Further calls are no-ops.
    pub async fn disconnect(&mut self, reason: Option<&str>) {
        if self.state == ChatterState::Disconnected {
            return;
        }
        self.room.leave(self.id).await;
        self.state = ChatterState::Disconnected;

        match reason {
            Some(reason) => {
                info!(session = %self.id, nick = %self.nick, "Chatter disconnected: {}", reason)
            }
            None => info!(session = %self.id, nick = %self.nick, "Chatter disconnected"),
        }
    }

    async fn reply(&self, id: CallId, reply: Reply) -> Result<()> {
        self.send(Outbound::reply(id, reply)).await
    }

    async fn send(&self, frame: Outbound) -> Result<()> {
        self.outbox
            .send(frame)
            .await
            .map_err(|e| LoungeError::Disconnected(e.to_string()))
    }
}

fn describe(inbound: &Inbound) -> String {
    match inbound {
        Inbound::Call { id, call, .. } => format!("call {} (id {id})", call.name()),
        Inbound::Chunk { id, data } => format!("chunk of {} bytes for id {id}", data.len()),
        Inbound::Malformed { id, .. } => format!("malformed frame (id {id})"),
        Inbound::Closed(_) => "close".to_string(),
    }
}
