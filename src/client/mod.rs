//! Client side of the peer link.
//!
//! [`ChatClient`] owns a connection to a chat service. A background task
//! reads frames, hands replies and chunks to the call that is waiting for
//! them, and queues events for [`ChatClient::next_event`]. Sent messages
//! are tracked in a [`PendingMessages`] table until the service confirms
//! them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::chat::{PendingMessages, RoomMsgs};
use crate::file::{FileEntry, FileReceiver, FileSender, RoomStorage};
use crate::peer::{wire, Call, CallId, Event, Reply, Request, Response};
use crate::{LoungeError, Result};

/// Something that happened on the connection outside of a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// An event pushed by the service.
    Server(Event),
    /// The service displayed a message this client sent.
    Said { msg_id: usize, content: String },
    /// The connection ended, with an error description if it was not clean.
    Closed(Option<String>),
}

/// Result of a completed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    pub filename: String,
    pub size: u64,
    pub local_crc: u32,
    pub remote_crc: u32,
}

impl TransferOutcome {
    /// Whether both ends computed the same checksum.
    pub fn verified(&self) -> bool {
        self.local_crc == self.remote_crc
    }
}

/// What the service sent back after a room change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomEntry {
    pub room: String,
    pub notice: String,
    pub log: RoomMsgs,
}

#[derive(Debug)]
enum Incoming {
    Reply(Reply),
    Chunk(Vec<u8>),
}

#[derive(Debug, Default)]
struct Waiters {
    by_id: HashMap<CallId, mpsc::UnboundedSender<Incoming>>,
    closed: bool,
}

type SharedWriter = Arc<Mutex<BufWriter<OwnedWriteHalf>>>;

/// A connection to a chat service.
pub struct ChatClient {
    writer: SharedWriter,
    next_id: AtomicU64,
    waiters: Arc<Mutex<Waiters>>,
    pending: Arc<Mutex<PendingMessages>>,
    events: mpsc::UnboundedReceiver<ClientEvent>,
    local: RoomStorage,
    nick: String,
    room: String,
    welcome: String,
    reader: JoinHandle<()>,
}

impl ChatClient {
    /// Connect and wait for the welcome notice.
    ///
    /// Downloaded files are kept under `local_root/<room>/`.
    pub async fn connect(addr: impl ToSocketAddrs, local_root: impl Into<PathBuf>) -> Result<Self> {
        let local = RoomStorage::new(local_root)?;
        let stream = TcpStream::connect(addr).await?;
        let (read_half, write_half) = stream.into_split();

        let waiters = Arc::new(Mutex::new(Waiters::default()));
        let pending = Arc::new(Mutex::new(PendingMessages::new()));
        let (events_tx, mut events) = mpsc::unbounded_channel();

        let reader = tokio::spawn(read_loop(
            BufReader::new(read_half),
            Arc::clone(&waiters),
            Arc::clone(&pending),
            events_tx,
        ));

        let (nick, room, welcome) = loop {
            match events.recv().await {
                Some(ClientEvent::Server(Event::Welcome {
                    nick, room, notice, ..
                })) => break (nick, room, notice),
                Some(ClientEvent::Closed(reason)) => {
                    return Err(LoungeError::Disconnected(
                        reason.unwrap_or_else(|| "closed before welcome".to_string()),
                    ));
                }
                None => {
                    return Err(LoungeError::Disconnected(
                        "closed before welcome".to_string(),
                    ));
                }
                Some(other) => debug!("Event before welcome: {:?}", other),
            }
        };
        info!(%nick, %room, "Connected to chat service");

        Ok(Self {
            writer: Arc::new(Mutex::new(BufWriter::new(write_half))),
            next_id: AtomicU64::new(1),
            waiters,
            pending,
            events,
            local,
            nick,
            room,
            welcome,
            reader,
        })
    }

    /// Nick as last confirmed by the service.
    pub fn nick(&self) -> &str {
        &self.nick
    }

    /// Room as last confirmed by the service.
    pub fn room(&self) -> &str {
        &self.room
    }

    /// Welcome notice received on connect.
    pub fn welcome_notice(&self) -> &str {
        &self.welcome
    }

    /// Wait for the next event. Returns `None` after [`ClientEvent::Closed`].
    pub async fn next_event(&mut self) -> Option<ClientEvent> {
        self.events.recv().await
    }

    /// Ask for a new nick; returns the nick the service accepted.
    pub async fn set_nick(&mut self, nick: &str) -> Result<String> {
        let call = Call::SetNick {
            nick: nick.to_string(),
        };
        match self.call(call, &[]).await? {
            Reply::NickAccepted { nick } => {
                self.nick = nick.clone();
                Ok(nick)
            }
            other => Err(unexpected(other)),
        }
    }

    /// Move to another room. The empty id means the service's default room.
    pub async fn goto_room(&mut self, room: &str) -> Result<RoomEntry> {
        let call = Call::GotoRoom {
            room: room.to_string(),
        };
        match self.call(call, &[]).await? {
            Reply::EnteredRoom { room, notice, log } => {
                self.room = room.clone();
                Ok(RoomEntry { room, notice, log })
            }
            other => Err(unexpected(other)),
        }
    }

    /// Send a message to the current room; returns its message id.
    ///
    /// The service's confirmation arrives later as [`ClientEvent::Said`].
    pub async fn say(&self, content: &str) -> Result<usize> {
        let msg_id = self.pending.lock().await.reserve(content);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut writer = self.writer.lock().await;
        wire::write_frame(
            &mut *writer,
            id,
            &Request::Call(Call::Say { msg_id }),
            content.as_bytes(),
        )
        .await?;
        writer.flush().await?;
        Ok(msg_id)
    }

    /// Number of sent messages not yet confirmed.
    pub async fn unconfirmed(&self) -> usize {
        self.pending.lock().await.in_flight()
    }

    /// List files stored on the service for `room` (empty = current room).
    pub async fn list_server_files(&self, room: &str) -> Result<Vec<FileEntry>> {
        let call = Call::ListFiles {
            room: self.room_or_current(room).to_string(),
        };
        match self.call(call, &[]).await? {
            Reply::FileList { files } => Ok(files),
            other => Err(unexpected(other)),
        }
    }

    /// List files downloaded locally for `room` (empty = current room).
    pub fn list_local_files(&self, room: &str) -> Result<Vec<FileEntry>> {
        self.local.list(self.room_or_current(room))
    }

    /// Upload a local file into `room` (empty = current room).
    pub async fn upload_file(&self, room: &str, path: impl AsRef<Path>) -> Result<TransferOutcome> {
        let path = path.as_ref();
        let room = self.room_or_current(room).to_string();
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                LoungeError::Validation(format!("not a file path: {}", path.display()))
            })?
            .to_string();

        let size = tokio::fs::metadata(path).await?.len();
        let request = Call::UploadRequest {
            room: room.clone(),
            filename: filename.clone(),
            size,
        };
        let chunk_size = match self.call(request, &[]).await? {
            Reply::UploadVerdict {
                refusal: None,
                chunk_size,
            } => chunk_size,
            Reply::UploadVerdict {
                refusal: Some(reason),
                ..
            } => return Err(LoungeError::Refused(reason)),
            other => return Err(unexpected(other)),
        };

        let mut sender = FileSender::open(path, chunk_size).await?;
        let (id, mut rx) = self.register().await?;
        let streamed = self
            .stream_upload(id, &room, &filename, &mut sender)
            .await;
        let reply = match streamed {
            Ok(()) => expect_reply(&mut rx).await,
            Err(e) => Err(e),
        };
        self.unregister(id).await;

        let remote_crc = match reply? {
            Reply::Checksum { crc } => crc,
            other => return Err(unexpected(other)),
        };
        let outcome = TransferOutcome {
            filename,
            size: sender.size(),
            local_crc: sender.checksum(),
            remote_crc,
        };
        report(&outcome, "Upload");
        Ok(outcome)
    }

    /// Send the upload call and every chunk while holding the writer, so no
    /// other frame can land between them.
    async fn stream_upload(
        &self,
        id: CallId,
        room: &str,
        filename: &str,
        sender: &mut FileSender,
    ) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let call = Call::UploadFile {
            room: room.to_string(),
            filename: filename.to_string(),
            size: sender.size(),
        };
        wire::write_frame(&mut *writer, id, &Request::Call(call), &[]).await?;
        while let Some(chunk) = sender.next_chunk().await? {
            wire::write_frame(&mut *writer, id, &Request::Chunk, &chunk).await?;
        }
        writer.flush().await?;
        Ok(())
    }

    /// Download `filename` from `room` (empty = current room), replacing
    /// any local copy.
    pub async fn download_file(&self, room: &str, filename: &str) -> Result<TransferOutcome> {
        let room = self.room_or_current(room).to_string();
        let path = self.local.file_path(&room, filename)?;

        let (id, mut rx) = self.register().await?;
        let result = self
            .receive_download(id, &room, filename, &path, &mut rx)
            .await;
        self.unregister(id).await;

        let outcome = result?;
        report(&outcome, "Download");
        Ok(outcome)
    }

    async fn receive_download(
        &self,
        id: CallId,
        room: &str,
        filename: &str,
        path: &Path,
        rx: &mut mpsc::UnboundedReceiver<Incoming>,
    ) -> Result<TransferOutcome> {
        let call = Call::DownloadFile {
            room: room.to_string(),
            filename: filename.to_string(),
        };
        self.send_call(id, call, &[]).await?;

        let (size, chunk_size) = match expect_reply(rx).await? {
            Reply::DownloadOffer { size, note, .. } if size < 0 => {
                return Err(LoungeError::Refused(note));
            }
            Reply::DownloadOffer {
                size,
                note,
                chunk_size,
            } => {
                debug!(filename, size, %note, "Download offered");
                (size as u64, chunk_size)
            }
            other => return Err(unexpected(other)),
        };

        self.local.ensure_room_dir(room)?;
        self.local.remove(room, filename)?;
        let mut receiver = FileReceiver::create(path, size, chunk_size).await?;
        while !receiver.is_complete() {
            match rx.recv().await {
                Some(Incoming::Chunk(data)) => receiver.write_chunk(&data).await?,
                Some(Incoming::Reply(Reply::Failed { reason })) => {
                    return Err(LoungeError::Refused(reason));
                }
                Some(Incoming::Reply(other)) => return Err(unexpected(other)),
                None => {
                    return Err(LoungeError::Disconnected(
                        "connection closed during download".to_string(),
                    ));
                }
            }
        }
        let local_crc = receiver.finish().await?;

        match expect_reply(rx).await? {
            Reply::Checksum { crc } => Ok(TransferOutcome {
                filename: filename.to_string(),
                size,
                local_crc,
                remote_crc: crc,
            }),
            other => Err(unexpected(other)),
        }
    }

    /// Shut down the sending side; the service then ends the session.
    pub async fn close(&self) -> Result<()> {
        self.writer.lock().await.shutdown().await?;
        Ok(())
    }

    fn room_or_current<'a>(&'a self, room: &'a str) -> &'a str {
        if room.is_empty() {
            &self.room
        } else {
            room
        }
    }

    async fn call(&self, call: Call, payload: &[u8]) -> Result<Reply> {
        let (id, mut rx) = self.register().await?;
        let result = match self.send_call(id, call, payload).await {
            Ok(()) => expect_reply(&mut rx).await,
            Err(e) => Err(e),
        };
        self.unregister(id).await;
        result
    }

    async fn register(&self) -> Result<(CallId, mpsc::UnboundedReceiver<Incoming>)> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();

        let mut waiters = self.waiters.lock().await;
        if waiters.closed {
            return Err(LoungeError::Disconnected("connection closed".to_string()));
        }
        waiters.by_id.insert(id, tx);
        Ok((id, rx))
    }

    async fn unregister(&self, id: CallId) {
        self.waiters.lock().await.by_id.remove(&id);
    }

    async fn send_call(&self, id: CallId, call: Call, payload: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock().await;
        wire::write_frame(&mut *writer, id, &Request::Call(call), payload).await?;
        writer.flush().await?;
        Ok(())
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn expect_reply(rx: &mut mpsc::UnboundedReceiver<Incoming>) -> Result<Reply> {
    match rx.recv().await {
        Some(Incoming::Reply(Reply::Failed { reason })) => Err(LoungeError::Refused(reason)),
        Some(Incoming::Reply(reply)) => Ok(reply),
        Some(Incoming::Chunk(_)) => Err(LoungeError::Protocol(
            "chunk received while waiting for a reply".to_string(),
        )),
        None => Err(LoungeError::Disconnected(
            "connection closed while waiting for a reply".to_string(),
        )),
    }
}

fn unexpected(reply: Reply) -> LoungeError {
    LoungeError::Protocol(format!("unexpected reply: {reply:?}"))
}

fn report(outcome: &TransferOutcome, what: &str) {
    if outcome.verified() {
        info!(
            filename = %outcome.filename,
            size = outcome.size,
            "{} verified, checksum {:x}",
            what,
            outcome.local_crc
        );
    } else {
        warn!(
            filename = %outcome.filename,
            "{} checksum mismatch: local {:x}, remote {:x}",
            what,
            outcome.local_crc,
            outcome.remote_crc
        );
    }
}

async fn read_loop(
    mut reader: BufReader<OwnedReadHalf>,
    waiters: Arc<Mutex<Waiters>>,
    pending: Arc<Mutex<PendingMessages>>,
    events: mpsc::UnboundedSender<ClientEvent>,
) {
    let reason = loop {
        let (envelope, payload) = match wire::read_frame::<_, Response>(&mut reader).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break None,
            Err(e) => break Some(e.to_string()),
        };

        let incoming = match envelope.body {
            Response::Event(event) => {
                let _ = events.send(ClientEvent::Server(event));
                continue;
            }
            Response::Reply(Reply::Said { msg_id }) => {
                let content = pending.lock().await.resolve(msg_id).unwrap_or_default();
                let _ = events.send(ClientEvent::Said { msg_id, content });
                continue;
            }
            Response::Reply(reply) => Incoming::Reply(reply),
            Response::Chunk => Incoming::Chunk(payload),
        };

        let table = waiters.lock().await;
        match table.by_id.get(&envelope.id) {
            Some(tx) => {
                let _ = tx.send(incoming);
            }
            None => debug!(id = envelope.id, "Frame for no pending call: {:?}", incoming),
        }
    };

    let mut table = waiters.lock().await;
    table.closed = true;
    table.by_id.clear();
    drop(table);

    let _ = events.send(ClientEvent::Closed(reason));
}
