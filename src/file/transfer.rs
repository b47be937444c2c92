//! Chunked, checksummed file streaming.
//!
//! Both directions move a file as a sequence of chunks of a nominal size.
//! Every chunk except the last is exactly `chunk_size` bytes; the last one
//! carries the remainder (or a full chunk when the size divides evenly).
//! The receiving side counts bytes itself and stops at the declared total.

use std::path::Path;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::checksum::Crc32;
use crate::config::FilesConfig;

/// Result type for transfer operations.
pub type TransferResult<T> = std::result::Result<T, TransferError>;

/// Errors that can occur during a chunked transfer.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// I/O error during transfer.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The link closed before the transfer completed.
    #[error("peer disconnected after {received} of {expected} bytes")]
    Disconnected { received: u64, expected: u64 },

    /// Something other than the next chunk arrived.
    #[error("unexpected frame during transfer: {0}")]
    UnexpectedFrame(String),

    /// A chunk did not match the agreed plan.
    #[error("chunk size mismatch: expected {expected} bytes, got {got}")]
    ChunkSize { expected: usize, got: usize },

    /// The source file got shorter than the size promised to the receiver.
    #[error("file shrunk during transfer: sent {sent} of {promised} bytes")]
    FileShrunk { sent: u64, promised: u64 },
}

/// Size bounds applied to uploads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadPolicy {
    /// Smallest accepted size, inclusive.
    pub min_size: u64,
    /// Largest accepted size, inclusive.
    pub max_size: u64,
    /// Whether an upload may replace a larger existing file.
    pub allow_shrink: bool,
}

impl UploadPolicy {
    /// Build the policy from the `[files]` config section.
    pub fn from_config(config: &FilesConfig) -> Self {
        Self {
            min_size: config.min_upload_bytes,
            max_size: config.max_upload_bytes,
            allow_shrink: config.allow_shrinking_overwrite,
        }
    }

    /// Check a declared size against the bounds.
    ///
    /// Returns the refusal reason on failure.
    pub fn check_size(&self, size: u64) -> std::result::Result<(), String> {
        if size > self.max_size {
            return Err(format!(
                "file too large! {size} bytes exceeds the limit of {} bytes",
                self.max_size
            ));
        }
        if size < self.min_size {
            return Err(format!(
                "file too small! {size} bytes is below the minimum of {} bytes",
                self.min_size
            ));
        }
        Ok(())
    }

    /// Check a declared size, plus the overwrite rule when a file of
    /// `existing` bytes is already stored under the same name.
    pub fn check(&self, size: u64, existing: Option<u64>) -> std::result::Result<(), String> {
        self.check_size(size)?;
        match existing {
            Some(current) if !self.allow_shrink && size < current => Err(format!(
                "can only upload a file bigger than existing version on server! ({current} bytes)"
            )),
            _ => Ok(()),
        }
    }
}

/// Tracks how many bytes a transfer has moved and what the next chunk must be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    total: u64,
    chunk_size: usize,
    done: u64,
}

impl ChunkPlan {
    /// Plan a transfer of `total` bytes.
    pub fn new(total: u64, chunk_size: usize) -> Self {
        Self {
            total,
            chunk_size: chunk_size.max(1),
            done: 0,
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn done(&self) -> u64 {
        self.done
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Length of the next chunk, zero once complete.
    pub fn next_len(&self) -> usize {
        let remaining = self.total - self.done;
        remaining.min(self.chunk_size as u64) as usize
    }

    pub fn is_complete(&self) -> bool {
        self.done >= self.total
    }

    /// Account for a chunk of `len` bytes.
    pub fn accept(&mut self, len: usize) -> TransferResult<()> {
        let expected = self.next_len();
        if len != expected || len == 0 {
            return Err(TransferError::ChunkSize { expected, got: len });
        }
        self.done += len as u64;
        Ok(())
    }
}

/// Writes an incoming chunk stream to a file.
#[derive(Debug)]
pub struct FileReceiver {
    file: File,
    plan: ChunkPlan,
    crc: Crc32,
}

impl FileReceiver {
    /// Create (or truncate) the target file.
    pub async fn create(path: &Path, total: u64, chunk_size: usize) -> TransferResult<Self> {
        let file = File::create(path).await?;
        Ok(Self {
            file,
            plan: ChunkPlan::new(total, chunk_size),
            crc: Crc32::new(),
        })
    }

    pub fn plan(&self) -> &ChunkPlan {
        &self.plan
    }

    pub fn is_complete(&self) -> bool {
        self.plan.is_complete()
    }

    /// Write the next chunk and fold it into the checksum.
    pub async fn write_chunk(&mut self, data: &[u8]) -> TransferResult<()> {
        self.plan.accept(data.len())?;
        self.file.write_all(data).await?;
        self.crc.update(data);
        Ok(())
    }

    /// Flush the file and return the checksum of everything written.
    pub async fn finish(mut self) -> TransferResult<u32> {
        if !self.plan.is_complete() {
            return Err(TransferError::Disconnected {
                received: self.plan.done(),
                expected: self.plan.total(),
            });
        }
        self.file.flush().await?;
        self.file.sync_all().await?;
        Ok(self.crc.value())
    }
}

/// Reads a file as a chunk stream.
#[derive(Debug)]
pub struct FileSender {
    file: File,
    plan: ChunkPlan,
    crc: Crc32,
}

impl FileSender {
    /// Open the source file. The size promised to the receiver is the file
    /// length at open time.
    pub async fn open(path: &Path, chunk_size: usize) -> TransferResult<Self> {
        let file = File::open(path).await?;
        let size = file.metadata().await?.len();
        Ok(Self {
            file,
            plan: ChunkPlan::new(size, chunk_size),
            crc: Crc32::new(),
        })
    }

    pub fn size(&self) -> u64 {
        self.plan.total()
    }

    pub fn plan(&self) -> &ChunkPlan {
        &self.plan
    }

    /// Read the next chunk, or `None` once the promised size was sent.
    pub async fn next_chunk(&mut self) -> TransferResult<Option<Vec<u8>>> {
        let len = self.plan.next_len();
        if len == 0 {
            return Ok(None);
        }

        let mut buf = vec![0u8; len];
        match self.file.read_exact(&mut buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(TransferError::FileShrunk {
                    sent: self.plan.done(),
                    promised: self.plan.total(),
                });
            }
            Err(e) => return Err(e.into()),
        }

        self.plan.accept(len)?;
        self.crc.update(&buf);
        Ok(Some(buf))
    }

    /// Checksum of everything read so far.
    pub fn checksum(&self) -> u32 {
        self.crc.value()
    }
}
