//! File sharing module for lounge.
//!
//! This module provides per-room file sharing including:
//! - Room-scoped storage with sanitized names
//! - Upload size policy
//! - Chunked streaming with a running CRC-32

mod checksum;
mod storage;
mod transfer;

pub use checksum::{crc32, Crc32};
pub use storage::{
    is_listed, validate_file_name, validate_room_id, FileEntry, FileStat, RoomStorage,
    RESERVED_PREFIXES,
};
pub use transfer::{
    ChunkPlan, FileReceiver, FileSender, TransferError, TransferResult, UploadPolicy,
};

/// Default nominal chunk size for streamed transfers (1 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Size in KiB as shown in upload announcements, rounded up.
pub fn size_in_kib(size: u64) -> u64 {
    size.div_ceil(1024)
}
