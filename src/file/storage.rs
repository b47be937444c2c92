//! Room-scoped file storage for lounge.
//!
//! Files live under one directory per room:
//! ```text
//! {base_path}/
//! ├── Lobby/
//! │   └── notes.txt
//! └── Tech/
//!     └── build.log
//! ```
//!
//! Room ids and file names come from remote peers, so both must be a single
//! normal path component before they are joined onto the base path.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{LoungeError, Result};

/// Leading characters that mark a file as hidden or reserved for control use.
pub const RESERVED_PREFIXES: &[char] = &['.', '~', '!', '?', '*'];

/// A listed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Size in bytes.
    pub size: u64,
    /// File name within the room directory.
    pub name: String,
}

/// Metadata of a stored regular file.
#[derive(Debug, Clone)]
pub struct FileStat {
    /// Path on disk.
    pub path: PathBuf,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time, if the platform reports one.
    pub modified: Option<DateTime<Local>>,
}

impl FileStat {
    /// Human readable note sent along with a download offer.
    pub fn describe(&self) -> String {
        match self.modified {
            Some(t) => format!("last modified: {}", t.format("%Y-%m-%d %H:%M:%S")),
            None => "last modified: unknown".to_string(),
        }
    }
}

/// Whether a file name shows up in listings.
pub fn is_listed(name: &str) -> bool {
    !name.starts_with(RESERVED_PREFIXES)
}

/// Check that `name` is usable as a single path component.
fn validate_component(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(LoungeError::Validation(format!("{kind} is empty")));
    }
    if name.contains(['/', '\\', '\0']) {
        return Err(LoungeError::Validation(format!(
            "{kind} may not contain path separators: {name:?}"
        )));
    }
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(LoungeError::Validation(format!(
            "{kind} is not a plain name: {name:?}"
        ))),
    }
}

/// Validate a peer-supplied room id for use as a directory name.
pub fn validate_room_id(room: &str) -> Result<()> {
    validate_component("room id", room)
}

/// Validate a peer-supplied file name for an upload.
///
/// Names with a reserved leading character are refused since they would
/// never show up in a listing.
pub fn validate_file_name(name: &str) -> Result<()> {
    validate_component("file name", name)?;
    if !is_listed(name) {
        return Err(LoungeError::Validation(format!(
            "file name may not start with any of {}",
            RESERVED_PREFIXES.iter().collect::<String>()
        )));
    }
    Ok(())
}

/// Per-room file storage rooted at a service-local directory.
#[derive(Debug, Clone)]
pub struct RoomStorage {
    base_path: PathBuf,
}

impl RoomStorage {
    /// Create a new RoomStorage with the given base path.
    ///
    /// The base directory will be created if it doesn't exist.
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path)?;

        Ok(Self { base_path })
    }

    /// Get the base path of this storage.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Directory of a room, without touching the filesystem.
    pub fn room_dir(&self, room: &str) -> Result<PathBuf> {
        validate_room_id(room)?;
        Ok(self.base_path.join(room))
    }

    /// Directory of a room, created if missing.
    pub fn ensure_room_dir(&self, room: &str) -> Result<PathBuf> {
        let dir = self.room_dir(room)?;
        if !dir.is_dir() {
            info!("Making room dir [{}]", dir.display());
            fs::create_dir_all(&dir)?;
        }
        Ok(dir)
    }

    /// Full path of a file inside a room.
    pub fn file_path(&self, room: &str, name: &str) -> Result<PathBuf> {
        validate_component("file name", name)?;
        Ok(self.room_dir(room)?.join(name))
    }

    /// Stat a stored file.
    ///
    /// Returns `None` if the file is missing or not a regular file.
    pub fn stat(&self, room: &str, name: &str) -> Result<Option<FileStat>> {
        let path = self.file_path(room, name)?;

        match fs::metadata(&path) {
            Ok(m) if m.is_file() => Ok(Some(FileStat {
                size: m.len(),
                modified: m.modified().ok().map(DateTime::<Local>::from),
                path,
            })),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// List regular, non-reserved files of a room, sorted by name.
    ///
    /// The room directory is created on first listing.
    pub fn list(&self, room: &str) -> Result<Vec<FileEntry>> {
        let dir = self.ensure_room_dir(room)?;

        let mut entries = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if !is_listed(&name) {
                continue;
            }
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            entries.push(FileEntry {
                size: metadata.len(),
                name,
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Delete a file from a room.
    ///
    /// Returns `true` if the file was deleted, `false` if it didn't exist.
    pub fn remove(&self, room: &str, name: &str) -> Result<bool> {
        let path = self.file_path(room, name)?;

        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
