//! Shared state of a running chat service.

use std::sync::Arc;

use crate::chat::RoomRegistry;
use crate::config::Config;
use crate::file::{RoomStorage, UploadPolicy};
use crate::Result;

/// Everything sessions share: the room registry, file storage and the
/// transfer and queue settings.
#[derive(Debug)]
pub struct ChatService {
    pub registry: RoomRegistry,
    pub storage: RoomStorage,
    pub policy: UploadPolicy,
    pub chunk_size: usize,
    pub outbound_queue: usize,
}

impl ChatService {
    /// Build the service from configuration, creating the storage root.
    pub fn from_config(config: &Config) -> Result<Arc<Self>> {
        Ok(Arc::new(Self {
            registry: RoomRegistry::new(
                config.chat.default_room.clone(),
                config.chat.max_history,
            ),
            storage: RoomStorage::new(&config.files.storage_path)?,
            policy: UploadPolicy::from_config(&config.files),
            chunk_size: config.files.chunk_size,
            outbound_queue: config.server.outbound_queue,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_from_config() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.files.storage_path = dir.path().join("files").to_string_lossy().into_owned();
        config.chat.default_room = "Hall".to_string();

        let service = ChatService::from_config(&config).unwrap();

        assert!(dir.path().join("files").is_dir());
        assert_eq!(service.registry.default_room(), "Hall");
        assert_eq!(service.chunk_size, 1024);
        assert_eq!(service.policy.min_size, 2048);
        assert_eq!(service.outbound_queue, 1024);
    }
}
