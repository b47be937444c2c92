//! Room registry for lounge.
//!
//! Rooms are created on first reference and live for the rest of the
//! process. The registry lock only covers lookup and creation; per-room
//! work happens under each room's own lock.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use super::room::Room;
use crate::peer::Event;

/// Room information for listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomInfo {
    pub id: String,
    pub occupancy: usize,
}

/// Process-wide map from room id to room.
#[derive(Debug)]
pub struct RoomRegistry {
    default_room: String,
    max_history: usize,
    rooms: RwLock<HashMap<String, Arc<Room>>>,
}

impl RoomRegistry {
    /// Create an empty registry.
    pub fn new(default_room: impl Into<String>, max_history: usize) -> Self {
        Self {
            default_room: default_room.into(),
            max_history,
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Id the empty room id maps to.
    pub fn default_room(&self) -> &str {
        &self.default_room
    }

    /// Map the empty id to the default room.
    pub fn normalize<'a>(&'a self, id: &'a str) -> &'a str {
        if id.is_empty() {
            &self.default_room
        } else {
            id
        }
    }

    /// Get the room for `id`, creating it if unseen.
    pub async fn prepare_room(&self, id: &str) -> Arc<Room> {
        let id = self.normalize(id);

        if let Some(room) = self.rooms.read().await.get(id) {
            return Arc::clone(room);
        }

        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get(id) {
            return Arc::clone(room);
        }

        info!(room = %id, "Created room");
        let room = Arc::new(Room::new(id, self.max_history));
        rooms.insert(id.to_string(), Arc::clone(&room));
        room
    }

    /// Get a room by ID without creating it.
    pub async fn get_room(&self, id: &str) -> Option<Arc<Room>> {
        self.rooms.read().await.get(self.normalize(id)).cloned()
    }

    /// List all rooms with their occupancy, sorted by id.
    pub async fn list_rooms(&self) -> Vec<RoomInfo> {
        let rooms: Vec<Arc<Room>> = self.rooms.read().await.values().cloned().collect();

        let mut result = Vec::with_capacity(rooms.len());
        for room in rooms {
            result.push(RoomInfo {
                id: room.id().to_string(),
                occupancy: room.occupancy().await,
            });
        }

        result.sort_by(|a, b| a.id.cmp(&b.id));
        result
    }

    /// Get the number of rooms.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Send a notice to every member of every room.
    ///
    /// Returns how many members it was queued for.
    pub async fn announce(&self, text: &str) -> usize {
        let rooms: Vec<Arc<Room>> = self.rooms.read().await.values().cloned().collect();

        let mut delivered = 0;
        for room in rooms {
            let event = Event::Notice {
                text: text.to_string(),
            };
            delivered += room.broadcast(event, None).await.delivered;
        }
        delivered
    }
}
