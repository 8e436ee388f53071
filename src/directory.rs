use async_trait::async_trait;
use dashmap::DashMap;
use ulid::Ulid;

use crate::limits::MAX_ROOM_NAME_LEN;
use crate::model::RoomInfo;

/// Read-only view of the room catalog.
#[async_trait]
pub trait RoomDirectory: Send + Sync {
    async fn exists(&self, room_id: Ulid) -> bool;
    /// `false` for unknown rooms.
    async fn is_active(&self, room_id: Ulid) -> bool;
    async fn rooms(&self) -> Vec<RoomInfo>;
}

/// Catalog held in memory, seeded at startup.
#[derive(Debug, Default)]
pub struct InMemoryRoomDirectory {
    rooms: DashMap<Ulid, RoomInfo>,
}

impl InMemoryRoomDirectory {
    pub fn new() -> Self {
        Self { rooms: DashMap::new() }
    }

    pub fn insert(&self, mut room: RoomInfo) {
        if let Some(name) = room.name.as_mut()
            && name.len() > MAX_ROOM_NAME_LEN
        {
            let mut cut = MAX_ROOM_NAME_LEN;
            while !name.is_char_boundary(cut) {
                cut -= 1;
            }
            name.truncate(cut);
        }
        self.rooms.insert(room.id, room);
    }

    /// Soft delete / reinstate. Returns `false` for unknown rooms.
    pub fn set_active(&self, room_id: Ulid, active: bool) -> bool {
        match self.rooms.get_mut(&room_id) {
            Some(mut room) => {
                room.active = active;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

#[async_trait]
impl RoomDirectory for InMemoryRoomDirectory {
    async fn exists(&self, room_id: Ulid) -> bool {
        self.rooms.contains_key(&room_id)
    }

    async fn is_active(&self, room_id: Ulid) -> bool {
        self.rooms.get(&room_id).is_some_and(|r| r.active)
    }

    async fn rooms(&self) -> Vec<RoomInfo> {
        self.rooms.iter().map(|e| e.value().clone()).collect()
    }
}
