use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::directory::InMemoryRoomDirectory;
use crate::identity::{IdentityEntry, StaticIdentities};
use crate::model::RoomInfo;

/// Startup catalog: rooms and the bearer tokens allowed to book them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub rooms: Vec<RoomInfo>,
    #[serde(default)]
    pub identities: Vec<IdentityEntry>,
}

impl Seed {
    pub fn from_json(raw: &str) -> io::Result<Self> {
        serde_json::from_str(raw).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    pub fn load(path: &Path) -> io::Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    pub fn into_parts(self) -> (InMemoryRoomDirectory, StaticIdentities) {
        let directory = InMemoryRoomDirectory::new();
        for room in self.rooms {
            directory.insert(room);
        }
        (directory, StaticIdentities::new(self.identities))
    }
}
