//! Game state as pushed by the authority.
//!
//! The client does not own the game rules; it mirrors whatever the last
//! snapshot said. Fields the client does not model are carried in `extra`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::map::{MapData, StationId};

/// One seat at the table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Station the player's token currently sits on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub station_id: Option<StationId>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Player {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            station_id: None,
            extra: Map::new(),
        }
    }
}

/// Full authoritative game-state payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSnapshot {
    #[serde(default)]
    pub map: MapData,
    #[serde(default)]
    pub players: Vec<Player>,
    #[serde(default)]
    pub current_player_index: usize,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Local mirror of the player/turn part of the game.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GameControl {
    pub players: Vec<Player>,
    pub current_player_index: usize,
    pub extra: Map<String, Value>,
    /// Number of snapshots merged so far.
    pub revision: u64,
}

impl GameControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces player and turn data with the snapshot's.
    pub fn copy_from(&mut self, snapshot: &GameSnapshot) {
        self.players = snapshot.players.clone();
        self.current_player_index = snapshot.current_player_index;
        self.extra = snapshot.extra.clone();
        self.revision += 1;
    }

    /// Player whose turn it is, if the index is valid.
    pub fn current_player(&self) -> Option<&Player> {
        self.players.get(self.current_player_index)
    }

    pub fn is_turn_of(&self, id: &str) -> bool {
        self.current_player().is_some_and(|p| p.id == id)
    }
}
