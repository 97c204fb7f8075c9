use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::events::{PlayerId, PlayerPresence, ServerId};

/// A player currently on a server, as tracked by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRef {
    pub id: PlayerId,
    pub player_game_id: String,
    pub current_name: String,
}

impl From<PlayerPresence> for PlayerRef {
    fn from(p: PlayerPresence) -> Self {
        Self {
            id: p.id,
            player_game_id: p.player_game_id,
            current_name: p.name,
        }
    }
}

/// In-memory view of one game server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerViewState {
    pub id: ServerId,
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub online: bool,
    /// Roster in join order. Player ids are unique.
    #[serde(default, rename = "onlinePlayers")]
    players: Vec<PlayerRef>,
}

/// What an upsert did to the roster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RosterChange {
    Added,
    Updated,
    Unchanged,
}

impl ServerViewState {
    pub fn new(id: ServerId, name: String, address: String) -> Self {
        Self {
            id,
            name,
            address,
            online: false,
            players: Vec::new(),
        }
    }

    /// Build a view from a snapshot roster, dropping repeated player ids
    /// (the first occurrence wins).
    pub fn with_players(mut self, players: impl IntoIterator<Item = PlayerRef>) -> Self {
        self.players = players.into_iter().collect();
        self.dedup_players();
        self
    }

    pub fn players(&self) -> &[PlayerRef] {
        &self.players
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Insert a player, or refresh an existing entry in place.
    /// An existing entry keeps its roster position.
    pub fn upsert_player(&mut self, player: PlayerRef) -> RosterChange {
        match self.players.iter_mut().find(|p| p.id == player.id) {
            Some(existing) if *existing == player => RosterChange::Unchanged,
            Some(existing) => {
                *existing = player;
                RosterChange::Updated
            }
            None => {
                self.players.push(player);
                RosterChange::Added
            }
        }
    }

    /// Remove every entry with this id. Returns how many were removed.
    pub fn remove_player(&mut self, id: PlayerId) -> usize {
        let before = self.players.len();
        self.players.retain(|p| p.id != id);
        before - self.players.len()
    }

    /// Enforce id uniqueness on a roster that came from outside (a snapshot).
    /// The first occurrence of each id wins.
    pub fn dedup_players(&mut self) {
        let mut seen = HashSet::new();
        self.players.retain(|p| seen.insert(p.id));
    }
}
