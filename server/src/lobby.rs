//! Pre-game lobbies keyed by room code
//!
//! A lobby is an insertion-ordered list of connections. The host is whoever
//! sits at position 0, so removing the host silently promotes the next member.

use log::info;
use shared::{ConnId, RoomCode};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lobby {
    members: Vec<ConnId>,
}

impl Lobby {
    pub fn with_host(host: ConnId) -> Self {
        Self {
            members: vec![host],
        }
    }

    pub fn host(&self) -> Option<&ConnId> {
        self.members.first()
    }

    pub fn is_host(&self, conn: &ConnId) -> bool {
        self.host() == Some(conn)
    }

    pub fn members(&self) -> &[ConnId] {
        &self.members
    }

    pub fn contains(&self, conn: &ConnId) -> bool {
        self.members.contains(conn)
    }

    /// Appends the connection unless it is already a member. Returns true if added.
    pub fn add(&mut self, conn: ConnId) -> bool {
        if self.contains(&conn) {
            return false;
        }
        self.members.push(conn);
        true
    }

    pub fn remove(&mut self, conn: &ConnId) -> bool {
        let before = self.members.len();
        self.members.retain(|member| member != conn);
        self.members.len() != before
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct LobbyStore {
    lobbies: HashMap<RoomCode, Lobby>,
}

impl LobbyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, room: &RoomCode) -> Option<&Lobby> {
        self.lobbies.get(room)
    }

    /// Creates (or overwrites) the lobby with `host` as its only member.
    pub fn create(&mut self, room: RoomCode, host: ConnId) -> &Lobby {
        info!("Lobby {} created by {}", room, host);
        self.lobbies.insert(room.clone(), Lobby::with_host(host));
        &self.lobbies[&room]
    }

    /// Returns the lobby for `room`, inserting an empty one if absent.
    pub fn ensure(&mut self, room: &RoomCode) -> &mut Lobby {
        self.lobbies.entry(room.clone()).or_default()
    }

    pub fn remove(&mut self, room: &RoomCode) -> Option<Lobby> {
        self.lobbies.remove(room)
    }

    /// Removes `conn` from every lobby it belongs to and returns the affected rooms.
    pub fn remove_member(&mut self, conn: &ConnId) -> Vec<RoomCode> {
        let mut affected: Vec<RoomCode> = self
            .lobbies
            .iter_mut()
            .filter_map(|(room, lobby)| lobby.remove(conn).then(|| room.clone()))
            .collect();
        affected.sort();
        affected
    }

    pub fn len(&self) -> usize {
        self.lobbies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lobbies.is_empty()
    }
}
