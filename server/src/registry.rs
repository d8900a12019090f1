//! Live WebSocket connections and their room broadcast groups
//!
//! This module handles the server-side bookkeeping for connected clients:
//! - Connection lifecycle (register on handshake, remove on close)
//! - Capacity limits for concurrent connections
//! - Room broadcast groups that a connection joins on create/join
//! - Non-blocking delivery of outbound frames to each connection's writer task
//!
//! The registry never inspects game state. It only knows which connections
//! exist and which rooms they listen to.

use crate::gateway::Gateway;
use log::{debug, info, warn};
use shared::{ConnId, RoomCode};
use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

/// A connected client and the channel feeding its writer task
#[derive(Debug)]
pub struct Connection {
    /// Identifier assigned at handshake, also the player identity
    pub id: ConnId,
    /// Peer address, for logging
    pub addr: SocketAddr,
    pub connected_at: Instant,
    /// Rooms whose broadcasts this connection receives
    pub rooms: BTreeSet<RoomCode>,
    sender: mpsc::UnboundedSender<Message>,
}

impl Connection {
    pub fn new(id: ConnId, addr: SocketAddr, sender: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            id,
            addr,
            connected_at: Instant::now(),
            rooms: BTreeSet::new(),
            sender,
        }
    }

    /// Queues a text frame. Returns false if the writer task is gone.
    pub fn send_text(&self, text: &str) -> bool {
        self.sender.send(Message::Text(text.to_string())).is_ok()
    }
}

pub struct ConnectionRegistry {
    connections: HashMap<ConnId, Connection>,
    groups: HashMap<RoomCode, Vec<ConnId>>,
    max_connections: usize,
}

impl ConnectionRegistry {
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: HashMap::new(),
            groups: HashMap::new(),
            max_connections,
        }
    }

    /// Registers a freshly accepted connection.
    ///
    /// Returns false without registering when the server is at capacity; the
    /// caller is expected to close the socket.
    pub fn add_connection(
        &mut self,
        id: ConnId,
        addr: SocketAddr,
        sender: mpsc::UnboundedSender<Message>,
    ) -> bool {
        if self.connections.len() >= self.max_connections {
            warn!("Rejecting {} from {}: server full", id, addr);
            return false;
        }

        info!("Connection {} opened from {}", id, addr);
        self.connections
            .insert(id.clone(), Connection::new(id, addr, sender));
        true
    }

    /// Removes a connection and drops it from every broadcast group.
    pub fn remove_connection(&mut self, id: &ConnId) -> Option<Connection> {
        let connection = self.connections.remove(id)?;
        for room in &connection.rooms {
            if let Some(members) = self.groups.get_mut(room) {
                members.retain(|member| member != id);
                if members.is_empty() {
                    self.groups.remove(room);
                }
            }
        }

        info!(
            "Connection {} from {} closed after {:.1}s",
            id,
            connection.addr,
            connection.connected_at.elapsed().as_secs_f32()
        );
        Some(connection)
    }

    pub fn get(&self, id: &ConnId) -> Option<&Connection> {
        self.connections.get(id)
    }

    pub fn contains(&self, id: &ConnId) -> bool {
        self.connections.contains_key(id)
    }

    /// Adds the connection to a room's broadcast group. Unknown ids are ignored.
    pub fn join_group(&mut self, id: &ConnId, room: &RoomCode) -> bool {
        let Some(connection) = self.connections.get_mut(id) else {
            return false;
        };
        if !connection.rooms.insert(room.clone()) {
            return true;
        }
        self.groups.entry(room.clone()).or_default().push(id.clone());
        true
    }

    pub fn group_members(&self, room: &RoomCode) -> &[ConnId] {
        self.groups.get(room).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl Gateway for ConnectionRegistry {
    fn subscribe(&mut self, conn: &ConnId, room: &RoomCode) {
        self.join_group(conn, room);
    }

    fn send_to(&mut self, conn: &ConnId, frame: &str) {
        match self.connections.get(conn) {
            Some(connection) => {
                if !connection.send_text(frame) {
                    debug!("Writer for {} already closed", conn);
                }
            }
            None => debug!("Dropping frame for unknown connection {}", conn),
        }
    }

    fn broadcast(&mut self, room: &RoomCode, frame: &str) {
        for member in self.group_members(room) {
            if let Some(connection) = self.connections.get(member) {
                if !connection.send_text(frame) {
                    debug!("Writer for {} already closed", member);
                }
            }
        }
    }
}
