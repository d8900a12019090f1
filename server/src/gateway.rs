//! Outbound delivery seam between the room coordinator and the sockets
//!
//! The coordinator never writes to a socket. It returns a list of
//! [`Dispatch`] instructions, and [`deliver`] turns them into frames on a
//! [`Gateway`], in order. Each event is serialized once no matter how many
//! connections receive it.

use log::error;
use shared::{ConnId, RoomCode, ServerEvent};

#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Add the connection to the room's broadcast group
    Subscribe { conn: ConnId, room: RoomCode },
    /// Send to a single connection
    Direct { conn: ConnId, event: ServerEvent },
    /// Send to every connection subscribed to the room
    Room { room: RoomCode, event: ServerEvent },
}

impl Dispatch {
    pub fn subscribe(conn: &ConnId, room: &RoomCode) -> Self {
        Dispatch::Subscribe {
            conn: conn.clone(),
            room: room.clone(),
        }
    }

    pub fn direct(conn: &ConnId, event: ServerEvent) -> Self {
        Dispatch::Direct {
            conn: conn.clone(),
            event,
        }
    }

    pub fn room(room: &RoomCode, event: ServerEvent) -> Self {
        Dispatch::Room {
            room: room.clone(),
            event,
        }
    }

    pub fn event(&self) -> Option<&ServerEvent> {
        match self {
            Dispatch::Subscribe { .. } => None,
            Dispatch::Direct { event, .. } | Dispatch::Room { event, .. } => Some(event),
        }
    }
}

pub trait Gateway {
    fn subscribe(&mut self, conn: &ConnId, room: &RoomCode);
    fn send_to(&mut self, conn: &ConnId, frame: &str);
    fn broadcast(&mut self, room: &RoomCode, frame: &str);
}

pub fn deliver<G: Gateway + ?Sized>(gateway: &mut G, dispatches: Vec<Dispatch>) {
    for dispatch in dispatches {
        match dispatch {
            Dispatch::Subscribe { conn, room } => gateway.subscribe(&conn, &room),
            Dispatch::Direct { conn, event } => match event.encode() {
                Ok(frame) => gateway.send_to(&conn, &frame),
                Err(e) => error!("Failed to encode {} for {}: {}", event.name(), conn, e),
            },
            Dispatch::Room { room, event } => match event.encode() {
                Ok(frame) => gateway.broadcast(&room, &frame),
                Err(e) => error!("Failed to encode {} for room {}: {}", event.name(), room, e),
            },
        }
    }
}
