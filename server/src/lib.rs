//! # Silver Squares Server Library
//!
//! This library provides the authoritative server for Silver Squares, a
//! room-based party game. Players gather in a lobby under a short room code,
//! take turns uncovering tiles that grow or shrink a shared pot, vote each
//! other out until two remain, and then decide in secret whether to split or
//! steal the pot.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Rules
//! Every decision is made here. Tile contents are drawn only when a tile is
//! revealed, votes and final choices are held privately until they resolve,
//! and clients only ever see the broadcast results.
//!
//! ### Connection Management
//! Handles the lifecycle of WebSocket sessions:
//! - Handshake and connection id assignment
//! - Room broadcast group membership
//! - Disconnection cleanup (lobby removal, turn hand-off, optional forfeit)
//!
//! ### Event Broadcasting
//! Each accepted action produces one or more named events. Most go to every
//! connection in the room; rejections such as `game:notfound` only go back to
//! the sender.
//!
//! ## Architecture Design
//!
//! ### Single Event Loop
//! Connection tasks only move frames. All room state lives in one
//! [`coordinator::RoomCoordinator`] driven by a single loop, so every event is
//! applied atomically and in arrival order without locks.
//!
//! ### JSON over WebSocket
//! Frames are JSON text messages of the form `{"event": ..., "data": ...}`,
//! with an optional `ack` id on inbound frames that the server echoes back
//! once the event has been applied.
//!
//! ## Module Organization
//!
//! ### Config Module (`config`)
//! Network settings and the game rules the coordinator enforces.
//!
//! ### Lobby Module (`lobby`)
//! Ordered member lists per room code; position 0 is the host.
//!
//! ### Game Module (`game`)
//! The per-room state machine (`tiles -> vote -> final -> over`) and the
//! store of running games.
//!
//! ### Coordinator Module (`coordinator`)
//! Translates client events into lobby and game changes and returns the
//! resulting deliveries.
//!
//! ### Gateway and Registry Modules (`gateway`, `registry`)
//! Turn coordinator output into frames on live connections.
//!
//! ### Network Module (`network`)
//! TCP listener, WebSocket sessions and the main loop.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let mut server = Server::bind(ServerConfig::default()).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod coordinator;
pub mod game;
pub mod gateway;
pub mod lobby;
pub mod network;
pub mod registry;
pub mod rng;
