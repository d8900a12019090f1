use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use thiserror::Error;

pub const TILES_PER_PLAYER: usize = 3;
pub const SILVER_POINTS: i64 = 100;
pub const BLACK_POINTS: i64 = -50;
pub const EMPTY_POINTS: i64 = 0;
pub const BONUS_POINTS: i64 = 200;

/// Author name used for chat messages generated by the server itself.
pub const SERVER_AUTHOR: &str = "Server";

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unknown event `{0}`")]
    UnknownEvent(String),

    #[error("invalid payload for `{event}`: {source}")]
    InvalidPayload {
        event: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("room code must not be empty")]
    EmptyRoomCode,
}

/// Opaque per-connection identifier, doubling as the player identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnId(String);

impl ConnId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomCode(String);

impl RoomCode {
    pub fn parse(code: impl Into<String>) -> Result<Self, ProtocolError> {
        let code = code.into();
        if code.is_empty() {
            return Err(ProtocolError::EmptyRoomCode);
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomCode {
    fn from(code: &str) -> Self {
        Self(code.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TileType {
    Silver,
    Black,
    Empty,
    Bonus,
}

impl TileType {
    /// Type reported for concealed tiles so the real draw never leaks early.
    pub const PLACEHOLDER: TileType = TileType::Silver;

    /// Maps a uniform roll in `[0, 1)` onto silver 50%, black 20%, empty 20%, bonus 10%.
    pub fn from_roll(roll: f64) -> Self {
        if roll < 0.5 {
            TileType::Silver
        } else if roll < 0.7 {
            TileType::Black
        } else if roll < 0.9 {
            TileType::Empty
        } else {
            TileType::Bonus
        }
    }

    pub fn pot_delta(self) -> i64 {
        match self {
            TileType::Silver => SILVER_POINTS,
            TileType::Black => BLACK_POINTS,
            TileType::Empty => EMPTY_POINTS,
            TileType::Bonus => BONUS_POINTS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tile {
    pub id: u32,
    #[serde(rename = "type")]
    pub kind: TileType,
    pub revealed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revealed_by: Option<ConnId>,
}

impl Tile {
    pub fn concealed(id: u32) -> Self {
        Self {
            id,
            kind: TileType::PLACEHOLDER,
            revealed: false,
            revealed_by: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Tiles,
    Vote,
    Final,
    Over,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Choice {
    Split,
    Steal,
}

/// Public view of a game, sent on `game:init`. Votes and final choices stay hidden.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSnapshot {
    pub room_code: RoomCode,
    pub players: Vec<ConnId>,
    pub eliminated: Vec<ConnId>,
    pub host: ConnId,
    pub pot: i64,
    pub tiles: Vec<Tile>,
    pub current_player_id: ConnId,
    pub turns: u32,
    pub phase: Phase,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalOutcome {
    pub message: String,
    pub winners: Vec<ConnId>,
    pub payout: i64,
}

/// Commands a client can send.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Create { room_code: RoomCode },
    Join { room_code: RoomCode },
    Start { room_code: RoomCode },
    PickTile { room_code: RoomCode, tile_id: u32 },
    Vote { room_code: RoomCode, voted: ConnId },
    FinalChoice { room_code: RoomCode, choice: Choice },
    Chat { room_code: RoomCode, text: String },
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Create { .. } => "game:create",
            ClientEvent::Join { .. } => "game:join",
            ClientEvent::Start { .. } => "host:start",
            ClientEvent::PickTile { .. } => "pick:tile",
            ClientEvent::Vote { .. } => "vote:submit",
            ClientEvent::FinalChoice { .. } => "final:choice",
            ClientEvent::Chat { .. } => "chat:send",
        }
    }

    pub fn room_code(&self) -> &RoomCode {
        match self {
            ClientEvent::Create { room_code }
            | ClientEvent::Join { room_code }
            | ClientEvent::Start { room_code }
            | ClientEvent::PickTile { room_code, .. }
            | ClientEvent::Vote { room_code, .. }
            | ClientEvent::FinalChoice { room_code, .. }
            | ClientEvent::Chat { room_code, .. } => room_code,
        }
    }

    fn payload(&self) -> Value {
        match self {
            ClientEvent::Create { room_code }
            | ClientEvent::Join { room_code }
            | ClientEvent::Start { room_code } => json!({ "roomCode": room_code }),
            ClientEvent::PickTile { room_code, tile_id } => {
                json!({ "tileId": tile_id, "roomCode": room_code })
            }
            ClientEvent::Vote { room_code, voted } => {
                json!({ "roomCode": room_code, "voted": voted })
            }
            ClientEvent::FinalChoice { room_code, choice } => {
                json!({ "roomCode": room_code, "choice": choice })
            }
            ClientEvent::Chat { room_code, text } => {
                json!({ "roomCode": room_code, "text": text })
            }
        }
    }

    fn decode(event: &str, data: Value) -> Result<Self, ProtocolError> {
        let decoded = match event {
            "game:create" | "game:join" => {
                let room_code = match payload::<RoomRef>(event, data)? {
                    RoomRef::Bare(code) => code,
                    RoomRef::Object(RoomPayload { room_code }) => room_code,
                };
                let room_code = RoomCode::parse(room_code)?;
                if event == "game:create" {
                    ClientEvent::Create { room_code }
                } else {
                    ClientEvent::Join { room_code }
                }
            }
            // `players` is sent by some clients on host:start but the server relies on its lobby.
            "host:start" | "game:start" => {
                let RoomPayload { room_code } = payload(event, data)?;
                ClientEvent::Start {
                    room_code: RoomCode::parse(room_code)?,
                }
            }
            "pick:tile" => {
                let PickPayload { tile_id, room_code } = payload(event, data)?;
                ClientEvent::PickTile {
                    room_code: RoomCode::parse(room_code)?,
                    tile_id,
                }
            }
            "vote:submit" => {
                let VotePayload { room_code, voted } = payload(event, data)?;
                ClientEvent::Vote {
                    room_code: RoomCode::parse(room_code)?,
                    voted,
                }
            }
            "final:choice" => {
                let ChoicePayload { room_code, choice } = payload(event, data)?;
                ClientEvent::FinalChoice {
                    room_code: RoomCode::parse(room_code)?,
                    choice,
                }
            }
            "chat:send" => {
                let ChatPayload { room_code, text } = payload(event, data)?;
                ClientEvent::Chat {
                    room_code: RoomCode::parse(room_code)?,
                    text,
                }
            }
            other => return Err(ProtocolError::UnknownEvent(other.to_string())),
        };
        Ok(decoded)
    }
}

/// An inbound frame: the event plus the optional acknowledgment id.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientEnvelope {
    pub event: ClientEvent,
    pub ack: Option<u64>,
}

impl ClientEnvelope {
    pub fn new(event: ClientEvent) -> Self {
        Self { event, ack: None }
    }

    pub fn with_ack(event: ClientEvent, ack: u64) -> Self {
        Self {
            event,
            ack: Some(ack),
        }
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let raw: RawEnvelope = serde_json::from_str(text)?;
        let event = ClientEvent::decode(&raw.event, raw.data)?;
        Ok(Self {
            event,
            ack: raw.ack,
        })
    }

    pub fn encode(&self) -> String {
        let mut frame = json!({
            "event": self.event.name(),
            "data": self.event.payload(),
        });
        if let Some(ack) = self.ack {
            frame["ack"] = json!(ack);
        }
        frame.to_string()
    }
}

#[derive(Deserialize)]
struct RawEnvelope {
    event: String,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    ack: Option<u64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoomPayload {
    room_code: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RoomRef {
    Bare(String),
    Object(RoomPayload),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PickPayload {
    tile_id: u32,
    room_code: String,
}

// `voter` is also sent by clients; the submitting connection is authoritative.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VotePayload {
    room_code: String,
    voted: ConnId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChoicePayload {
    room_code: String,
    choice: Choice,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatPayload {
    room_code: String,
    text: String,
}

fn payload<T: DeserializeOwned>(event: &str, data: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(data).map_err(|source| ProtocolError::InvalidPayload {
        event: event.to_string(),
        source,
    })
}

/// Events pushed from the server to one connection or a whole room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "session:welcome", rename_all = "camelCase")]
    Welcome { connection_id: ConnId },
    #[serde(rename = "lobby:update")]
    LobbyUpdate {
        players: Vec<ConnId>,
        host: Option<ConnId>,
    },
    #[serde(rename = "game:init")]
    GameInit(GameSnapshot),
    #[serde(rename = "tile:revealed", rename_all = "camelCase")]
    TileRevealed {
        tile_id: u32,
        #[serde(rename = "type")]
        kind: TileType,
        revealed_by: ConnId,
        pot: i64,
        current_player_id: ConnId,
        turns: u32,
    },
    #[serde(rename = "game:update", rename_all = "camelCase")]
    GameUpdate { current_player_id: ConnId, pot: i64 },
    #[serde(rename = "game:vote")]
    VoteStart { pot: i64, players: Vec<ConnId> },
    #[serde(rename = "player:eliminated", rename_all = "camelCase")]
    PlayerEliminated {
        eliminated: ConnId,
        players: Vec<ConnId>,
        eliminated_list: Vec<ConnId>,
    },
    #[serde(rename = "voting:next")]
    VotingNext { players: Vec<ConnId> },
    #[serde(rename = "final:start")]
    FinalStart { pot: i64, players: Vec<ConnId> },
    #[serde(rename = "game:over")]
    GameOver { pot: i64, result: FinalOutcome },
    #[serde(rename = "final:result")]
    FinalResult {
        pot: i64,
        message: String,
        winners: Vec<ConnId>,
        payout: i64,
    },
    #[serde(rename = "game:notfound")]
    GameNotFound,
    #[serde(rename = "game:notenough")]
    NotEnoughPlayers { message: String },
    #[serde(rename = "room:taken", rename_all = "camelCase")]
    RoomTaken { room_code: RoomCode },
    #[serde(rename = "chat:message")]
    ChatMessage {
        id: u64,
        author: String,
        text: String,
        time: String,
    },
    #[serde(rename = "ack")]
    Ack { id: u64 },
    #[serde(rename = "server:error")]
    Error { message: String },
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Welcome { .. } => "session:welcome",
            ServerEvent::LobbyUpdate { .. } => "lobby:update",
            ServerEvent::GameInit(_) => "game:init",
            ServerEvent::TileRevealed { .. } => "tile:revealed",
            ServerEvent::GameUpdate { .. } => "game:update",
            ServerEvent::VoteStart { .. } => "game:vote",
            ServerEvent::PlayerEliminated { .. } => "player:eliminated",
            ServerEvent::VotingNext { .. } => "voting:next",
            ServerEvent::FinalStart { .. } => "final:start",
            ServerEvent::GameOver { .. } => "game:over",
            ServerEvent::FinalResult { .. } => "final:result",
            ServerEvent::GameNotFound => "game:notfound",
            ServerEvent::NotEnoughPlayers { .. } => "game:notenough",
            ServerEvent::RoomTaken { .. } => "room:taken",
            ServerEvent::ChatMessage { .. } => "chat:message",
            ServerEvent::Ack { .. } => "ack",
            ServerEvent::Error { .. } => "server:error",
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}
