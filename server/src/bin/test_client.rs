use clap::{Parser, ValueEnum};
use futures_util::{SinkExt, StreamExt};
use rand::seq::SliceRandom;
use shared::{Choice, ClientEnvelope, ClientEvent, ConnId, Phase, RoomCode, ServerEvent, Tile};
use std::collections::BTreeSet;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

/// Scripted player that joins a room and plays until the game is over.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// WebSocket URL of the server
    #[clap(short, long, default_value = "ws://127.0.0.1:4000")]
    url: String,
    /// Room code to create or join
    #[clap(short, long, default_value = "TEST")]
    room: String,
    /// Create the room and act as host instead of joining
    #[clap(long)]
    host: bool,
    /// As host, start once this many players are in the lobby
    #[clap(long, default_value = "2")]
    start_at: usize,
    /// Final decision
    #[clap(long, value_enum, default_value_t = FinalPick::Split)]
    choice: FinalPick,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FinalPick {
    Split,
    Steal,
}

impl From<FinalPick> for Choice {
    fn from(pick: FinalPick) -> Self {
        match pick {
            FinalPick::Split => Choice::Split,
            FinalPick::Steal => Choice::Steal,
        }
    }
}

/// What the bot knows about the room so far
#[derive(Default)]
struct BotState {
    me: Option<ConnId>,
    started: bool,
    players: Vec<ConnId>,
    concealed: BTreeSet<u32>,
    current: Option<ConnId>,
    phase: Option<Phase>,
}

impl BotState {
    fn my_turn(&self) -> bool {
        self.phase == Some(Phase::Tiles) && self.me.is_some() && self.current == self.me
    }

    fn still_playing(&self) -> bool {
        self.me
            .as_ref()
            .map_or(false, |me| self.players.contains(me))
    }

    fn vote_target(&self) -> Option<ConnId> {
        let others: Vec<&ConnId> = self
            .players
            .iter()
            .filter(|player| Some(*player) != self.me.as_ref())
            .collect();
        others.choose(&mut rand::thread_rng()).map(|target| (*target).clone())
    }

    fn track_tiles(&mut self, tiles: &[Tile]) {
        self.concealed = tiles
            .iter()
            .filter(|tile| !tile.revealed)
            .map(|tile| tile.id)
            .collect();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let room = RoomCode::parse(args.room.clone())?;
    let choice = Choice::from(args.choice);

    println!("Connecting to {}", args.url);
    let (ws_stream, _) = connect_async(args.url.as_str()).await?;
    let (mut write, mut read) = ws_stream.split();

    let mut state = BotState::default();
    let mut next_ack = 1u64;

    while let Some(frame) = read.next().await {
        let text = match frame? {
            Message::Text(text) => text,
            Message::Close(_) => {
                println!("Server closed the connection");
                break;
            }
            _ => continue,
        };

        let event = match ServerEvent::decode(&text) {
            Ok(event) => event,
            Err(e) => {
                println!("Failed to decode server event: {}", e);
                continue;
            }
        };

        let mut outgoing: Vec<ClientEvent> = Vec::new();
        let mut turn_changed = false;
        let mut ballot_open = false;
        let mut final_open = false;

        match event {
            ServerEvent::Welcome { connection_id } => {
                println!("Connected as {}", connection_id);
                state.me = Some(connection_id);
                let room_code = room.clone();
                outgoing.push(if args.host {
                    ClientEvent::Create { room_code }
                } else {
                    ClientEvent::Join { room_code }
                });
            }
            ServerEvent::LobbyUpdate { players, host } => {
                println!("Lobby: {} players, host {:?}", players.len(), host);
                if args.host
                    && !state.started
                    && host == state.me
                    && players.len() >= args.start_at
                {
                    state.started = true;
                    outgoing.push(ClientEvent::Start {
                        room_code: room.clone(),
                    });
                }
            }
            ServerEvent::GameInit(snapshot) => {
                println!(
                    "Game started: {} players, {} tiles, {} goes first",
                    snapshot.players.len(),
                    snapshot.tiles.len(),
                    snapshot.current_player_id
                );
                state.track_tiles(&snapshot.tiles);
                state.players = snapshot.players;
                state.current = Some(snapshot.current_player_id);
                state.phase = Some(snapshot.phase);
                turn_changed = true;
            }
            ServerEvent::TileRevealed {
                tile_id,
                kind,
                revealed_by,
                pot,
                current_player_id,
                ..
            } => {
                println!(
                    "Tile {} was {:?} (picked by {}), pot now {}",
                    tile_id, kind, revealed_by, pot
                );
                state.concealed.remove(&tile_id);
                state.current = Some(current_player_id);
                turn_changed = true;
            }
            ServerEvent::GameUpdate {
                current_player_id, ..
            } => {
                state.current = Some(current_player_id);
                turn_changed = true;
            }
            ServerEvent::VoteStart { pot, players } => {
                println!("Voting opens with {} in the pot", pot);
                state.players = players;
                state.phase = Some(Phase::Vote);
                ballot_open = true;
            }
            ServerEvent::VotingNext { players } => {
                println!("Next voting round among {} players", players.len());
                state.players = players;
                ballot_open = true;
            }
            ServerEvent::PlayerEliminated {
                eliminated,
                players,
                ..
            } => {
                println!("{} was eliminated", eliminated);
                state.players = players;
            }
            ServerEvent::FinalStart { pot, players } => {
                println!("Final between {:?} for {}", players, pot);
                state.players = players;
                state.phase = Some(Phase::Final);
                final_open = true;
            }
            ServerEvent::GameOver { pot, result } => {
                println!(
                    "Game over: {} (pot {}, payout {})",
                    result.message, pot, result.payout
                );
                break;
            }
            ServerEvent::ChatMessage { author, text, .. } => {
                println!("[{}] {}", author, text);
            }
            ServerEvent::Ack { id } => println!("Ack {}", id),
            other => println!("Received: {:?}", other),
        }

        if turn_changed && state.my_turn() {
            if let Some(tile_id) = state.concealed.iter().next().copied() {
                outgoing.push(ClientEvent::PickTile {
                    room_code: room.clone(),
                    tile_id,
                });
            }
        }
        if ballot_open && state.still_playing() {
            if let Some(voted) = state.vote_target() {
                println!("Voting for {}", voted);
                outgoing.push(ClientEvent::Vote {
                    room_code: room.clone(),
                    voted,
                });
            }
        }
        if final_open && state.still_playing() {
            println!("Choosing {:?}", choice);
            outgoing.push(ClientEvent::FinalChoice {
                room_code: room.clone(),
                choice,
            });
        }

        for event in outgoing {
            let envelope = ClientEnvelope::with_ack(event, next_ack);
            next_ack += 1;
            write.send(Message::Text(envelope.encode())).await?;
        }
    }

    let _ = write.close().await;
    Ok(())
}
