//! Room coordinator: turns client events into state changes and broadcasts
//!
//! The coordinator owns every lobby, every game and the random source. It is
//! driven from a single task, so each inbound event is applied atomically and
//! in arrival order. Handlers never fail: an action that does not apply is
//! logged at debug level and produces no broadcast (and no acknowledgment).

use crate::config::RoomConfig;
use crate::game::{AfterForfeit, Elimination, Game, GameStore, VoteProgress};
use crate::gateway::Dispatch;
use crate::lobby::{Lobby, LobbyStore};
use crate::rng::{RandomSource, SystemRng};
use chrono::{SecondsFormat, Utc};
use log::{debug, info};
use shared::{
    Choice, ClientEnvelope, ClientEvent, ConnId, FinalOutcome, Phase, RoomCode, ServerEvent,
    SERVER_AUTHOR,
};
use std::time::Instant;

pub struct RoomCoordinator<R: RandomSource = SystemRng> {
    lobbies: LobbyStore,
    games: GameStore,
    rng: R,
    config: RoomConfig,
}

impl<R: RandomSource> RoomCoordinator<R> {
    pub fn new(config: RoomConfig, rng: R) -> Self {
        Self {
            lobbies: LobbyStore::new(),
            games: GameStore::new(),
            rng,
            config,
        }
    }

    pub fn lobbies(&self) -> &LobbyStore {
        &self.lobbies
    }

    pub fn games(&self) -> &GameStore {
        &self.games
    }

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    /// Applies one inbound event from `conn` and returns what to send.
    pub fn handle(&mut self, conn: &ConnId, envelope: ClientEnvelope) -> Vec<Dispatch> {
        let mut out = Vec::new();
        let name = envelope.event.name();

        let accepted = match envelope.event {
            ClientEvent::Create { room_code } => self.create(conn, &room_code, &mut out),
            ClientEvent::Join { room_code } => self.join(conn, &room_code, &mut out),
            ClientEvent::Start { room_code } => self.start(conn, &room_code, &mut out),
            ClientEvent::PickTile { room_code, tile_id } => {
                self.pick_tile(conn, &room_code, tile_id, &mut out)
            }
            ClientEvent::Vote { room_code, voted } => {
                self.vote(conn, &room_code, &voted, &mut out)
            }
            ClientEvent::FinalChoice { room_code, choice } => {
                self.final_choice(conn, &room_code, choice, &mut out)
            }
            ClientEvent::Chat { room_code, text } => self.chat(conn, &room_code, &text, &mut out),
        };

        match (accepted, envelope.ack) {
            (true, Some(id)) => out.push(Dispatch::direct(conn, ServerEvent::Ack { id })),
            (false, _) => debug!("{} from {} was not applied", name, conn),
            _ => {}
        }
        out
    }

    fn create(&mut self, conn: &ConnId, room: &RoomCode, out: &mut Vec<Dispatch>) -> bool {
        let occupied = self.lobbies.get(room).map_or(false, |lobby| !lobby.is_empty());
        let running = self
            .games
            .get(room)
            .map_or(false, |game| game.phase() != Phase::Over);
        if occupied || running {
            debug!("Room {} is taken, refusing create from {}", room, conn);
            out.push(Dispatch::direct(
                conn,
                ServerEvent::RoomTaken {
                    room_code: room.clone(),
                },
            ));
            return false;
        }

        // A finished game left over from an earlier session would shadow the new lobby.
        self.games.remove(room);
        let update = lobby_update(self.lobbies.create(room.clone(), conn.clone()));
        out.push(Dispatch::subscribe(conn, room));
        out.push(Dispatch::room(room, update));
        true
    }

    fn join(&mut self, conn: &ConnId, room: &RoomCode, out: &mut Vec<Dispatch>) -> bool {
        if let Some(game) = self.games.get_mut(room) {
            if !game.is_active(conn) {
                debug!("{} cannot join room {}: game already running", conn, room);
                out.push(Dispatch::direct(conn, ServerEvent::GameNotFound));
                return false;
            }
            if game.mark_present(conn) {
                info!("{} is back in room {}", conn, room);
            }
        }

        let lobby = self.lobbies.ensure(room);
        if lobby.add(conn.clone()) {
            info!("{} joined room {}", conn, room);
        }
        let update = lobby_update(lobby);
        out.push(Dispatch::subscribe(conn, room));
        out.push(Dispatch::room(room, update));

        if let Some(game) = self.games.get(room) {
            out.push(Dispatch::room(room, ServerEvent::GameInit(game.snapshot())));
        }
        true
    }

    fn start(&mut self, conn: &ConnId, room: &RoomCode, out: &mut Vec<Dispatch>) -> bool {
        let Some(lobby) = self.lobbies.get(room) else {
            debug!("Start for unknown room {} from {}", room, conn);
            return false;
        };
        if !lobby.is_host(conn) {
            debug!("{} is not the host of room {}", conn, room);
            return false;
        }
        if lobby.len() < self.config.min_players {
            out.push(Dispatch::direct(
                conn,
                ServerEvent::NotEnoughPlayers {
                    message: format!(
                        "Need at least {} players to start.",
                        self.config.min_players
                    ),
                },
            ));
            return false;
        }
        if let Some(game) = self.games.get(room) {
            if game.phase() != Phase::Over {
                debug!("Room {} already has a game in progress", room);
                return false;
            }
        }

        let Some(game) = Game::start(room.clone(), lobby.members().to_vec(), &mut self.rng) else {
            return false;
        };
        let snapshot = self.games.insert(game).snapshot();
        out.push(Dispatch::room(room, ServerEvent::GameInit(snapshot)));
        true
    }

    fn pick_tile(
        &mut self,
        conn: &ConnId,
        room: &RoomCode,
        tile_id: u32,
        out: &mut Vec<Dispatch>,
    ) -> bool {
        let Some(game) = self.games.get_mut(room) else {
            debug!("Pick in room {} without a game", room);
            return false;
        };

        let enforce = self.config.enforce_turn_order;
        let reveal = match game.reveal_tile(tile_id, conn, enforce, &mut self.rng) {
            Ok(reveal) => reveal,
            Err(reason) => {
                debug!(
                    "Room {}: pick of tile {} by {} ignored: {}",
                    room, tile_id, conn, reason
                );
                return false;
            }
        };

        out.push(Dispatch::room(
            room,
            ServerEvent::TileRevealed {
                tile_id: reveal.tile_id,
                kind: reveal.kind,
                revealed_by: reveal.revealed_by,
                pot: reveal.pot,
                current_player_id: reveal.current_player,
                turns: reveal.turns,
            },
        ));

        let players = game.players().to_vec();
        match reveal.entered {
            Some(Phase::Vote) => out.push(Dispatch::room(
                room,
                ServerEvent::VoteStart {
                    pot: reveal.pot,
                    players,
                },
            )),
            Some(Phase::Final) => out.push(Dispatch::room(
                room,
                ServerEvent::FinalStart {
                    pot: reveal.pot,
                    players,
                },
            )),
            _ => {}
        }
        true
    }

    fn vote(
        &mut self,
        conn: &ConnId,
        room: &RoomCode,
        voted: &ConnId,
        out: &mut Vec<Dispatch>,
    ) -> bool {
        let Some(game) = self.games.get_mut(room) else {
            debug!("Vote in room {} without a game", room);
            return false;
        };

        match game.submit_vote(conn, voted, &mut self.rng) {
            Ok(VoteProgress::Pending { cast, needed }) => {
                debug!("Room {}: {}/{} votes in", room, cast, needed);
                true
            }
            Ok(VoteProgress::Resolved(elimination)) => {
                push_elimination(room, elimination, game.pot(), out);
                true
            }
            Err(reason) => {
                debug!("Room {}: vote by {} ignored: {}", room, conn, reason);
                false
            }
        }
    }

    fn final_choice(
        &mut self,
        conn: &ConnId,
        room: &RoomCode,
        choice: Choice,
        out: &mut Vec<Dispatch>,
    ) -> bool {
        let Some(game) = self.games.get_mut(room) else {
            debug!("Final choice in room {} without a game", room);
            return false;
        };

        match game.submit_choice(conn, choice) {
            Ok(None) => true,
            Ok(Some(outcome)) => {
                push_outcome(room, game.pot(), outcome, out);
                true
            }
            Err(reason) => {
                debug!("Room {}: choice by {} ignored: {}", room, conn, reason);
                false
            }
        }
    }

    fn chat(&mut self, conn: &ConnId, room: &RoomCode, text: &str, out: &mut Vec<Dispatch>) -> bool {
        let text = text.trim();
        if text.is_empty() {
            return false;
        }
        if !self.lobbies.get(room).map_or(false, |lobby| lobby.contains(conn)) {
            debug!("{} is not in room {}, dropping chat", conn, room);
            return false;
        }

        out.push(Dispatch::room(room, chat_message(conn.as_str(), text)));
        true
    }

    /// Removes a closed connection from every lobby and game it took part in.
    pub fn disconnect(&mut self, conn: &ConnId) -> Vec<Dispatch> {
        let mut out = Vec::new();

        for room in self.lobbies.remove_member(conn) {
            let remaining = self
                .lobbies
                .get(&room)
                .filter(|lobby| !lobby.is_empty())
                .map(lobby_update);
            let Some(update) = remaining else {
                self.lobbies.remove(&room);
                if self.games.remove(&room).is_some() {
                    info!("Room {} is empty, discarding its game", room);
                } else {
                    info!("Room {} is empty, closing lobby", room);
                }
                continue;
            };

            info!("{} left room {}", conn, room);
            out.push(Dispatch::room(&room, update));
            self.player_left(conn, &room, &mut out);
        }
        out
    }

    fn player_left(&mut self, conn: &ConnId, room: &RoomCode, out: &mut Vec<Dispatch>) {
        let Some(game) = self.games.get_mut(room) else {
            return;
        };

        if !self.config.forfeit_on_disconnect {
            if let Some(next) = game.mark_away(conn) {
                out.push(Dispatch::room(
                    room,
                    ServerEvent::GameUpdate {
                        current_player_id: next,
                        pot: game.pot(),
                    },
                ));
            }
            return;
        }

        let Some(forfeit) = game.forfeit(conn, &mut self.rng) else {
            return;
        };
        out.push(Dispatch::room(
            room,
            ServerEvent::PlayerEliminated {
                eliminated: forfeit.eliminated,
                players: forfeit.players,
                eliminated_list: forfeit.eliminated_list,
            },
        ));
        if let Some(next) = forfeit.turn_moved_to {
            out.push(Dispatch::room(
                room,
                ServerEvent::GameUpdate {
                    current_player_id: next,
                    pot: game.pot(),
                },
            ));
        }

        match forfeit.after {
            AfterForfeit::Continue => {}
            AfterForfeit::FinalStart => out.push(Dispatch::room(
                room,
                ServerEvent::FinalStart {
                    pot: game.pot(),
                    players: game.players().to_vec(),
                },
            )),
            AfterForfeit::VoteResolved(elimination) => {
                push_elimination(room, elimination, game.pot(), out)
            }
            AfterForfeit::Walkover(outcome) => push_outcome(room, game.pot(), outcome, out),
        }
    }

    /// Drops finished games whose grace period has run out.
    pub fn sweep_finished(&mut self, now: Instant) -> Vec<RoomCode> {
        let expired = self
            .games
            .sweep_finished(now, self.config.finished_game_ttl);
        for room in &expired {
            info!("Finished game in room {} removed", room);
        }
        expired
    }
}

fn lobby_update(lobby: &Lobby) -> ServerEvent {
    ServerEvent::LobbyUpdate {
        players: lobby.members().to_vec(),
        host: lobby.host().cloned(),
    }
}

fn push_elimination(room: &RoomCode, elimination: Elimination, pot: i64, out: &mut Vec<Dispatch>) {
    let players = elimination.players.clone();
    out.push(Dispatch::room(
        room,
        ServerEvent::PlayerEliminated {
            eliminated: elimination.eliminated,
            players: elimination.players,
            eliminated_list: elimination.eliminated_list,
        },
    ));

    let next = if elimination.next == Phase::Final {
        ServerEvent::FinalStart { pot, players }
    } else {
        ServerEvent::VotingNext { players }
    };
    out.push(Dispatch::room(room, next));
}

fn push_outcome(room: &RoomCode, pot: i64, outcome: FinalOutcome, out: &mut Vec<Dispatch>) {
    out.push(Dispatch::room(
        room,
        ServerEvent::GameOver {
            pot,
            result: outcome.clone(),
        },
    ));
    out.push(Dispatch::room(room, chat_message(SERVER_AUTHOR, &outcome.message)));
    out.push(Dispatch::room(
        room,
        ServerEvent::FinalResult {
            pot,
            message: outcome.message,
            winners: outcome.winners,
            payout: outcome.payout,
        },
    ));
}

fn chat_message(author: &str, text: &str) -> ServerEvent {
    let now = Utc::now();
    ServerEvent::ChatMessage {
        id: now.timestamp_millis().max(0) as u64,
        author: author.to_string(),
        text: text.to_string(),
        time: now.to_rfc3339_opts(SecondsFormat::Millis, true),
    }
}
