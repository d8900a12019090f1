//! Authoritative per-room game state
//!
//! A [`Game`] is created from a lobby snapshot when the host starts and then
//! moves strictly forward through `tiles -> vote -> final -> over` (the vote
//! phase may repeat once per elimination round, and a two-player game skips it
//! entirely). Every mutating method either applies the whole action and
//! reports what changed, or rejects it and leaves the state untouched.
//!
//! The [`GameStore`] owns all running games keyed by room code and drops
//! finished ones once their grace period has elapsed.

use crate::rng::RandomSource;
use log::info;
use shared::{
    Choice, ConnId, FinalOutcome, GameSnapshot, Phase, RoomCode, Tile, TileType, TILES_PER_PLAYER,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Why an action was not applied. These never reach the client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejected {
    #[error("not allowed during the {0:?} phase")]
    WrongPhase(Phase),
    #[error("tile {0} does not exist")]
    UnknownTile(u32),
    #[error("tile {0} is already revealed")]
    AlreadyRevealed(u32),
    #[error("{0} is not an active player")]
    NotActive(ConnId),
    #[error("it is {0}'s turn")]
    NotYourTurn(ConnId),
}

/// Result of an accepted tile pick.
#[derive(Debug, Clone, PartialEq)]
pub struct Reveal {
    pub tile_id: u32,
    pub kind: TileType,
    pub revealed_by: ConnId,
    pub pot: i64,
    pub current_player: ConnId,
    pub turns: u32,
    /// Phase entered because this pick uncovered the last tile
    pub entered: Option<Phase>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Elimination {
    pub eliminated: ConnId,
    pub players: Vec<ConnId>,
    pub eliminated_list: Vec<ConnId>,
    /// `Vote` when another round is needed, `Final` once two players remain
    pub next: Phase,
}

#[derive(Debug, Clone, PartialEq)]
pub enum VoteProgress {
    Pending { cast: usize, needed: usize },
    Resolved(Elimination),
}

/// What a mid-game departure triggered beyond the elimination itself.
#[derive(Debug, Clone, PartialEq)]
pub enum AfterForfeit {
    Continue,
    FinalStart,
    VoteResolved(Elimination),
    Walkover(FinalOutcome),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Forfeit {
    pub eliminated: ConnId,
    pub players: Vec<ConnId>,
    pub eliminated_list: Vec<ConnId>,
    /// New turn holder, only reported while tiles are still being picked
    pub turn_moved_to: Option<ConnId>,
    pub after: AfterForfeit,
}

#[derive(Debug, Clone)]
pub struct Game {
    room_code: RoomCode,
    players: Vec<ConnId>,
    eliminated: Vec<ConnId>,
    host: ConnId,
    pot: i64,
    tiles: Vec<Tile>,
    current_player: ConnId,
    turns: u32,
    phase: Phase,
    votes: HashMap<ConnId, ConnId>,
    final_choices: HashMap<ConnId, Choice>,
    /// Active players whose connection left; the turn passes over them
    away: HashSet<ConnId>,
    finished_at: Option<Instant>,
}

impl Game {
    /// Builds a fresh game from the lobby members. Returns None for an empty
    /// roster or one too large to number its tiles.
    pub fn start<R: RandomSource>(
        room_code: RoomCode,
        players: Vec<ConnId>,
        rng: &mut R,
    ) -> Option<Self> {
        let host = players.first()?.clone();
        let tile_count = u32::try_from(players.len() * TILES_PER_PLAYER).ok()?;
        let tiles = (1..=tile_count).map(Tile::concealed).collect();
        let current_player = players[rng.index(players.len())].clone();

        info!(
            "Game started in room {} with {} players and {} tiles, {} goes first",
            room_code,
            players.len(),
            tile_count,
            current_player
        );

        Some(Self {
            room_code,
            players,
            eliminated: Vec::new(),
            host,
            pot: 0,
            tiles,
            current_player,
            turns: 0,
            phase: Phase::Tiles,
            votes: HashMap::new(),
            final_choices: HashMap::new(),
            away: HashSet::new(),
            finished_at: None,
        })
    }

    pub fn room_code(&self) -> &RoomCode {
        &self.room_code
    }

    pub fn players(&self) -> &[ConnId] {
        &self.players
    }

    pub fn eliminated(&self) -> &[ConnId] {
        &self.eliminated
    }

    pub fn host(&self) -> &ConnId {
        &self.host
    }

    pub fn pot(&self) -> i64 {
        self.pot
    }

    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    pub fn current_player(&self) -> &ConnId {
        &self.current_player
    }

    pub fn turns(&self) -> u32 {
        self.turns
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn votes_cast(&self) -> usize {
        self.votes.len()
    }

    pub fn finished_at(&self) -> Option<Instant> {
        self.finished_at
    }

    pub fn is_active(&self, conn: &ConnId) -> bool {
        self.players.contains(conn)
    }

    pub fn is_away(&self, conn: &ConnId) -> bool {
        self.away.contains(conn)
    }

    fn position_of(&self, conn: &ConnId) -> Option<usize> {
        self.players.iter().position(|player| player == conn)
    }

    /// First active player at or after `start` (wrapping) who is still
    /// connected. Falls back to the player at `start` when everyone is away.
    fn next_present_from(&self, start: usize) -> ConnId {
        let count = self.players.len();
        (0..count)
            .map(|offset| &self.players[(start + offset) % count])
            .find(|player| !self.away.contains(*player))
            .unwrap_or_else(|| &self.players[start % count])
            .clone()
    }

    fn enter(&mut self, phase: Phase) {
        info!("Room {} entering {:?} phase", self.room_code, phase);
        self.phase = phase;
        if phase == Phase::Over {
            self.finished_at = Some(Instant::now());
        }
    }

    /// Reveals a concealed tile on behalf of `by` and hands the turn to the
    /// next connected player after them. A pick from outside the roster hands
    /// the turn to the first connected player.
    pub fn reveal_tile<R: RandomSource>(
        &mut self,
        tile_id: u32,
        by: &ConnId,
        enforce_turn_order: bool,
        rng: &mut R,
    ) -> Result<Reveal, Rejected> {
        if self.phase != Phase::Tiles {
            return Err(Rejected::WrongPhase(self.phase));
        }
        if enforce_turn_order && &self.current_player != by {
            return Err(Rejected::NotYourTurn(self.current_player.clone()));
        }

        let tile = self
            .tiles
            .iter_mut()
            .find(|tile| tile.id == tile_id)
            .ok_or(Rejected::UnknownTile(tile_id))?;
        if tile.revealed {
            return Err(Rejected::AlreadyRevealed(tile_id));
        }

        let kind = rng.tile_type();
        tile.kind = kind;
        tile.revealed = true;
        tile.revealed_by = Some(by.clone());

        self.pot += kind.pot_delta();
        self.turns += 1;
        let start = self.position_of(by).map_or(0, |position| position + 1);
        self.current_player = self.next_present_from(start);

        let entered = if self.tiles.iter().all(|tile| tile.revealed) {
            let next = if self.players.len() > 2 {
                Phase::Vote
            } else {
                Phase::Final
            };
            self.enter(next);
            Some(next)
        } else {
            None
        };

        Ok(Reveal {
            tile_id,
            kind,
            revealed_by: by.clone(),
            pot: self.pot,
            current_player: self.current_player.clone(),
            turns: self.turns,
            entered,
        })
    }

    /// Records `voter`'s latest vote and resolves the round once every active
    /// player has voted.
    pub fn submit_vote<R: RandomSource>(
        &mut self,
        voter: &ConnId,
        target: &ConnId,
        rng: &mut R,
    ) -> Result<VoteProgress, Rejected> {
        if self.phase != Phase::Vote {
            return Err(Rejected::WrongPhase(self.phase));
        }
        if !self.is_active(voter) {
            return Err(Rejected::NotActive(voter.clone()));
        }
        if !self.is_active(target) {
            return Err(Rejected::NotActive(target.clone()));
        }

        self.votes.insert(voter.clone(), target.clone());

        let needed = self.players.len();
        if self.votes.len() < needed {
            return Ok(VoteProgress::Pending {
                cast: self.votes.len(),
                needed,
            });
        }

        Ok(match self.resolve_votes(rng) {
            Some(elimination) => VoteProgress::Resolved(elimination),
            None => VoteProgress::Pending {
                cast: self.votes.len(),
                needed,
            },
        })
    }

    /// Targets sharing the highest tally, in a stable order.
    pub fn leading_candidates(&self) -> Vec<ConnId> {
        let mut tally: BTreeMap<&ConnId, usize> = BTreeMap::new();
        for target in self.votes.values() {
            *tally.entry(target).or_insert(0) += 1;
        }

        let max = tally.values().copied().max().unwrap_or(0);
        tally
            .into_iter()
            .filter(|(_, count)| *count == max)
            .map(|(target, _)| target.clone())
            .collect()
    }

    fn resolve_votes<R: RandomSource>(&mut self, rng: &mut R) -> Option<Elimination> {
        let candidates = self.leading_candidates();
        if candidates.is_empty() {
            return None;
        }
        let eliminated = candidates[rng.index(candidates.len())].clone();

        self.votes.clear();
        self.eliminate(&eliminated);
        info!(
            "Room {}: {} voted out, {} players remain",
            self.room_code,
            eliminated,
            self.players.len()
        );

        let next = if self.players.len() <= 2 {
            self.enter(Phase::Final);
            Phase::Final
        } else {
            Phase::Vote
        };

        Some(Elimination {
            eliminated,
            players: self.players.clone(),
            eliminated_list: self.eliminated.clone(),
            next,
        })
    }

    /// Moves `conn` from the active roster to the eliminated list. Returns the
    /// new turn holder if `conn` held the turn.
    fn eliminate(&mut self, conn: &ConnId) -> Option<ConnId> {
        let position = self.position_of(conn)?;
        self.players.remove(position);
        self.eliminated.push(conn.clone());
        self.votes.remove(conn);
        self.votes.retain(|_, target| target != conn);
        self.final_choices.remove(conn);
        self.away.remove(conn);

        if &self.current_player == conn && !self.players.is_empty() {
            self.current_player = self.next_present_from(position);
            return Some(self.current_player.clone());
        }
        None
    }

    /// Stores a finalist's split/steal choice. Returns the outcome once both
    /// finalists have chosen.
    pub fn submit_choice(
        &mut self,
        player: &ConnId,
        choice: Choice,
    ) -> Result<Option<FinalOutcome>, Rejected> {
        if self.phase != Phase::Final {
            return Err(Rejected::WrongPhase(self.phase));
        }
        if !self.is_active(player) {
            return Err(Rejected::NotActive(player.clone()));
        }

        self.final_choices.insert(player.clone(), choice);
        if self.final_choices.len() < 2 {
            return Ok(None);
        }

        let outcome = self.resolve_final();
        info!(
            "Room {} finished: {} (payout {})",
            self.room_code, outcome.message, outcome.payout
        );
        Ok(Some(outcome))
    }

    fn resolve_final(&mut self) -> FinalOutcome {
        let picks: Vec<(ConnId, Choice)> = self
            .players
            .iter()
            .filter_map(|player| {
                self.final_choices
                    .get(player)
                    .map(|choice| (player.clone(), *choice))
            })
            .collect();

        let outcome = match picks.as_slice() {
            [(first, Choice::Split), (second, Choice::Split)] => FinalOutcome {
                message: "Both players split the pot!".to_string(),
                winners: vec![first.clone(), second.clone()],
                payout: self.pot / 2,
            },
            [(stealer, Choice::Steal), (_, Choice::Split)]
            | [(_, Choice::Split), (stealer, Choice::Steal)] => FinalOutcome {
                message: format!("{} stole the pot!", stealer),
                winners: vec![stealer.clone()],
                payout: self.pot,
            },
            _ => FinalOutcome {
                message: "Both players tried to steal. Nobody wins!".to_string(),
                winners: Vec::new(),
                payout: 0,
            },
        };

        self.enter(Phase::Over);
        outcome
    }

    /// Keeps a departed player's seat but passes the turn over them from now
    /// on. Returns the new turn holder if `conn` held the turn.
    pub fn mark_away(&mut self, conn: &ConnId) -> Option<ConnId> {
        let position = self.position_of(conn)?;
        self.away.insert(conn.clone());
        if self.phase != Phase::Tiles || &self.current_player != conn || self.players.len() < 2 {
            return None;
        }
        let next = self.next_present_from(position + 1);
        if &next == conn {
            return None;
        }
        self.current_player = next;
        Some(self.current_player.clone())
    }

    /// Seats a returning player again. Returns true if they had been away.
    pub fn mark_present(&mut self, conn: &ConnId) -> bool {
        self.away.remove(conn)
    }

    /// Eliminates an active player who left mid-game and settles whatever
    /// their absence unblocks.
    pub fn forfeit<R: RandomSource>(&mut self, conn: &ConnId, rng: &mut R) -> Option<Forfeit> {
        if self.phase == Phase::Over || !self.is_active(conn) {
            return None;
        }

        let turn_moved_to = self.eliminate(conn).filter(|_| self.phase == Phase::Tiles);
        let players = self.players.clone();
        let eliminated_list = self.eliminated.clone();
        info!("Room {}: {} forfeited", self.room_code, conn);

        let after = if self.players.len() < 2 {
            AfterForfeit::Walkover(self.walkover())
        } else {
            match self.phase {
                Phase::Vote if self.players.len() == 2 => {
                    self.votes.clear();
                    self.enter(Phase::Final);
                    AfterForfeit::FinalStart
                }
                Phase::Vote if !self.votes.is_empty() && self.votes.len() == self.players.len() => {
                    self.resolve_votes(rng)
                        .map_or(AfterForfeit::Continue, AfterForfeit::VoteResolved)
                }
                _ => AfterForfeit::Continue,
            }
        };

        Some(Forfeit {
            eliminated: conn.clone(),
            players,
            eliminated_list,
            turn_moved_to,
            after,
        })
    }

    fn walkover(&mut self) -> FinalOutcome {
        let outcome = match self.players.first() {
            Some(winner) => FinalOutcome {
                message: format!("{} wins by default!", winner),
                winners: vec![winner.clone()],
                payout: self.pot,
            },
            None => FinalOutcome {
                message: "Nobody is left. Nobody wins!".to_string(),
                winners: Vec::new(),
                payout: 0,
            },
        };
        self.enter(Phase::Over);
        outcome
    }

    pub fn snapshot(&self) -> GameSnapshot {
        GameSnapshot {
            room_code: self.room_code.clone(),
            players: self.players.clone(),
            eliminated: self.eliminated.clone(),
            host: self.host.clone(),
            pot: self.pot,
            tiles: self.tiles.clone(),
            current_player_id: self.current_player.clone(),
            turns: self.turns,
            phase: self.phase,
        }
    }
}

/// All games in the process, keyed by room code.
#[derive(Debug, Default)]
pub struct GameStore {
    games: HashMap<RoomCode, Game>,
}

impl GameStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, room: &RoomCode) -> Option<&Game> {
        self.games.get(room)
    }

    pub fn get_mut(&mut self, room: &RoomCode) -> Option<&mut Game> {
        self.games.get_mut(room)
    }

    /// Stores `game` under its room code, replacing any previous game.
    pub fn insert(&mut self, game: Game) -> &Game {
        let room = game.room_code().clone();
        self.games.insert(room.clone(), game);
        &self.games[&room]
    }

    pub fn remove(&mut self, room: &RoomCode) -> Option<Game> {
        self.games.remove(room)
    }

    /// Drops games that finished at least `ttl` before `now`.
    pub fn sweep_finished(&mut self, now: Instant, ttl: Duration) -> Vec<RoomCode> {
        let mut expired: Vec<RoomCode> = self
            .games
            .iter()
            .filter(|(_, game)| {
                game.finished_at()
                    .map_or(false, |at| now.saturating_duration_since(at) >= ttl)
            })
            .map(|(room, _)| room.clone())
            .collect();
        expired.sort();

        for room in &expired {
            self.games.remove(room);
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.games.len()
    }

    pub fn is_empty(&self) -> bool {
        self.games.is_empty()
    }
}
