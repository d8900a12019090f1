use std::time::Duration;

/// Game rules applied by the room coordinator.
#[derive(Debug, Clone)]
pub struct RoomConfig {
    /// Minimum lobby size for the host to start a game
    pub min_players: usize,
    /// Ignore picks from anyone but the current turn holder
    pub enforce_turn_order: bool,
    /// Eliminate active players who disconnect mid-game
    pub forfeit_on_disconnect: bool,
    /// How long a finished game stays in the store before the sweep drops it
    pub finished_game_ttl: Duration,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            min_players: 2,
            enforce_turn_order: false,
            forfeit_on_disconnect: false,
            finished_game_ttl: Duration::from_secs(60),
        }
    }
}

/// Network-level settings for the WebSocket server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub max_connections: usize,
    pub sweep_interval: Duration,
    pub rooms: RoomConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:4000".to_string(),
            max_connections: 256,
            sweep_interval: Duration::from_secs(5),
            rooms: RoomConfig::default(),
        }
    }
}
