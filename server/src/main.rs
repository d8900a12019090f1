use clap::Parser;
use log::{error, info};
use server::config::{RoomConfig, ServerConfig};
use server::network::Server;
use std::time::Duration;

/// Main-method of the application.
/// Parses command-line arguments, then runs the room server until it stops or Ctrl+C arrives.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value = "4000")]
        port: u16,
        /// Maximum number of concurrent connections
        #[clap(long, default_value = "256")]
        max_connections: usize,
        /// Minimum lobby size for the host to start a game
        #[clap(long, default_value = "2")]
        min_players: usize,
        /// Only accept tile picks from the player whose turn it is
        #[clap(long)]
        enforce_turn_order: bool,
        /// Eliminate players who disconnect during a game
        #[clap(long)]
        forfeit_on_disconnect: bool,
        /// Seconds a finished game is kept before it is removed
        #[clap(long, default_value = "60")]
        finished_game_ttl: u64,
        /// Seconds between sweeps for finished games
        #[clap(long, default_value = "5")]
        sweep_interval: u64,
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Parse command line arguments
    let args = Args::parse();

    let config = ServerConfig {
        bind_addr: format!("{}:{}", args.host, args.port),
        max_connections: args.max_connections,
        sweep_interval: Duration::from_secs(args.sweep_interval.max(1)),
        rooms: RoomConfig {
            min_players: args.min_players.max(2),
            enforce_turn_order: args.enforce_turn_order,
            forfeit_on_disconnect: args.forfeit_on_disconnect,
            finished_game_ttl: Duration::from_secs(args.finished_game_ttl),
        },
    };

    let mut server = Server::bind(config).await?;
    let handle = server.handle();

    // Spawn server loop
    let server_task = tokio::spawn(async move { server.run().await });

    // Handle shutdown gracefully
    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server stopped with error: {}", e),
                Err(e) => error!("Server task panicked: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
            handle.shutdown();
        }
    }

    Ok(())
}
