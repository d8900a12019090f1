//! Server network layer handling WebSocket sessions and the room event loop

use crate::config::ServerConfig;
use crate::coordinator::RoomCoordinator;
use crate::gateway::{deliver, Dispatch};
use crate::registry::ConnectionRegistry;
use crate::rng::{RandomSource, SystemRng};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use shared::{ClientEnvelope, ConnId, ServerEvent};
use std::error::Error;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

pub type ServerResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

/// Messages sent from connection tasks to the main server loop
#[derive(Debug)]
pub enum ServerMessage {
    Connected {
        conn: ConnId,
        addr: SocketAddr,
        sender: mpsc::UnboundedSender<Message>,
    },
    FrameReceived {
        conn: ConnId,
        text: String,
    },
    Disconnected {
        conn: ConnId,
    },
    Shutdown,
}

/// Cloneable handle for stopping a running server from another task
#[derive(Debug, Clone)]
pub struct ServerHandle {
    server_tx: mpsc::UnboundedSender<ServerMessage>,
}

impl ServerHandle {
    pub fn shutdown(&self) {
        if self.server_tx.send(ServerMessage::Shutdown).is_err() {
            debug!("Server loop already stopped");
        }
    }
}

/// Main server owning the listener, the connection registry and all rooms
pub struct Server<R: RandomSource = SystemRng> {
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    registry: ConnectionRegistry,
    coordinator: RoomCoordinator<R>,
    sweep_interval: Duration,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl Server<SystemRng> {
    pub async fn bind(config: ServerConfig) -> ServerResult<Self> {
        Self::bind_with_rng(config, SystemRng).await
    }
}

impl<R: RandomSource> Server<R> {
    pub async fn bind_with_rng(config: ServerConfig, rng: R) -> ServerResult<Self> {
        let listener = TcpListener::bind(&config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        info!("Server listening on ws://{}", local_addr);

        let (server_tx, server_rx) = mpsc::unbounded_channel();

        Ok(Server {
            listener: Some(listener),
            local_addr,
            registry: ConnectionRegistry::new(config.max_connections),
            coordinator: RoomCoordinator::new(config.rooms, rng),
            sweep_interval: config.sweep_interval,
            server_tx,
            server_rx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            server_tx: self.server_tx.clone(),
        }
    }

    /// Spawns task that accepts TCP connections and upgrades them to WebSocket sessions
    fn spawn_acceptor(&mut self) {
        let Some(listener) = self.listener.take() else {
            return;
        };
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        tokio::spawn(handle_connection(stream, addr, server_tx.clone()));
                    }
                    Err(e) => {
                        error!("Error accepting connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
                if server_tx.is_closed() {
                    break;
                }
            }
        });
    }

    fn on_connected(
        &mut self,
        conn: ConnId,
        addr: SocketAddr,
        sender: mpsc::UnboundedSender<Message>,
    ) {
        if !self
            .registry
            .add_connection(conn.clone(), addr, sender.clone())
        {
            let _ = sender.send(Message::Close(None));
            return;
        }

        deliver(
            &mut self.registry,
            vec![Dispatch::direct(
                &conn,
                ServerEvent::Welcome {
                    connection_id: conn.clone(),
                },
            )],
        );
    }

    /// Decodes one text frame and applies it to the rooms
    fn on_frame(&mut self, conn: ConnId, text: &str) {
        if !self.registry.contains(&conn) {
            return;
        }

        let dispatches = match ClientEnvelope::decode(text) {
            Ok(envelope) => {
                debug!("{} -> {}", conn, envelope.event.name());
                self.coordinator.handle(&conn, envelope)
            }
            Err(e) => {
                warn!("Failed to decode frame from {}: {}", conn, e);
                vec![Dispatch::direct(
                    &conn,
                    ServerEvent::Error {
                        message: e.to_string(),
                    },
                )]
            }
        };
        deliver(&mut self.registry, dispatches);
    }

    fn on_disconnected(&mut self, conn: &ConnId) {
        if self.registry.remove_connection(conn).is_none() {
            return;
        }
        let dispatches = self.coordinator.disconnect(conn);
        deliver(&mut self.registry, dispatches);
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> ServerResult<()> {
        self.spawn_acceptor();

        let mut sweep_interval = interval(self.sweep_interval);
        sweep_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Server started successfully");

        loop {
            tokio::select! {
                // Handle connection events
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::Connected { conn, addr, sender }) => {
                            self.on_connected(conn, addr, sender);
                        },
                        Some(ServerMessage::FrameReceived { conn, text }) => {
                            self.on_frame(conn, &text);
                        },
                        Some(ServerMessage::Disconnected { conn }) => {
                            self.on_disconnected(&conn);
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                // Drop finished games past their grace period
                _ = sweep_interval.tick() => {
                    let removed = self.coordinator.sweep_finished(Instant::now());
                    if !removed.is_empty() || !self.registry.is_empty() {
                        debug!(
                            "{} connections, {} lobbies, {} games ({} swept)",
                            self.registry.len(),
                            self.coordinator.lobbies().len(),
                            self.coordinator.games().len(),
                            removed.len()
                        );
                    }
                },
            }
        }

        Ok(())
    }
}

/// Runs one WebSocket session: a writer task draining the outbound queue and
/// a reader loop forwarding text frames to the server loop.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    server_tx: mpsc::UnboundedSender<ServerMessage>,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws_stream) => ws_stream,
        Err(e) => {
            warn!("WebSocket handshake with {} failed: {}", addr, e);
            return;
        }
    };

    let conn = ConnId::new(Uuid::new_v4().to_string());
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    if server_tx
        .send(ServerMessage::Connected {
            conn: conn.clone(),
            addr,
            sender: tx.clone(),
        })
        .is_err()
    {
        return;
    }

    let mut send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if let Err(e) = ws_sender.send(message).await {
                debug!("Write to {} failed: {}", addr, e);
                break;
            }
            if closing {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            frame = ws_receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if server_tx.send(ServerMessage::FrameReceived { conn: conn.clone(), text }).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    let _ = tx.send(Message::Pong(payload));
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!("WebSocket error on {}: {}", conn, e);
                    break;
                }
            },
            _ = &mut send_task => break,
        }
    }

    send_task.abort();
    let _ = server_tx.send(ServerMessage::Disconnected { conn });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::SeededRng;
    use shared::RoomCode;
    use std::net::{IpAddr, Ipv4Addr};

    fn test_addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 8080)
    }

    async fn create_test_server() -> Server<SeededRng> {
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            ..ServerConfig::default()
        };
        Server::bind_with_rng(config, SeededRng::from_seed(1))
            .await
            .unwrap()
    }

    fn next_event(rx: &mut mpsc::UnboundedReceiver<Message>) -> ServerEvent {
        match rx.try_recv().unwrap() {
            Message::Text(text) => ServerEvent::decode(&text).unwrap(),
            other => panic!("Unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_server_message_creation() {
        let (sender, _rx) = mpsc::unbounded_channel();
        let msg = ServerMessage::Connected {
            conn: "c1".into(),
            addr: test_addr(),
            sender,
        };

        match msg {
            ServerMessage::Connected { conn, addr, .. } => {
                assert_eq!(conn, ConnId::from("c1"));
                assert_eq!(addr, test_addr());
            }
            _ => panic!("Unexpected message type"),
        }
    }

    #[tokio::test]
    async fn test_bind_reports_ephemeral_port() {
        let server = create_test_server().await;
        assert_ne!(server.local_addr().port(), 0);
    }

    #[tokio::test]
    async fn test_connected_client_gets_welcome() {
        let mut server = create_test_server().await;
        let (sender, mut rx) = mpsc::unbounded_channel();

        server.on_connected("c1".into(), test_addr(), sender);

        assert_eq!(
            next_event(&mut rx),
            ServerEvent::Welcome {
                connection_id: "c1".into()
            }
        );
    }

    #[tokio::test]
    async fn test_connection_over_capacity_is_closed() {
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            max_connections: 1,
            ..ServerConfig::default()
        };
        let mut server = Server::bind_with_rng(config, SeededRng::from_seed(1))
            .await
            .unwrap();
        let (first, _first_rx) = mpsc::unbounded_channel();
        let (second, mut second_rx) = mpsc::unbounded_channel();

        server.on_connected("c1".into(), test_addr(), first);
        server.on_connected("c2".into(), test_addr(), second);

        assert!(matches!(second_rx.try_recv(), Ok(Message::Close(None))));
        assert_eq!(server.registry.len(), 1);
    }

    #[tokio::test]
    async fn test_bad_frame_gets_error_reply() {
        let mut server = create_test_server().await;
        let (sender, mut rx) = mpsc::unbounded_channel();
        server.on_connected("c1".into(), test_addr(), sender);
        next_event(&mut rx);

        server.on_frame("c1".into(), r#"{"event":"dance","data":{}}"#);

        match next_event(&mut rx) {
            ServerEvent::Error { message } => assert!(message.contains("dance")),
            other => panic!("Unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_frames_route_through_rooms() {
        let mut server = create_test_server().await;
        let (host_tx, mut host_rx) = mpsc::unbounded_channel();
        let (guest_tx, mut guest_rx) = mpsc::unbounded_channel();
        server.on_connected("host".into(), test_addr(), host_tx);
        server.on_connected("guest".into(), test_addr(), guest_tx);
        next_event(&mut host_rx);
        next_event(&mut guest_rx);

        server.on_frame(
            "host".into(),
            r#"{"event":"game:create","data":{"roomCode":"ABCD"},"ack":1}"#,
        );
        server.on_frame("guest".into(), r#"{"event":"game:join","data":"ABCD"}"#);

        assert!(matches!(next_event(&mut host_rx), ServerEvent::LobbyUpdate { .. }));
        assert_eq!(next_event(&mut host_rx), ServerEvent::Ack { id: 1 });
        match next_event(&mut host_rx) {
            ServerEvent::LobbyUpdate { players, host } => {
                assert_eq!(players.len(), 2);
                assert_eq!(host, Some("host".into()));
            }
            other => panic!("Unexpected event {:?}", other),
        }
        assert!(matches!(next_event(&mut guest_rx), ServerEvent::LobbyUpdate { .. }));

        server.on_disconnected(&"guest".into());
        match next_event(&mut host_rx) {
            ServerEvent::LobbyUpdate { players, .. } => {
                assert_eq!(players, vec![ConnId::from("host")])
            }
            other => panic!("Unexpected event {:?}", other),
        }
        assert_eq!(
            server.registry.group_members(&RoomCode::from("ABCD")),
            &[ConnId::from("host")]
        );
    }

    #[tokio::test]
    async fn test_frames_from_unknown_connections_are_dropped() {
        let mut server = create_test_server().await;
        server.on_frame("ghost".into(), r#"{"event":"game:create","data":"ABCD"}"#);
        assert!(server.coordinator.lobbies().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_handle_stops_run() {
        let mut server = create_test_server().await;
        let handle = server.handle();
        handle.shutdown();

        let result = tokio::time::timeout(Duration::from_secs(2), server.run()).await;
        assert!(matches!(result, Ok(Ok(()))));
    }
}
