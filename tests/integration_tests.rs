//! Integration tests for the room server
//!
//! These tests run a real server on an ephemeral port and drive it with
//! WebSocket clients, validating the event flow a browser client relies on.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use server::config::{RoomConfig, ServerConfig};
use server::network::Server;
use shared::{
    Choice, ClientEnvelope, ClientEvent, ConnId, Phase, RoomCode, ServerEvent, TileType,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_test::assert_ok;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

async fn spawn_server(rooms: RoomConfig) -> SocketAddr {
    let config = ServerConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        rooms,
        ..ServerConfig::default()
    };
    let mut server = Server::bind(config).await.expect("Failed to bind server");
    let addr = server.local_addr();
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    addr
}

/// A scripted WebSocket client speaking the JSON envelope protocol
struct TestClient {
    id: ConnId,
    write: SplitSink<Socket, Message>,
    read: SplitStream<Socket>,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> Self {
        let (socket, _) = assert_ok!(connect_async(format!("ws://{}", addr)).await);
        let (write, read) = socket.split();
        let mut client = TestClient {
            id: ConnId::from(""),
            write,
            read,
        };

        match client.expect("session:welcome").await {
            ServerEvent::Welcome { connection_id } => client.id = connection_id,
            other => panic!("Expected welcome, got {:?}", other),
        }
        client
    }

    async fn send_raw(&mut self, text: &str) {
        assert_ok!(self.write.send(Message::Text(text.to_string())).await);
    }

    async fn send(&mut self, event: ClientEvent) {
        let frame = ClientEnvelope::new(event).encode();
        self.send_raw(&frame).await;
    }

    async fn recv(&mut self) -> ServerEvent {
        loop {
            let frame = timeout(RECV_TIMEOUT, self.read.next())
                .await
                .expect("Timed out waiting for server event")
                .expect("Connection closed")
                .expect("WebSocket error");
            if let Message::Text(text) = frame {
                return ServerEvent::decode(&text).expect("Undecodable server event");
            }
        }
    }

    /// Reads events until one named `name` arrives, skipping the rest.
    async fn expect(&mut self, name: &str) -> ServerEvent {
        loop {
            let event = self.recv().await;
            if event.name() == name {
                return event;
            }
        }
    }
}

fn room() -> RoomCode {
    RoomCode::from("ABCD")
}

/// Host plus `guests` joined clients, all past their join broadcasts.
async fn lobby(addr: SocketAddr, guests: usize) -> Vec<TestClient> {
    let mut clients = vec![TestClient::connect(addr).await];
    clients[0]
        .send(ClientEvent::Create { room_code: room() })
        .await;
    clients[0].expect("lobby:update").await;

    for _ in 0..guests {
        let mut guest = TestClient::connect(addr).await;
        guest.send(ClientEvent::Join { room_code: room() }).await;
        let expected = clients.len() + 1;
        for client in clients.iter_mut().chain(std::iter::once(&mut guest)) {
            match client.expect("lobby:update").await {
                ServerEvent::LobbyUpdate { players, .. } => assert_eq!(players.len(), expected),
                other => panic!("Expected lobby update, got {:?}", other),
            }
        }
        clients.push(guest);
    }
    clients
}

/// LOBBY TESTS
mod lobby_tests {
    use super::*;

    /// Tests that the creator is host and late arrivals see the full roster
    #[tokio::test]
    async fn create_and_join_broadcast_roster() {
        let addr = spawn_server(RoomConfig::default()).await;
        let mut clients = lobby(addr, 2).await;

        let host_id = clients[0].id.clone();
        clients[2]
            .send(ClientEvent::Join { room_code: room() })
            .await;
        match clients[2].expect("lobby:update").await {
            ServerEvent::LobbyUpdate { players, host } => {
                assert_eq!(players.len(), 3);
                assert_eq!(players[0], host_id);
                assert_eq!(host, Some(host_id));
            }
            other => panic!("Expected lobby update, got {:?}", other),
        }
    }

    /// Tests that only accepted events are acknowledged
    #[tokio::test]
    async fn acks_follow_accepted_events() {
        let addr = spawn_server(RoomConfig::default()).await;
        let mut host = TestClient::connect(addr).await;

        host.send_raw(r#"{"event":"game:create","data":"ROOM","ack":7}"#)
            .await;
        assert!(matches!(host.recv().await, ServerEvent::LobbyUpdate { .. }));
        assert_eq!(host.recv().await, ServerEvent::Ack { id: 7 });

        host.send_raw(r#"{"event":"host:start","data":{"roomCode":"ROOM"},"ack":8}"#)
            .await;
        assert_eq!(
            host.recv().await,
            ServerEvent::NotEnoughPlayers {
                message: "Need at least 2 players to start.".to_string()
            }
        );

        host.send_raw(r#"{"event":"chat:send","data":{"roomCode":"ROOM","text":"hi"},"ack":9}"#)
            .await;
        match host.recv().await {
            ServerEvent::ChatMessage { author, text, .. } => {
                assert_eq!(author, host.id.to_string());
                assert_eq!(text, "hi");
            }
            other => panic!("Expected chat message, got {:?}", other),
        }
        assert_eq!(host.recv().await, ServerEvent::Ack { id: 9 });
    }

    /// Tests that undecodable frames get an error reply and leave the session open
    #[tokio::test]
    async fn malformed_frames_get_error() {
        let addr = spawn_server(RoomConfig::default()).await;
        let mut client = TestClient::connect(addr).await;

        client.send_raw("{not json").await;
        assert!(matches!(client.recv().await, ServerEvent::Error { .. }));

        client
            .send_raw(r#"{"event":"pick:tile","data":{"roomCode":"ABCD"}}"#)
            .await;
        assert!(matches!(client.recv().await, ServerEvent::Error { .. }));

        client
            .send(ClientEvent::Create { room_code: room() })
            .await;
        assert!(matches!(
            client.recv().await,
            ServerEvent::LobbyUpdate { .. }
        ));
    }

    /// Tests that a second create on an occupied room is refused
    #[tokio::test]
    async fn occupied_room_cannot_be_recreated() {
        let addr = spawn_server(RoomConfig::default()).await;
        let _clients = lobby(addr, 0).await;

        let mut rival = TestClient::connect(addr).await;
        rival.send(ClientEvent::Create { room_code: room() }).await;
        assert_eq!(
            rival.recv().await,
            ServerEvent::RoomTaken { room_code: room() }
        );
    }

    /// Tests host promotion when the host disconnects
    #[tokio::test]
    async fn host_leaving_promotes_next_member() {
        let addr = spawn_server(RoomConfig::default()).await;
        let mut clients = lobby(addr, 2).await;

        let host = clients.remove(0);
        drop(host);

        let expected_host = clients[0].id.clone();
        for client in clients.iter_mut() {
            match client.expect("lobby:update").await {
                ServerEvent::LobbyUpdate { players, host } => {
                    assert_eq!(players.len(), 2);
                    assert_eq!(host, Some(expected_host.clone()));
                }
                other => panic!("Expected lobby update, got {:?}", other),
            }
        }
    }
}

/// GAME FLOW TESTS
mod game_tests {
    use super::*;

    /// Starts a game in a fresh lobby; returns the clients and the first turn holder.
    async fn started_game(addr: SocketAddr, guests: usize) -> (Vec<TestClient>, ConnId, Vec<u32>) {
        let mut clients = lobby(addr, guests).await;
        clients[0]
            .send(ClientEvent::Start { room_code: room() })
            .await;

        let mut first = ConnId::from("");
        let mut tile_ids = Vec::new();
        for client in clients.iter_mut() {
            match client.expect("game:init").await {
                ServerEvent::GameInit(snapshot) => {
                    assert_eq!(snapshot.players.len(), guests + 1);
                    assert_eq!(snapshot.tiles.len(), (guests + 1) * 3);
                    assert_eq!(snapshot.pot, 0);
                    assert_eq!(snapshot.phase, Phase::Tiles);
                    assert!(snapshot.tiles.iter().all(|tile| !tile.revealed));
                    first = snapshot.current_player_id;
                    tile_ids = snapshot.tiles.iter().map(|tile| tile.id).collect();
                }
                other => panic!("Expected game init, got {:?}", other),
            }
        }
        (clients, first, tile_ids)
    }

    fn index_of(clients: &[TestClient], id: &ConnId) -> usize {
        clients
            .iter()
            .position(|client| &client.id == id)
            .expect("Unknown player id")
    }

    /// Each turn holder reveals the next tile in order. Returns the final pot.
    async fn reveal_all(clients: &mut [TestClient], first: ConnId, tile_ids: &[u32]) -> i64 {
        let mut current = first;
        let mut drawn: Vec<TileType> = Vec::new();
        let mut pot = 0;

        for &tile_id in tile_ids {
            let picker = index_of(clients, &current);
            clients[picker]
                .send(ClientEvent::PickTile {
                    room_code: room(),
                    tile_id,
                })
                .await;

            let mut seen = Vec::new();
            for client in clients.iter_mut() {
                match client.expect("tile:revealed").await {
                    ServerEvent::TileRevealed {
                        tile_id: revealed,
                        kind,
                        revealed_by,
                        pot,
                        current_player_id,
                        ..
                    } => {
                        assert_eq!(revealed, tile_id);
                        assert_eq!(revealed_by, current);
                        seen.push((kind, pot, current_player_id));
                    }
                    other => panic!("Expected tile reveal, got {:?}", other),
                }
            }

            // Every client saw the same reveal.
            assert!(seen.windows(2).all(|pair| pair[0] == pair[1]));
            let (kind, new_pot, next) = seen.swap_remove(0);
            drawn.push(kind);
            pot = new_pot;
            current = next;
        }

        let expected: i64 = drawn.iter().map(|kind| kind.pot_delta()).sum();
        assert_eq!(pot, expected);
        pot
    }

    /// Plays a complete three-player game: tiles, one vote round, split final
    #[tokio::test]
    async fn full_three_player_game() {
        let addr = spawn_server(RoomConfig::default()).await;
        let (mut clients, first, tile_ids) = started_game(addr, 2).await;
        let pot = reveal_all(&mut clients, first, &tile_ids).await;

        for client in clients.iter_mut() {
            match client.expect("game:vote").await {
                ServerEvent::VoteStart {
                    pot: vote_pot,
                    players,
                } => {
                    assert_eq!(vote_pot, pot);
                    assert_eq!(players.len(), 3);
                }
                other => panic!("Expected vote start, got {:?}", other),
            }
        }

        // The two others vote out the last guest, who votes for the host.
        let host_id = clients[0].id.clone();
        let target = clients[2].id.clone();
        for (index, client) in clients.iter_mut().enumerate() {
            let voted = if index == 2 {
                host_id.clone()
            } else {
                target.clone()
            };
            client
                .send(ClientEvent::Vote {
                    room_code: room(),
                    voted,
                })
                .await;
        }

        for client in clients.iter_mut() {
            match client.expect("player:eliminated").await {
                ServerEvent::PlayerEliminated {
                    eliminated,
                    players,
                    eliminated_list,
                } => {
                    assert_eq!(eliminated, target);
                    assert_eq!(players.len(), 2);
                    assert_eq!(eliminated_list, vec![target.clone()]);
                }
                other => panic!("Expected elimination, got {:?}", other),
            }
            match client.expect("final:start").await {
                ServerEvent::FinalStart {
                    pot: final_pot,
                    players,
                } => {
                    assert_eq!(final_pot, pot);
                    assert!(!players.contains(&target));
                }
                other => panic!("Expected final start, got {:?}", other),
            }
        }

        // The eliminated player has no say in the final.
        clients[2]
            .send(ClientEvent::FinalChoice {
                room_code: room(),
                choice: Choice::Steal,
            })
            .await;
        for client in clients.iter_mut().take(2) {
            client
                .send(ClientEvent::FinalChoice {
                    room_code: room(),
                    choice: Choice::Split,
                })
                .await;
        }

        for client in clients.iter_mut() {
            match client.expect("game:over").await {
                ServerEvent::GameOver {
                    pot: over_pot,
                    result,
                } => {
                    assert_eq!(over_pot, pot);
                    assert_eq!(result.message, "Both players split the pot!");
                    assert_eq!(result.winners.len(), 2);
                    assert_eq!(result.payout, pot / 2);
                }
                other => panic!("Expected game over, got {:?}", other),
            }
            match client.expect("final:result").await {
                ServerEvent::FinalResult { payout, .. } => assert_eq!(payout, pot / 2),
                other => panic!("Expected final result, got {:?}", other),
            }
        }
    }

    /// Tests that strangers cannot join a running game
    #[tokio::test]
    async fn late_joiner_gets_notfound() {
        let addr = spawn_server(RoomConfig::default()).await;
        let (_clients, _, _) = started_game(addr, 1).await;

        let mut late = TestClient::connect(addr).await;
        late.send(ClientEvent::Join { room_code: room() }).await;
        assert_eq!(late.recv().await, ServerEvent::GameNotFound);
    }

    /// Tests that out-of-turn picks are dropped when turn order is enforced
    #[tokio::test]
    async fn enforced_turn_order_ignores_other_players() {
        let addr = spawn_server(RoomConfig {
            enforce_turn_order: true,
            ..RoomConfig::default()
        })
        .await;
        let (mut clients, first, tile_ids) = started_game(addr, 1).await;
        let holder = index_of(&clients, &first);
        let other = 1 - holder;

        clients[other]
            .send(ClientEvent::PickTile {
                room_code: room(),
                tile_id: tile_ids[0],
            })
            .await;
        // A chat round-trip proves the pick was processed without a reveal.
        clients[other]
            .send(ClientEvent::Chat {
                room_code: room(),
                text: "sync".to_string(),
            })
            .await;
        assert!(matches!(
            clients[other].recv().await,
            ServerEvent::ChatMessage { .. }
        ));

        clients[holder]
            .send(ClientEvent::PickTile {
                room_code: room(),
                tile_id: tile_ids[0],
            })
            .await;
        match clients[other].expect("tile:revealed").await {
            ServerEvent::TileRevealed {
                revealed_by, turns, ..
            } => {
                assert_eq!(revealed_by, first);
                assert_eq!(turns, 1);
            }
            other => panic!("Expected tile reveal, got {:?}", other),
        }
    }

    /// Tests that a departing turn holder hands the turn on
    #[tokio::test]
    async fn disconnect_passes_turn() {
        let addr = spawn_server(RoomConfig::default()).await;
        let (mut clients, first, _) = started_game(addr, 2).await;

        let holder = index_of(&clients, &first);
        let next = clients[(holder + 1) % clients.len()].id.clone();
        drop(clients.remove(holder));

        for client in clients.iter_mut() {
            match client.expect("game:update").await {
                ServerEvent::GameUpdate {
                    current_player_id,
                    pot,
                } => {
                    assert_eq!(current_player_id, next);
                    assert_eq!(pot, 0);
                }
                other => panic!("Expected game update, got {:?}", other),
            }
        }
    }

    /// Tests walkover when forfeits leave a single player
    #[tokio::test]
    async fn forfeit_leaves_walkover_winner() {
        let addr = spawn_server(RoomConfig {
            forfeit_on_disconnect: true,
            ..RoomConfig::default()
        })
        .await;
        let (mut clients, _, _) = started_game(addr, 1).await;

        let leaver = clients.remove(1);
        let leaver_id = leaver.id.clone();
        drop(leaver);

        let winner = &mut clients[0];
        match winner.expect("player:eliminated").await {
            ServerEvent::PlayerEliminated { eliminated, .. } => assert_eq!(eliminated, leaver_id),
            other => panic!("Expected elimination, got {:?}", other),
        }
        match winner.expect("game:over").await {
            ServerEvent::GameOver { result, .. } => {
                assert_eq!(result.winners, vec![winner.id.clone()]);
                assert_eq!(result.payout, 0);
            }
            other => panic!("Expected game over, got {:?}", other),
        }
    }
}
