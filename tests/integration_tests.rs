//! Integration tests for the server and client over real loopback TCP
//!
//! These tests run a full server (listener, simulation, dispatcher and
//! handlers) and drive it with several clients at once.

use dungeon_client::error::ClientError;
use dungeon_client::network::Client;
use dungeon_server::behavior::{CreatureBehavior, TurnContext, TurnOutcome};
use dungeon_server::config::ServerConfig;
use dungeon_server::error::ServerError;
use dungeon_server::network::{Server, ServerHandle};
use dungeon_server::world::World;
use dungeon_shared::{
    write_frame, Creature, CreatureClass, Frame, FrameReader, Position, ProtocolError, Room,
    RoomType, Seat, ServerMessage, Tile, TileType, PROTOCOL_VERSION,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;

type TcpClient = Client<OwnedReadHalf, OwnedWriteHalf>;

const WAIT: Duration = Duration::from_secs(5);

/// Creatures stand still, so the only traffic is what the tests cause
struct Still;

impl CreatureBehavior for Still {
    fn do_turn(&mut self, _: &mut Creature, _: &mut TurnContext<'_>) -> TurnOutcome {
        TurnOutcome::Keep
    }
}

/// 3x2 open dirt floor, two seats, one temple, one imp
fn scenario_world() -> World {
    let imp = CreatureClass {
        name: "Imp".to_string(),
        max_hp: 20.0,
        dig_rate: 0.3,
        move_speed: 1.0,
    };
    let mut world = World::new(3, 2, 20.0);
    for color in 1..=2 {
        world.add_seat(Seat {
            color,
            faction: "Keeper".to_string(),
        });
    }
    for x in 0..3 {
        for y in 0..2 {
            world.insert_tile(Tile::new(x, y, TileType::Dirt, 0.0));
        }
    }
    world.add_room(Room {
        name: "Room_1".to_string(),
        kind: RoomType::DungeonTemple,
        color: 1,
        tiles: vec![(0, 0)],
    });
    world.add_creature(Creature::new("goblin1", &imp, Position::default(), 1));
    world.add_class(imp);
    world
}

async fn start_server() -> (SocketAddr, ServerHandle, JoinHandle<Result<(), ServerError>>) {
    let config = ServerConfig {
        port: 0,
        turns_per_second: 20.0,
        ..ServerConfig::default()
    };
    let server = Server::with_world(config, scenario_world(), Box::new(Still))
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    let handle = server.handle();
    (addr, handle, tokio::spawn(server.run()))
}

/// Reads messages until one satisfies `wanted`
async fn expect_message<F>(client: &mut TcpClient, wanted: F) -> ServerMessage
where
    F: Fn(&ServerMessage) -> bool,
{
    timeout(WAIT, async {
        loop {
            match client.next_message().await.unwrap() {
                Some(message) if wanted(&message) => return message,
                Some(_) => {}
                None => panic!("server closed the connection"),
            }
        }
    })
    .await
    .expect("timed out waiting for a message")
}

async fn joined(addr: SocketAddr, nick: &str) -> TcpClient {
    let mut client = Client::connect(&addr.to_string(), nick).await.unwrap();
    // The first turn announced after the snapshot means the join is complete.
    timeout(WAIT, client.wait_for_turn(1))
        .await
        .expect("timed out joining")
        .unwrap();
    client
}

/// HANDSHAKE TESTS
mod handshake_tests {
    use super::*;

    /// Snapshot frames arrive in a fixed order, each acknowledged before the next
    #[tokio::test]
    async fn snapshot_order_with_acks() {
        let (addr, handle, _server) = start_server().await;
        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut reader = FrameReader::new(reader);

        write_frame(&mut writer, &Frame::new("hello", PROTOCOL_VERSION))
            .await
            .unwrap();
        let picknick = timeout(WAIT, reader.next_frame()).await.unwrap().unwrap();
        assert_eq!(picknick, Some(Frame::bare("picknick")));
        write_frame(&mut writer, &Frame::new("setnick", "alice"))
            .await
            .unwrap();

        let mut commands = Vec::new();
        loop {
            let frame = timeout(WAIT, reader.next_frame())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            if frame.command == "newturn" {
                break;
            }
            commands.push(frame.command.clone());
            write_frame(&mut writer, &Frame::new("ok", frame.command.as_str()))
                .await
                .unwrap();
        }

        let mut expected = vec!["newmap", "addseat", "turnsPerSecond"];
        expected.extend(["addtile"; 6]);
        expected.extend(["addroom", "addclass", "addcreature"]);
        assert_eq!(commands, expected);
        assert_eq!(handle.client_count().await, 1);
    }

    /// The second player hears about the first in its snapshot
    #[tokio::test]
    async fn second_player_sees_first() {
        let (addr, _handle, _server) = start_server().await;
        let alice = joined(addr, "alice").await;
        let bob = joined(addr, "bob").await;

        assert_eq!(alice.world().seat.as_ref().map(|s| s.color), Some(1));
        assert_eq!(bob.world().seat.as_ref().map(|s| s.color), Some(2));
        assert_eq!(bob.world().players.get("alice"), Some(&1));
        assert_eq!(bob.world().tiles.len(), 6);
        assert!(bob.world().creatures.contains_key("goblin1"));
    }

    /// A taken nickname is refused without disturbing the seated player
    #[tokio::test]
    async fn duplicate_nick_rejected() {
        let (addr, handle, _server) = start_server().await;
        let _alice = joined(addr, "alice").await;

        let mut imposter = Client::connect(&addr.to_string(), "alice").await.unwrap();
        let outcome = timeout(WAIT, imposter.wait_for_turn(1)).await.unwrap();
        assert!(matches!(outcome, Err(ClientError::Rejected(_))));
        assert_eq!(handle.player_nicks().await, vec!["alice".to_string()]);
    }
}

/// BROADCAST TESTS
mod broadcast_tests {
    use super::*;

    /// Every client sees the same turn announcements
    #[tokio::test]
    async fn turns_reach_every_client() {
        let (addr, _handle, _server) = start_server().await;
        let mut alice = joined(addr, "alice").await;
        let mut bob = joined(addr, "bob").await;

        let target = bob.world().turn + 3;
        timeout(WAIT, alice.wait_for_turn(target)).await.unwrap().unwrap();
        timeout(WAIT, bob.wait_for_turn(target)).await.unwrap().unwrap();
        assert!(alice.world().turn >= target);
        assert!(bob.world().turn >= target);
    }

    /// Pick-up and drop by one player are seen by the other
    #[tokio::test]
    async fn pick_up_and_drop_broadcast() {
        let (addr, _handle, _server) = start_server().await;
        let mut alice = joined(addr, "alice").await;
        let mut bob = joined(addr, "bob").await;

        alice.pick_up("goblin1").await.unwrap();
        expect_message(&mut bob, |m| matches!(m, ServerMessage::CreaturePickUp { .. })).await;
        assert!(!bob.world().creatures.contains_key("goblin1"));
        assert_eq!(bob.world().hand("alice").count(), 1);

        alice.drop_at(2, 1).await.unwrap();
        expect_message(&mut bob, |m| matches!(m, ServerMessage::CreatureDrop { .. })).await;
        let goblin = &bob.world().creatures["goblin1"];
        assert_eq!(goblin.position.tile(), (2, 1));
    }

    /// Unknown names are ignored and the session carries on
    #[tokio::test]
    async fn pick_up_unknown_is_noop() {
        let (addr, _handle, _server) = start_server().await;
        let mut alice = joined(addr, "alice").await;

        alice.pick_up("dragon").await.unwrap();
        alice.chat("still here").await.unwrap();
        let message = expect_message(&mut alice, |m| {
            matches!(m, ServerMessage::CreaturePickUp { .. } | ServerMessage::Chat { .. })
        })
        .await;
        assert!(matches!(message, ServerMessage::Chat { .. }));
        assert!(alice.world().creatures.contains_key("goblin1"));
    }

    /// Chat lines are relayed to everybody, the sender included
    #[tokio::test]
    async fn chat_is_relayed() {
        let (addr, handle, _server) = start_server().await;
        let mut alice = joined(addr, "alice").await;
        let mut bob = joined(addr, "bob").await;

        alice.chat("hello: bob").await.unwrap();
        let is_line = |m: &ServerMessage| matches!(m, ServerMessage::Chat { message, .. } if message == "hello: bob");
        expect_message(&mut bob, is_line).await;
        expect_message(&mut alice, is_line).await;

        let log = handle.chat_messages().await;
        assert!(log.iter().any(|line| line.nick == "alice" && line.message == "hello: bob"));
    }

    /// Rate changes from the server side reach the clients
    #[tokio::test]
    async fn rate_change_broadcast() {
        let (addr, handle, _server) = start_server().await;
        let mut alice = joined(addr, "alice").await;

        handle.set_turns_per_second(25.0).await.unwrap();
        expect_message(&mut alice, |m| matches!(m, ServerMessage::TurnsPerSecond(_))).await;
        assert_eq!(alice.world().turns_per_second, 25.0);
    }
}

/// LIFECYCLE TESTS
mod lifecycle_tests {
    use super::*;

    /// A leaving client frees its seat; the others keep going
    #[tokio::test]
    async fn disconnect_frees_seat() {
        let (addr, handle, _server) = start_server().await;
        let alice = joined(addr, "alice").await;
        let mut bob = joined(addr, "bob").await;
        drop(alice);

        timeout(WAIT, async {
            while handle.client_count().await != 1 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(handle.player_nicks().await, vec!["bob".to_string()]);

        let target = bob.world().turn + 2;
        timeout(WAIT, bob.wait_for_turn(target)).await.unwrap().unwrap();
    }

    /// An unknown command ends the whole session with an error
    #[tokio::test]
    async fn unknown_command_is_fatal() {
        let (addr, _handle, server) = start_server().await;
        let mut alice = joined(addr, "alice").await;

        let mut rogue = TcpStream::connect(addr).await.unwrap();
        write_frame(&mut rogue, &Frame::new("teleport", "1:2"))
            .await
            .unwrap();

        let result = timeout(WAIT, server).await.unwrap().unwrap();
        assert!(matches!(
            result,
            Err(ServerError::Protocol {
                source: ProtocolError::UnknownCommand { .. },
                ..
            })
        ));

        // Everybody else is disconnected too.
        let closed = timeout(WAIT, async {
            while alice.next_message().await.unwrap().is_some() {}
        })
        .await;
        assert!(closed.is_ok());
    }

    /// Stopping flushes queued events and closes every client
    #[tokio::test]
    async fn stop_closes_clients() {
        let (addr, handle, server) = start_server().await;
        let mut alice = joined(addr, "alice").await;

        handle.stop();
        let result = timeout(WAIT, server).await.unwrap().unwrap();
        assert!(result.is_ok());
        assert_eq!(handle.clock().backlog(), 0);

        let closed = timeout(WAIT, async {
            while alice.next_message().await.unwrap().is_some() {}
        })
        .await;
        assert!(closed.is_ok());
    }
}
