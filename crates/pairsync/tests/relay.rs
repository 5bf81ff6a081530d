//! Integration tests for the relay: real WebSocket clients against a relay
//! on a random port.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use pairsync::prelude::*;
use tokio_tungstenite::tungstenite::Message;

const ROOM: RoomId = RoomId(7);

// =========================================================================
// Helpers
// =========================================================================

type ClientWs = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Starts a relay on a random port and returns the address.
async fn start_relay() -> String {
    let relay = RelayServer::builder()
        .bind("127.0.0.1:0")
        .game_config(GameConfig {
            pair_count: 2,
            shuffle: false,
            ..GameConfig::default()
        })
        .build()
        .await
        .expect("relay should build");

    let addr = relay
        .local_addr()
        .expect("should have local addr")
        .to_string();

    tokio::spawn(async move {
        let _ = relay.run().await;
    });

    // Give the accept loop a moment to start.
    tokio::time::sleep(Duration::from_millis(10)).await;
    addr
}

async fn connect(addr: &str) -> ClientWs {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
        .await
        .expect("should connect");
    ws
}

async fn send(ws: &mut ClientWs, message: &ClientMessage) {
    let bytes = serde_json::to_vec(message).expect("encode");
    ws.send(Message::Binary(bytes.into())).await.expect("send");
}

/// Next relay message, skipping control frames.
async fn recv(ws: &mut ClientWs) -> ServerMessage {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("relay should answer")
            .expect("stream open")
            .expect("frame");
        match frame {
            Message::Binary(data) => return serde_json::from_slice(&data).expect("decode"),
            Message::Text(text) => return serde_json::from_str(text.as_str()).expect("decode"),
            _ => continue,
        }
    }
}

/// Reads until a message satisfies `pred` and returns it.
async fn recv_until(ws: &mut ClientWs, pred: impl Fn(&ServerMessage) -> bool) -> ServerMessage {
    loop {
        let message = recv(ws).await;
        if pred(&message) {
            return message;
        }
    }
}

async fn join(ws: &mut ClientWs, id: u64, name: &str) -> ServerMessage {
    send(
        ws,
        &ClientMessage::Join {
            room_id: ROOM,
            participant_id: ParticipantId(id),
            session_id: None,
            display_name: Some(name.into()),
        },
    )
    .await;
    recv_until(ws, |m| matches!(m, ServerMessage::Joined { .. })).await
}

fn is_event(kind: &'static str) -> impl Fn(&ServerMessage) -> bool {
    move |message| matches!(message, ServerMessage::Event(event) if event.kind() == kind)
}

fn is_error(message: &ServerMessage) -> bool {
    matches!(message, ServerMessage::Error { .. })
}

fn error_code(message: ServerMessage) -> u16 {
    match message {
        ServerMessage::Error { code, .. } => code,
        other => panic!("expected Error, got {other:?}"),
    }
}

// =========================================================================
// Join and heartbeat
// =========================================================================

#[tokio::test]
async fn test_join_acknowledged_with_ids() {
    let addr = start_relay().await;
    let mut ws = connect(&addr).await;

    let joined = join(&mut ws, 1, "Ada").await;

    assert_eq!(
        joined,
        ServerMessage::Joined {
            room_id: ROOM,
            participant_id: ParticipantId(1),
        }
    );
}

#[tokio::test]
async fn test_join_announces_participant_with_room_code() {
    let addr = start_relay().await;
    let mut ws = connect(&addr).await;
    join(&mut ws, 1, "Ada").await;

    match recv_until(&mut ws, is_event("player_joined")).await {
        ServerMessage::Event(GameEvent::PlayerJoined { player, room_code }) => {
            assert_eq!(player.display_name, "Ada");
            assert_eq!(room_code.len(), 6);
        }
        other => panic!("expected player_joined, got {other:?}"),
    }
}

#[tokio::test]
async fn test_ping_answered_with_pong() {
    let addr = start_relay().await;
    let mut ws = connect(&addr).await;
    join(&mut ws, 1, "Ada").await;

    send(&mut ws, &ClientMessage::Ping).await;

    let pong = recv_until(&mut ws, |m| matches!(m, ServerMessage::Pong)).await;
    assert_eq!(pong, ServerMessage::Pong);
}

#[tokio::test]
async fn test_message_before_join_rejected() {
    let addr = start_relay().await;
    let mut ws = connect(&addr).await;

    send(&mut ws, &ClientMessage::Ping).await;

    assert_eq!(error_code(recv(&mut ws).await), 400);
}

#[tokio::test]
async fn test_garbage_rejected_and_connection_kept() {
    let addr = start_relay().await;
    let mut ws = connect(&addr).await;

    ws.send(Message::Binary(b"not json".to_vec().into()))
        .await
        .unwrap();
    assert_eq!(error_code(recv(&mut ws).await), 400);

    let joined = join(&mut ws, 1, "Ada").await;
    assert!(matches!(joined, ServerMessage::Joined { .. }));
}

#[tokio::test]
async fn test_second_join_rejected() {
    let addr = start_relay().await;
    let mut ws = connect(&addr).await;
    join(&mut ws, 1, "Ada").await;

    send(
        &mut ws,
        &ClientMessage::Join {
            room_id: RoomId(8),
            participant_id: ParticipantId(1),
            session_id: None,
            display_name: None,
        },
    )
    .await;

    assert_eq!(error_code(recv_until(&mut ws, is_error).await), 409);
}

// =========================================================================
// Gameplay
// =========================================================================

#[tokio::test]
async fn test_two_clients_see_each_others_moves() {
    let addr = start_relay().await;
    let mut ada = connect(&addr).await;
    let mut bo = connect(&addr).await;
    join(&mut ada, 1, "Ada").await;
    join(&mut bo, 2, "Bo").await;

    let announced = recv_until(&mut ada, |m| {
        matches!(m, ServerMessage::Event(GameEvent::PlayerJoined { player, .. }) if player.display_name == "Bo")
    })
    .await;
    assert!(matches!(announced, ServerMessage::Event(_)));

    send(&mut ada, &ClientMessage::StartGame).await;
    for ws in [&mut ada, &mut bo] {
        match recv_until(ws, is_event("game_started")).await {
            ServerMessage::Event(GameEvent::GameStarted {
                cards,
                first_player_id,
                ..
            }) => {
                assert_eq!(cards.len(), 4);
                assert_eq!(first_player_id, ParticipantId(1));
            }
            other => panic!("expected game_started, got {other:?}"),
        }
    }

    send(&mut ada, &ClientMessage::FlipCard { position: 0 }).await;
    let flipped = recv_until(&mut bo, |m| {
        matches!(
            m,
            ServerMessage::Event(GameEvent::CardFlipped { career_name: Some(_), .. })
        )
    })
    .await;
    match flipped {
        ServerMessage::Event(GameEvent::CardFlipped {
            position,
            match_state,
            ..
        }) => {
            assert_eq!(position, 0);
            assert_eq!(match_state, Some(MatchState::M1));
        }
        other => panic!("expected card_flipped, got {other:?}"),
    }
}

#[tokio::test]
async fn test_out_of_turn_flip_answered_with_409() {
    let addr = start_relay().await;
    let mut ada = connect(&addr).await;
    let mut bo = connect(&addr).await;
    join(&mut ada, 1, "Ada").await;
    join(&mut bo, 2, "Bo").await;

    send(&mut ada, &ClientMessage::StartGame).await;
    recv_until(&mut bo, is_event("game_started")).await;
    send(&mut bo, &ClientMessage::FlipCard { position: 0 }).await;

    assert_eq!(error_code(recv_until(&mut bo, is_error).await), 409);
}

#[tokio::test]
async fn test_start_while_active_answered_with_409() {
    let addr = start_relay().await;
    let mut ws = connect(&addr).await;
    join(&mut ws, 1, "Ada").await;

    send(&mut ws, &ClientMessage::StartGame).await;
    recv_until(&mut ws, is_event("game_started")).await;
    send(&mut ws, &ClientMessage::StartGame).await;

    assert_eq!(error_code(recv_until(&mut ws, is_error).await), 409);
}

#[tokio::test]
async fn test_sync_returns_snapshot() {
    let addr = start_relay().await;
    let mut ws = connect(&addr).await;
    join(&mut ws, 1, "Ada").await;
    send(&mut ws, &ClientMessage::StartGame).await;
    recv_until(&mut ws, is_event("game_started")).await;

    send(&mut ws, &ClientMessage::Sync).await;

    match recv_until(&mut ws, |m| matches!(m, ServerMessage::Snapshot(_))).await {
        ServerMessage::Snapshot(Some(snapshot)) => {
            assert_eq!(snapshot.participant.display_name, "Ada");
            assert_eq!(snapshot.cards.len(), 4);
            let session = snapshot.session.expect("session");
            assert_eq!(session.status, SessionStatus::Active);
        }
        other => panic!("expected snapshot, got {other:?}"),
    }
}

#[tokio::test]
async fn test_leave_notifies_room() {
    let addr = start_relay().await;
    let mut ada = connect(&addr).await;
    let mut bo = connect(&addr).await;
    join(&mut ada, 1, "Ada").await;
    join(&mut bo, 2, "Bo").await;
    send(&mut ada, &ClientMessage::StartGame).await;
    recv_until(&mut bo, is_event("game_started")).await;

    send(&mut bo, &ClientMessage::Leave).await;

    match recv_until(&mut ada, is_event("player_left")).await {
        ServerMessage::Event(GameEvent::PlayerLeft { player_id, .. }) => {
            assert_eq!(player_id, ParticipantId(2));
        }
        other => panic!("expected player_left, got {other:?}"),
    }
}

#[tokio::test]
async fn test_rejoin_after_leave_rejected() {
    let addr = start_relay().await;
    let mut bo = connect(&addr).await;
    join(&mut bo, 2, "Bo").await;
    send(&mut bo, &ClientMessage::Leave).await;
    // The relay closes the socket once the leave is stored.
    tokio::time::timeout(Duration::from_secs(2), async {
        while let Some(Ok(_)) = bo.next().await {}
    })
    .await
    .expect("relay should close the connection");

    let mut again = connect(&addr).await;
    send(
        &mut again,
        &ClientMessage::Join {
            room_id: ROOM,
            participant_id: ParticipantId(2),
            session_id: None,
            display_name: None,
        },
    )
    .await;

    assert_eq!(error_code(recv_until(&mut again, is_error).await), 409);
}
