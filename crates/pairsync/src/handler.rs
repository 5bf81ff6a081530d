//! Per-connection handler: join, message routing, and cleanup.
//!
//! Each accepted socket gets its own Tokio task running this handler.
//! The flow is:
//!   1. Upgrade to WebSocket and split into reader and writer halves
//!   2. Wait for `join` → seat the participant and subscribe to the room
//!   3. Loop: receive client messages → store actions or replies
//!   4. On close: unsubscribe and mark the participant disconnected
//!
//! Everything sent to the client goes through one mpsc queue drained by a
//! writer task, so bus callbacks never block on the socket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::{SinkExt, StreamExt};
use pairsync_protocol::{
    ClientMessage, Codec, ParticipantId, ProtocolError, RoomId, ServerMessage, SessionId,
};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::server::RelayState;
use crate::{PairsyncError, Subscriber};

/// A client that sends nothing, not even `ping`, for this long is dropped.
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// The room seat a connection holds after `join`.
struct Seat {
    room_id: RoomId,
    participant_id: ParticipantId,
    subscriber: Subscriber,
}

struct Connection {
    addr: SocketAddr,
    state: Arc<RelayState>,
    out: mpsc::UnboundedSender<Message>,
    seat: Option<Seat>,
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    state: Arc<RelayState>,
) -> Result<(), PairsyncError> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    tracing::debug!(%addr, "accepted WebSocket connection");

    let (mut sink, mut incoming) = ws.split();
    let (out, mut outbox) = mpsc::unbounded_channel::<Message>();
    tokio::spawn(async move {
        while let Some(message) = outbox.recv().await {
            if sink.send(message).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut conn = Connection {
        addr,
        state,
        out,
        seat: None,
    };

    loop {
        let data = match tokio::time::timeout(IDLE_TIMEOUT, incoming.next()).await {
            Ok(Some(Ok(Message::Binary(data)))) => data.to_vec(),
            Ok(Some(Ok(Message::Text(text)))) => text.as_bytes().to_vec(),
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {
                tracing::info!(%addr, "connection closed cleanly");
                break;
            }
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(e))) => {
                tracing::debug!(%addr, error = %e, "recv error");
                break;
            }
            Err(_) => {
                tracing::info!(%addr, "connection timed out");
                break;
            }
        };

        match conn.handle(&data).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => {
                conn.cleanup().await;
                return Err(e);
            }
        }
    }

    conn.cleanup().await;
    Ok(())
}

impl Connection {
    /// Handles one client message. Returns `false` if the connection should
    /// close.
    async fn handle(&mut self, data: &[u8]) -> Result<bool, PairsyncError> {
        let message: ClientMessage = match self.state.codec.decode(data) {
            Ok(message) => message,
            Err(e) => {
                self.send_error(400, &format!("invalid message: {e}"))?;
                return Ok(true);
            }
        };

        if let ClientMessage::Join {
            room_id,
            participant_id,
            session_id,
            display_name,
        } = message
        {
            self.join(room_id, participant_id, session_id, display_name.as_deref())
                .await?;
            return Ok(true);
        }

        let Some((room_id, participant_id)) = self.seat.as_ref().map(|s| (s.room_id, s.participant_id))
        else {
            self.send_error(400, "join a room first")?;
            return Ok(true);
        };

        match message {
            ClientMessage::Join { .. } => {}

            ClientMessage::Ping => match self.state.store.receive_ping(participant_id) {
                Ok(()) => {
                    self.send(&ServerMessage::Pong)?;
                    self.state.sync_clock(room_id);
                }
                Err(e) => self.reject(e.into())?,
            },

            ClientMessage::StartGame => match self.state.store.start_game(room_id) {
                Ok(start) => {
                    self.state
                        .bus
                        .broadcast_game_started(
                            room_id,
                            start.cards,
                            start.first_player_id,
                            unix_millis(),
                        )
                        .await?;
                    self.state.start_clock(room_id);
                }
                Err(e) => self.reject(e)?,
            },

            ClientMessage::FlipCard { position } => {
                if let Err(e) = self.state.store.flip_card(participant_id, position) {
                    self.reject(e)?;
                }
            }

            ClientMessage::Sync => {
                let snapshot = self.state.store.sync_participant_state(participant_id);
                self.send(&ServerMessage::Snapshot(snapshot))?;
            }

            ClientMessage::Leave => {
                if let Err(e) = self.state.store.leave(participant_id) {
                    self.reject(e)?;
                    return Ok(true);
                }
                tracing::info!(%room_id, %participant_id, "participant left the room");
                self.release_seat().await;
                return Ok(false);
            }
        }

        Ok(true)
    }

    async fn join(
        &mut self,
        room_id: RoomId,
        participant_id: ParticipantId,
        session_id: Option<SessionId>,
        display_name: Option<&str>,
    ) -> Result<(), PairsyncError> {
        if self.seat.is_some() {
            return self.send_error(409, "already joined");
        }

        let connected = match self.state.store.connect(room_id, participant_id, display_name) {
            Ok(connected) => connected,
            Err(e) => return self.reject(e),
        };

        let subscriber = event_forwarder(self.state.codec, self.out.clone());
        if let Err(e) = self
            .state
            .bus
            .subscribe(room_id, &subscriber, session_id)
            .await
        {
            self.state.store.disconnect(participant_id);
            return self.reject(e);
        }

        self.seat = Some(Seat {
            room_id,
            participant_id,
            subscriber,
        });
        tracing::info!(addr = %self.addr, %room_id, %participant_id, "participant seated");

        self.send(&ServerMessage::Joined {
            room_id,
            participant_id,
        })?;
        if connected.is_new {
            self.state
                .bus
                .broadcast_player_joined(room_id, &connected.participant, &connected.room_code)
                .await?;
        }
        self.state.sync_clock(room_id);
        Ok(())
    }

    /// Drops the room subscription without touching presence.
    async fn release_seat(&mut self) -> Option<Seat> {
        let seat = self.seat.take()?;
        self.state
            .bus
            .unsubscribe(seat.room_id, Some(&seat.subscriber))
            .await;
        Some(seat)
    }

    async fn cleanup(&mut self) {
        if let Some(seat) = self.release_seat().await {
            self.state.store.disconnect(seat.participant_id);
            self.state.sync_clock(seat.room_id);
        }
    }

    fn send(&self, message: &ServerMessage) -> Result<(), PairsyncError> {
        let bytes = self.state.codec.encode(message)?;
        self.out.send(Message::Binary(bytes.into())).map_err(|_| {
            PairsyncError::Protocol(ProtocolError::InvalidMessage(
                "connection writer is gone".into(),
            ))
        })
    }

    fn send_error(&self, code: u16, message: &str) -> Result<(), PairsyncError> {
        self.send(&ServerMessage::Error {
            code,
            message: message.to_string(),
        })
    }

    /// Reports a rejected action to the client.
    fn reject(&self, err: PairsyncError) -> Result<(), PairsyncError> {
        tracing::debug!(addr = %self.addr, error = %err, "request rejected");
        self.send_error(err.code(), &err.to_string())
    }
}

/// A subscriber that forwards every room event to the connection's outbox.
fn event_forwarder<C: Codec>(codec: C, out: mpsc::UnboundedSender<Message>) -> Subscriber {
    Subscriber::new(move |event| match codec.encode(&ServerMessage::Event(event.clone())) {
        Ok(bytes) => {
            let _ = out.send(Message::Binary(bytes.into()));
        }
        Err(e) => tracing::warn!(error = %e, "event not forwarded"),
    })
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
