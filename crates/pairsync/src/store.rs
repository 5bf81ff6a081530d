//! In-process authoritative store.
//!
//! [`MemoryStore`] plays the part of the database behind the change feed:
//! it owns one [`Board`] per room, applies actions to it, and publishes
//! every resulting row update to its [`MemoryFeed`] in write order. It also
//! keeps server-side liveness for every joined participant and implements
//! [`PresenceStore`] so connection monitors can run against it directly.
//!
//! All state sits behind one mutex. Row changes are published while it is
//! held, so two concurrent actions never interleave their updates on the
//! feed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use pairsync_feed::MemoryFeed;
use pairsync_game::{Board, GameConfig, GameError, RoomSessions, deck};
use pairsync_presence::{
    ConnectionStatus, PresenceConfig, PresenceError, PresenceStore, PresenceTracker,
};
use pairsync_protocol::{
    CardRow, ParticipantId, ParticipantRow, RoomId, RowChange, SessionId, SessionRow,
    SessionStatus, StateSnapshot,
};
use rand::Rng;
use rand::distr::Alphanumeric;
use tracing::{debug, info};

use crate::PairsyncError;

const ROOM_CODE_LEN: usize = 6;

/// Result of [`MemoryStore::start_game`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameStart {
    pub session_id: SessionId,
    pub cards: Vec<CardRow>,
    pub first_player_id: ParticipantId,
}

/// Result of [`MemoryStore::connect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connected {
    pub participant: ParticipantRow,
    pub room_code: String,
    /// `false` when the participant was already in the room and came back.
    pub is_new: bool,
}

struct RoomEntry {
    room_code: String,
    board: Board,
}

struct StoreState {
    rooms: HashMap<RoomId, RoomEntry>,
    sessions: RoomSessions,
    presence: PresenceTracker,
    participant_rooms: HashMap<ParticipantId, RoomId>,
}

impl StoreState {
    fn room_of(&self, id: ParticipantId) -> Result<RoomId, PairsyncError> {
        self.participant_rooms
            .get(&id)
            .copied()
            .ok_or(PairsyncError::Game(GameError::UnknownParticipant(id)))
    }
}

pub struct MemoryStore {
    feed: Arc<MemoryFeed>,
    config: GameConfig,
    state: Mutex<StoreState>,
    next_session: AtomicU64,
}

impl MemoryStore {
    pub fn new(feed: Arc<MemoryFeed>, config: GameConfig, presence: PresenceConfig) -> Self {
        Self {
            feed,
            config,
            state: Mutex::new(StoreState {
                rooms: HashMap::new(),
                sessions: RoomSessions::new(),
                presence: PresenceTracker::new(presence),
                participant_rooms: HashMap::new(),
            }),
            next_session: AtomicU64::new(0),
        }
    }

    /// The feed every row update is published to.
    pub fn feed(&self) -> &Arc<MemoryFeed> {
        &self.feed
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, room_id: RoomId, changes: &[RowChange]) {
        for change in changes {
            self.feed.publish(room_id, change.clone());
        }
    }

    fn next_session_id(&self) -> SessionId {
        SessionId(self.next_session.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn new_board(&self, room_id: RoomId) -> Board {
        let session = SessionRow::new(self.next_session_id(), room_id);
        Board::new(session, self.config.clone())
    }

    /// A fresh waiting board carrying over the active participants of
    /// `previous` with their per-session stats reset.
    fn next_board(&self, room_id: RoomId, previous: &Board, presence: &PresenceTracker) -> Board {
        let mut board = self.new_board(room_id);
        for row in previous.participants().iter().filter(|p| p.is_active) {
            let carried = ParticipantRow {
                pairs_matched: 0,
                current_streak: 0,
                max_streak: 0,
                ..row.clone()
            };
            if board.join(carried).is_ok() {
                let connected = presence
                    .connection_status(row.id)
                    .is_ok_and(|status| !status.is_disconnected);
                if !connected {
                    board.set_connected(row.id, false);
                }
            }
        }
        info!(
            %room_id,
            session_id = %board.session().id,
            carried = board.participants().len(),
            "new session created"
        );
        board
    }

    // -----------------------------------------------------------------------
    // Rooms and roster
    // -----------------------------------------------------------------------

    /// Creates the room with a waiting session if it does not exist yet.
    /// Returns its room code.
    pub fn create_room(&self, room_id: RoomId) -> String {
        let mut state = self.lock();
        state
            .rooms
            .entry(room_id)
            .or_insert_with(|| {
                info!(%room_id, "room created");
                RoomEntry {
                    room_code: room_code(),
                    board: self.new_board(room_id),
                }
            })
            .room_code
            .clone()
    }

    /// Adds a new participant to the room's current session, creating the
    /// room if needed. A completed session is replaced by a new waiting one
    /// first.
    ///
    /// # Errors
    /// [`GameError::AlreadyJoined`] if the participant is already seated in
    /// this or another room.
    pub fn join(
        &self,
        room_id: RoomId,
        participant_id: ParticipantId,
        user_id: u64,
        display_name: &str,
    ) -> Result<ParticipantRow, PairsyncError> {
        self.create_room(room_id);
        let mut guard = self.lock();
        let state = &mut *guard;

        if state.participant_rooms.contains_key(&participant_id) {
            return Err(GameError::AlreadyJoined(participant_id).into());
        }

        let entry = state
            .rooms
            .get_mut(&room_id)
            .ok_or(PairsyncError::UnknownRoom(room_id))?;
        if entry.board.session().status == SessionStatus::Completed {
            entry.board = self.next_board(room_id, &entry.board, &state.presence);
        }

        let row = ParticipantRow::new(participant_id, user_id, room_id, display_name);
        let changes = entry.board.join(row.clone())?;
        self.publish(room_id, &changes);
        state.participant_rooms.insert(participant_id, room_id);
        state.presence.register_participant(participant_id);

        info!(%room_id, %participant_id, display_name, "participant joined");
        Ok(row)
    }

    /// Joins a participant that is new to the room, or marks a returning
    /// one connected again.
    ///
    /// # Errors
    /// [`PairsyncError::ParticipantLeft`] if the participant left the room
    /// for good.
    pub fn connect(
        &self,
        room_id: RoomId,
        participant_id: ParticipantId,
        display_name: Option<&str>,
    ) -> Result<Connected, PairsyncError> {
        {
            let mut guard = self.lock();
            let state = &mut *guard;
            if let Some(entry) = state.rooms.get_mut(&room_id) {
                if let Some(row) = entry.board.participant(participant_id).cloned() {
                    if !row.is_active {
                        return Err(PairsyncError::ParticipantLeft(participant_id, room_id));
                    }
                    state.presence.register_participant(participant_id);
                    let changes = entry.board.set_connected(participant_id, true);
                    self.publish(room_id, &changes);
                    debug!(%room_id, %participant_id, "participant reconnected");
                    return Ok(Connected {
                        participant: row,
                        room_code: entry.room_code.clone(),
                        is_new: false,
                    });
                }
            }
        }

        let name = match display_name {
            Some(name) => name.to_string(),
            None => format!("Player {}", participant_id.0),
        };
        let participant = self.join(room_id, participant_id, participant_id.0, &name)?;
        let room_code = self.room_code(room_id).unwrap_or_default();
        Ok(Connected {
            participant,
            room_code,
            is_new: true,
        })
    }

    /// Soft-removes a participant from its room.
    pub fn leave(&self, participant_id: ParticipantId) -> Result<ParticipantRow, PairsyncError> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let room_id = state.room_of(participant_id)?;
        let entry = state
            .rooms
            .get_mut(&room_id)
            .ok_or(PairsyncError::UnknownRoom(room_id))?;

        let changes = entry.board.leave(participant_id)?;
        self.publish(room_id, &changes);
        let row = entry
            .board
            .participant(participant_id)
            .cloned()
            .ok_or(GameError::UnknownParticipant(participant_id))?;

        state.participant_rooms.remove(&participant_id);
        state.presence.unregister_participant(participant_id);
        info!(%room_id, %participant_id, "participant left");
        Ok(row)
    }

    // -----------------------------------------------------------------------
    // Session lifecycle
    // -----------------------------------------------------------------------

    /// Makes sure the room has a waiting session and returns its id.
    ///
    /// # Errors
    /// [`GameError::SessionAlreadyActive`] while a game is in progress.
    pub fn create_session(&self, room_id: RoomId) -> Result<SessionId, PairsyncError> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let entry = state
            .rooms
            .get_mut(&room_id)
            .ok_or(PairsyncError::UnknownRoom(room_id))?;
        let session = entry.board.session();
        match session.status {
            SessionStatus::Waiting => Ok(session.id),
            SessionStatus::Active => Err(GameError::SessionAlreadyActive {
                room_id,
                active: session.id,
            }
            .into()),
            SessionStatus::Completed => {
                entry.board = self.next_board(room_id, &entry.board, &state.presence);
                Ok(entry.board.session().id)
            }
        }
    }

    /// Deals a deck per [`GameConfig::shuffle`] and starts the room's
    /// session.
    pub fn start_game(&self, room_id: RoomId) -> Result<GameStart, PairsyncError> {
        let deal: fn(SessionId, usize) -> Vec<CardRow> = if self.config.shuffle {
            deck::deal
        } else {
            deck::deal_ordered
        };
        self.start_game_with(room_id, deal)
    }

    /// Starts the room's session with the cards `deal` produces for it.
    ///
    /// # Errors
    /// [`GameError::SessionAlreadyActive`] if a game is already running in
    /// the room, [`GameError::NotEnoughPlayers`] if too few participants are
    /// connected.
    pub fn start_game_with(
        &self,
        room_id: RoomId,
        deal: impl FnOnce(SessionId, usize) -> Vec<CardRow>,
    ) -> Result<GameStart, PairsyncError> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let entry = state
            .rooms
            .get_mut(&room_id)
            .ok_or(PairsyncError::UnknownRoom(room_id))?;

        match entry.board.session().status {
            SessionStatus::Active => {
                return Err(GameError::SessionAlreadyActive {
                    room_id,
                    active: entry.board.session().id,
                }
                .into());
            }
            SessionStatus::Completed => {
                entry.board = self.next_board(room_id, &entry.board, &state.presence);
            }
            SessionStatus::Waiting => {}
        }

        let session_id = entry.board.session().id;
        state.sessions.begin(room_id, session_id)?;

        let cards = deal(session_id, self.config.pair_count);
        let changes = match entry.board.start(cards) {
            Ok(changes) => changes,
            Err(err) => {
                state.sessions.end(room_id, session_id);
                return Err(err.into());
            }
        };
        self.publish(room_id, &changes);

        let first_player_id = entry
            .board
            .session()
            .current_turn_player_id
            .ok_or(GameError::Paused)?;
        Ok(GameStart {
            session_id,
            cards: entry.board.cards().to_vec(),
            first_player_id,
        })
    }

    /// Flips a card for `participant_id` and publishes the resulting rows.
    ///
    /// # Errors
    /// The board's [`GameError`] when the flip is rejected; nothing is
    /// published in that case.
    pub fn flip_card(
        &self,
        participant_id: ParticipantId,
        position: u32,
    ) -> Result<Vec<RowChange>, PairsyncError> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let room_id = state.room_of(participant_id)?;
        let entry = state
            .rooms
            .get_mut(&room_id)
            .ok_or(PairsyncError::UnknownRoom(room_id))?;

        let changes = entry
            .board
            .flip(participant_id, position)
            .inspect_err(|err| debug!(%room_id, %participant_id, position, error = %err, "flip rejected"))?;
        self.publish(room_id, &changes);

        let session = entry.board.session();
        if session.status == SessionStatus::Completed {
            state.sessions.end(room_id, session.id);
        }
        Ok(changes)
    }

    /// Ends the room's active session now, e.g. when its clock ran out.
    pub fn finish(&self, room_id: RoomId) -> Result<(), PairsyncError> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let entry = state
            .rooms
            .get_mut(&room_id)
            .ok_or(PairsyncError::UnknownRoom(room_id))?;

        let changes = entry.board.finish()?;
        self.publish(room_id, &changes);
        state.sessions.end(room_id, entry.board.session().id);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Presence
    // -----------------------------------------------------------------------

    pub fn register_participant(&self, id: ParticipantId) -> bool {
        self.lock().presence.register_participant(id)
    }

    pub fn unregister_participant(&self, id: ParticipantId) -> bool {
        self.lock().presence.unregister_participant(id)
    }

    /// Records a heartbeat. A participant returning from a disconnect is
    /// marked connected on its board again.
    pub fn receive_ping(&self, id: ParticipantId) -> Result<(), PresenceError> {
        let mut guard = self.lock();
        let state = &mut *guard;
        if state.presence.receive_ping(id)? {
            self.set_connected(state, id, true);
        }
        Ok(())
    }

    pub fn get_connection_status(&self, id: ParticipantId) -> Result<ConnectionStatus, PresenceError> {
        self.lock().presence.connection_status(id)
    }

    /// The participant's current authoritative state, or `None` if it is
    /// not seated anywhere.
    pub fn sync_participant_state(&self, id: ParticipantId) -> Option<StateSnapshot> {
        let state = self.lock();
        let room_id = state.participant_rooms.get(&id)?;
        state.rooms.get(room_id)?.board.snapshot(id)
    }

    /// Marks every participant that stopped pinging as disconnected and
    /// returns them.
    pub fn sweep_presence(&self) -> Vec<ParticipantId> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let dropped = state.presence.sweep();
        for &id in &dropped {
            self.set_connected(state, id, false);
        }
        dropped
    }

    /// Marks a participant disconnected right away, e.g. when its socket
    /// closed.
    pub fn disconnect(&self, id: ParticipantId) -> bool {
        let mut guard = self.lock();
        let state = &mut *guard;
        if !state.presence.mark_disconnected(id) {
            return false;
        }
        self.set_connected(state, id, false);
        info!(participant_id = %id, "participant disconnected");
        true
    }

    fn set_connected(&self, state: &mut StoreState, id: ParticipantId, connected: bool) {
        let Some(&room_id) = state.participant_rooms.get(&id) else {
            return;
        };
        if let Some(entry) = state.rooms.get_mut(&room_id) {
            let changes = entry.board.set_connected(id, connected);
            self.publish(room_id, &changes);
        }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub fn room_code(&self, room_id: RoomId) -> Option<String> {
        self.lock()
            .rooms
            .get(&room_id)
            .map(|entry| entry.room_code.clone())
    }

    pub fn active_session(&self, room_id: RoomId) -> Option<SessionId> {
        self.lock().sessions.active(room_id)
    }

    /// The room's current session row, whatever its status.
    pub fn session(&self, room_id: RoomId) -> Option<SessionRow> {
        self.lock()
            .rooms
            .get(&room_id)
            .map(|entry| entry.board.session().clone())
    }

    pub fn participant_room(&self, id: ParticipantId) -> Option<RoomId> {
        self.lock().participant_rooms.get(&id).copied()
    }

    /// `true` while the room's game is active but nobody is connected to
    /// take a turn.
    pub fn is_paused(&self, room_id: RoomId) -> bool {
        self.lock().rooms.get(&room_id).is_some_and(|entry| {
            entry.board.session().status == SessionStatus::Active && entry.board.turns().is_paused()
        })
    }
}

impl PresenceStore for MemoryStore {
    async fn ping(&self, id: ParticipantId) -> Result<(), PresenceError> {
        self.receive_ping(id)
    }

    async fn is_disconnected(&self, id: ParticipantId) -> Result<bool, PresenceError> {
        Ok(self.get_connection_status(id)?.is_disconnected)
    }

    async fn sync(&self, id: ParticipantId) -> Result<Option<StateSnapshot>, PresenceError> {
        if !self.lock().presence.is_tracked(id) {
            return Err(PresenceError::NotFound(id));
        }
        Ok(self.sync_participant_state(id))
    }
}

fn room_code() -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(ROOM_CODE_LEN)
        .map(|b| char::from(b).to_ascii_uppercase())
        .collect()
}
