//! Per-room event fan-out over a change feed.
//!
//! The [`SessionEventBus`] owns three feed channels per subscribed room
//! (`sessions`, `cards`, `participants`). One pump task per room reads all
//! three, turns every row change into [`GameEvent`]s, and hands each event
//! to every subscriber of the room in registration order.
//!
//! ```text
//! ChangeFeed ──(sessions)─────┐
//! ChangeFeed ──(cards)────────┼──→ pump ──→ derive_events ──→ subscribers
//! ChangeFeed ──(participants)─┘
//! ```
//!
//! Events raised without a row change (time warnings, the authoritative
//! `game_started`, ...) are encoded and sent with [`SessionEventBus::broadcast`].
//! They come back through the room's `sessions` channel on every bus
//! listening to that room, this one included.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::StreamExt;
use futures_util::stream;
use pairsync_feed::{ChangeFeed, ChannelId, ChannelSpec, FeedChannel, FeedMessage, Resource};
use pairsync_game::{ParticipantRegistry, derive_events};
use pairsync_protocol::{
    CardRow, Codec, GameEvent, JsonCodec, MatchAward, MatchState, ParticipantId, ParticipantRow,
    RoomId, RowChange, SessionId,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::PairsyncError;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Subscriber
// ---------------------------------------------------------------------------

/// A callback registered for a room's events.
///
/// Subscribers compare by identity: clones of one `Subscriber` are the same
/// subscriber, two `Subscriber`s wrapping identical closures are not.
#[derive(Clone)]
pub struct Subscriber(Arc<dyn Fn(&GameEvent) + Send + Sync>);

impl Subscriber {
    pub fn new(callback: impl Fn(&GameEvent) + Send + Sync + 'static) -> Self {
        Self(Arc::new(callback))
    }

    pub fn same(&self, other: &Subscriber) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.0), Arc::as_ptr(&other.0))
    }

    /// Runs the callback. Returns `false` if it panicked.
    fn deliver(&self, event: &GameEvent) -> bool {
        panic::catch_unwind(AssertUnwindSafe(|| (self.0)(event))).is_ok()
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Subscriber({:p})", Arc::as_ptr(&self.0))
    }
}

/// One room's subscription, as reported by
/// [`SessionEventBus::get_active_subscriptions`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionInfo {
    pub room_id: RoomId,
    /// Session the cards channel filters on. `None` watches every card in
    /// the room.
    pub session_id: Option<SessionId>,
    pub subscriber_count: usize,
}

type Subscribers = Arc<Mutex<Vec<Subscriber>>>;
type Registry = Arc<Mutex<ParticipantRegistry>>;

struct RoomChannels {
    session_id: Option<SessionId>,
    channel_ids: Vec<ChannelId>,
    subscribers: Subscribers,
    registry: Registry,
    pump: JoinHandle<()>,
}

impl RoomChannels {
    fn shutdown<F: ChangeFeed>(self, feed: &F) {
        self.pump.abort();
        for id in self.channel_ids {
            feed.close(id);
        }
    }
}

// ---------------------------------------------------------------------------
// SessionEventBus
// ---------------------------------------------------------------------------

/// Subscribes callbacks to rooms and fans derived events out to them.
///
/// One bus serves every room of a process. Rooms are independent: each has
/// its own channels, subscriber list, pump task, and participant registry.
pub struct SessionEventBus<F: ChangeFeed, C: Codec = JsonCodec> {
    feed: Arc<F>,
    codec: C,
    rooms: tokio::sync::Mutex<HashMap<RoomId, RoomChannels>>,
}

impl<F: ChangeFeed> SessionEventBus<F> {
    pub fn new(feed: Arc<F>) -> Self {
        Self::with_codec(feed, JsonCodec)
    }
}

impl<F: ChangeFeed, C: Codec> SessionEventBus<F, C> {
    pub fn with_codec(feed: Arc<F>, codec: C) -> Self {
        Self {
            feed,
            codec,
            rooms: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn feed(&self) -> &Arc<F> {
        &self.feed
    }

    // -----------------------------------------------------------------------
    // Subscription
    // -----------------------------------------------------------------------

    /// Registers `subscriber` for `room_id`.
    ///
    /// Registering the same subscriber twice is a no-op. The first
    /// subscriber of a room opens its three channels. A `session_id` that
    /// differs from the one the channels were opened with closes them and
    /// reopens all three scoped to the new session; `None` keeps whatever is
    /// open.
    ///
    /// # Errors
    /// [`PairsyncError::Feed`] if a channel could not be opened. Channels
    /// opened before the failure are closed again and the room is left
    /// without a subscription; the caller decides whether to retry.
    pub async fn subscribe(
        &self,
        room_id: RoomId,
        subscriber: &Subscriber,
        session_id: Option<SessionId>,
    ) -> Result<(), PairsyncError> {
        let mut rooms = self.rooms.lock().await;

        let reopen = match rooms.get(&room_id) {
            None => true,
            Some(room) => session_id.is_some_and(|id| room.session_id != Some(id)),
        };

        if reopen {
            let (subscribers, registry) = match rooms.remove(&room_id) {
                Some(previous) => {
                    debug!(%room_id, from = ?previous.session_id, to = ?session_id, "session changed, reopening channels");
                    let shared = (
                        Arc::clone(&previous.subscribers),
                        Arc::clone(&previous.registry),
                    );
                    previous.shutdown(self.feed.as_ref());
                    shared
                }
                None => Default::default(),
            };

            let room = self
                .open_room(room_id, session_id, subscribers, registry)
                .await
                .inspect_err(|err| warn!(%room_id, error = %err, "room subscription failed"))?;
            rooms.insert(room_id, room);
        }

        if let Some(room) = rooms.get(&room_id) {
            let mut subscribers = lock(&room.subscribers);
            if subscribers.iter().any(|s| s.same(subscriber)) {
                debug!(%room_id, "subscriber already registered");
            } else {
                subscribers.push(subscriber.clone());
                info!(%room_id, subscribers = subscribers.len(), "subscribed to room");
            }
        }
        Ok(())
    }

    /// Removes `subscriber` from `room_id`, or every subscriber when `None`.
    ///
    /// Once a room has no subscribers left its channels are closed and its
    /// pump stops.
    pub async fn unsubscribe(&self, room_id: RoomId, subscriber: Option<&Subscriber>) {
        let mut rooms = self.rooms.lock().await;
        let Some(room) = rooms.get(&room_id) else {
            return;
        };

        let now_empty = {
            let mut subscribers = lock(&room.subscribers);
            match subscriber {
                Some(target) => subscribers.retain(|s| !s.same(target)),
                None => subscribers.clear(),
            }
            subscribers.is_empty()
        };

        if now_empty {
            if let Some(room) = rooms.remove(&room_id) {
                room.shutdown(self.feed.as_ref());
                info!(%room_id, "last subscriber left, channels closed");
            }
        }
    }

    /// Drops every room subscription.
    pub async fn unsubscribe_all(&self) {
        let mut rooms = self.rooms.lock().await;
        let count = rooms.len();
        for (_, room) in rooms.drain() {
            room.shutdown(self.feed.as_ref());
        }
        info!(rooms = count, "unsubscribed from all rooms");
    }

    async fn open_room(
        &self,
        room_id: RoomId,
        session_id: Option<SessionId>,
        subscribers: Subscribers,
        registry: Registry,
    ) -> Result<RoomChannels, PairsyncError> {
        let mut opened = Vec::with_capacity(Resource::ALL.len());
        for resource in Resource::ALL {
            let spec = ChannelSpec::new(room_id, resource, session_id);
            match self.feed.open(spec).await {
                Ok(channel) => opened.push(channel),
                Err(err) => {
                    for channel in &opened {
                        self.feed.close(channel.id());
                    }
                    return Err(err.into());
                }
            }
        }

        let channel_ids = opened.iter().map(FeedChannel::id).collect();
        let pump = tokio::spawn(pump(
            room_id,
            opened,
            self.codec.clone(),
            Arc::clone(&subscribers),
            Arc::clone(&registry),
        ));

        Ok(RoomChannels {
            session_id,
            channel_ids,
            subscribers,
            registry,
            pump,
        })
    }

    // -----------------------------------------------------------------------
    // Delivery
    // -----------------------------------------------------------------------

    /// Hands `event` to the room's local subscribers only, in registration
    /// order. Nothing goes over the feed.
    pub async fn notify(&self, room_id: RoomId, event: &GameEvent) {
        let subscribers = {
            let rooms = self.rooms.lock().await;
            match rooms.get(&room_id) {
                Some(room) => Arc::clone(&room.subscribers),
                None => return,
            }
        };
        fan_out(room_id, &subscribers, std::slice::from_ref(event));
    }

    /// Sends `event` to every listener of the room through the feed.
    ///
    /// # Errors
    /// [`PairsyncError::Protocol`] if the event cannot be encoded,
    /// [`PairsyncError::Feed`] if the feed refuses it.
    pub async fn broadcast(&self, room_id: RoomId, event: &GameEvent) -> Result<(), PairsyncError> {
        let payload = self.codec.encode(event)?;
        self.feed.broadcast(room_id, payload).await?;
        debug!(%room_id, event = event.kind(), "event broadcast");
        Ok(())
    }

    pub async fn broadcast_player_joined(
        &self,
        room_id: RoomId,
        player: &ParticipantRow,
        room_code: &str,
    ) -> Result<(), PairsyncError> {
        let event = GameEvent::PlayerJoined {
            player: player.clone(),
            room_code: room_code.to_string(),
        };
        self.broadcast(room_id, &event).await
    }

    pub async fn broadcast_player_left(
        &self,
        room_id: RoomId,
        player_id: ParticipantId,
        display_name: &str,
    ) -> Result<(), PairsyncError> {
        let event = GameEvent::PlayerLeft {
            player_id,
            display_name: display_name.to_string(),
        };
        self.broadcast(room_id, &event).await
    }

    pub async fn broadcast_game_started(
        &self,
        room_id: RoomId,
        cards: Vec<CardRow>,
        first_player_id: ParticipantId,
        started_at: u64,
    ) -> Result<(), PairsyncError> {
        let event = GameEvent::GameStarted {
            cards,
            first_player_id,
            started_at,
        };
        self.broadcast(room_id, &event).await
    }

    /// Server-authoritative flip: carries the card and the actor.
    pub async fn broadcast_card_flipped(
        &self,
        room_id: RoomId,
        position: u32,
        career_name: &str,
        player_id: ParticipantId,
    ) -> Result<(), PairsyncError> {
        let event = GameEvent::CardFlipped {
            position,
            career_name: Some(career_name.to_string()),
            player_id: Some(player_id),
            is_first_flip: None,
            match_state: Some(MatchState::M1),
        };
        self.broadcast(room_id, &event).await
    }

    pub async fn broadcast_match_detected(
        &self,
        room_id: RoomId,
        position: u32,
        career_name: &str,
    ) -> Result<(), PairsyncError> {
        let event = GameEvent::MatchDetected {
            position,
            career_name: career_name.to_string(),
            match_state: MatchState::M2,
        };
        self.broadcast(room_id, &event).await
    }

    pub async fn broadcast_match_found(
        &self,
        room_id: RoomId,
        position: u32,
        career_name: &str,
        player_name: &str,
        award: MatchAward,
    ) -> Result<(), PairsyncError> {
        let event = GameEvent::match_found_with_award(position, career_name, player_name, award);
        self.broadcast(room_id, &event).await
    }

    pub async fn broadcast_no_match(
        &self,
        room_id: RoomId,
        player_id: ParticipantId,
        card_1_position: u32,
        card_2_position: u32,
    ) -> Result<(), PairsyncError> {
        let event = GameEvent::NoMatch {
            player_id,
            card_1_position,
            card_2_position,
        };
        self.broadcast(room_id, &event).await
    }

    pub async fn broadcast_card_reset(
        &self,
        room_id: RoomId,
        position: u32,
    ) -> Result<(), PairsyncError> {
        self.broadcast(room_id, &GameEvent::card_reset(position)).await
    }

    pub async fn broadcast_turn_changed(
        &self,
        room_id: RoomId,
        previous_player_id: Option<ParticipantId>,
        next_player_id: ParticipantId,
        next_player_name: Option<String>,
        turn_number: u32,
    ) -> Result<(), PairsyncError> {
        let event = GameEvent::TurnChanged {
            previous_player_id,
            next_player_id,
            next_player_name,
            turn_number,
        };
        self.broadcast(room_id, &event).await
    }

    pub async fn broadcast_game_ended(
        &self,
        room_id: RoomId,
        winners: Vec<ParticipantId>,
        total_turns: Option<u32>,
        duration_seconds: Option<u64>,
        ended_at: Option<u64>,
    ) -> Result<(), PairsyncError> {
        let event = GameEvent::GameEnded {
            winners,
            total_turns,
            duration_seconds,
            ended_at,
        };
        self.broadcast(room_id, &event).await
    }

    pub async fn broadcast_streak_bonus(
        &self,
        room_id: RoomId,
        player_id: ParticipantId,
        player_name: &str,
        streak_count: u32,
        bonus_xp: Option<u64>,
    ) -> Result<(), PairsyncError> {
        let event = GameEvent::StreakBonus {
            player_id,
            player_name: player_name.to_string(),
            streak_count,
            bonus_xp,
        };
        self.broadcast(room_id, &event).await
    }

    pub async fn broadcast_player_stats_updated(
        &self,
        room_id: RoomId,
        player: &ParticipantRow,
    ) -> Result<(), PairsyncError> {
        let event = GameEvent::PlayerStatsUpdated {
            player_id: player.id,
            user_id: player.user_id,
            display_name: player.display_name.clone(),
            pairs_matched: player.pairs_matched,
            total_xp: player.total_xp,
            arcade_xp: player.arcade_xp,
            current_streak: player.current_streak,
            max_streak: player.max_streak,
        };
        self.broadcast(room_id, &event).await
    }

    pub async fn broadcast_time_warning(
        &self,
        room_id: RoomId,
        seconds_remaining: u64,
    ) -> Result<(), PairsyncError> {
        self.broadcast(room_id, &GameEvent::time_warning(seconds_remaining))
            .await
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    /// Every subscribed room, ordered by room id.
    pub async fn get_active_subscriptions(&self) -> Vec<SubscriptionInfo> {
        let rooms = self.rooms.lock().await;
        let mut infos: Vec<SubscriptionInfo> = rooms
            .iter()
            .map(|(&room_id, room)| SubscriptionInfo {
                room_id,
                session_id: room.session_id,
                subscriber_count: lock(&room.subscribers).len(),
            })
            .collect();
        infos.sort_by_key(|info| info.room_id);
        infos
    }

    pub async fn get_subscribed_rooms(&self) -> Vec<RoomId> {
        let mut rooms: Vec<RoomId> = self.rooms.lock().await.keys().copied().collect();
        rooms.sort();
        rooms
    }

    /// Participants seen on the room's feed, best first.
    pub async fn leaderboard(&self, room_id: RoomId) -> Vec<ParticipantRow> {
        let rooms = self.rooms.lock().await;
        match rooms.get(&room_id) {
            Some(room) => lock(&room.registry).leaderboard(),
            None => Vec::new(),
        }
    }
}

impl<F: ChangeFeed, C: Codec> Drop for SessionEventBus<F, C> {
    fn drop(&mut self) {
        for (_, room) in self.rooms.get_mut().drain() {
            room.shutdown(self.feed.as_ref());
        }
    }
}

// ---------------------------------------------------------------------------
// Pump
// ---------------------------------------------------------------------------

/// Reads a room's channels until they close. Each message is fully fanned
/// out before the next one is read.
async fn pump<C: Codec>(
    room_id: RoomId,
    channels: Vec<FeedChannel>,
    codec: C,
    subscribers: Subscribers,
    registry: Registry,
) {
    let mut messages = stream::select_all(channels.into_iter().map(|channel| {
        Box::pin(stream::unfold(channel, |mut channel| async move {
            let message = channel.recv().await?;
            Some((message, channel))
        }))
    }));

    while let Some(message) = messages.next().await {
        let events = derive(room_id, message, &codec, &registry);
        fan_out(room_id, &subscribers, &events);
    }
    debug!(%room_id, "room pump finished");
}

fn derive<C: Codec>(
    room_id: RoomId,
    message: FeedMessage,
    codec: &C,
    registry: &Mutex<ParticipantRegistry>,
) -> Vec<GameEvent> {
    match message {
        FeedMessage::Change(RowChange::Participant { old, new }) => {
            lock(registry).apply(&old, &new)
        }
        FeedMessage::Change(change) => derive_events(&change),
        FeedMessage::Broadcast(payload) => match codec.decode::<GameEvent>(&payload) {
            Ok(event) => {
                if let GameEvent::PlayerJoined { player, .. } = &event {
                    lock(registry).insert(player.clone());
                }
                vec![event]
            }
            Err(err) => {
                warn!(%room_id, error = %err, "dropping undecodable broadcast");
                Vec::new()
            }
        },
    }
}

fn fan_out(room_id: RoomId, subscribers: &Mutex<Vec<Subscriber>>, events: &[GameEvent]) {
    if events.is_empty() {
        return;
    }
    let targets = lock(subscribers).clone();
    for event in events {
        for subscriber in &targets {
            if !subscriber.deliver(event) {
                warn!(%room_id, event = event.kind(), "subscriber panicked");
            }
        }
    }
}
