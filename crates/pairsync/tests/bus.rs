//! Integration tests for the session event bus over an in-process feed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pairsync::feed::{ChannelId, ChannelSpec, FeedChannel, FeedError};
use pairsync::prelude::*;

const ROOM: RoomId = RoomId(1);

// =========================================================================
// Helpers
// =========================================================================

type Log = Arc<Mutex<Vec<GameEvent>>>;

fn recorder() -> (Subscriber, Log) {
    let log: Log = Arc::default();
    let sink = Arc::clone(&log);
    let subscriber = Subscriber::new(move |event| sink.lock().unwrap().push(event.clone()));
    (subscriber, log)
}

fn kinds(log: &Log) -> Vec<&'static str> {
    log.lock().unwrap().iter().map(GameEvent::kind).collect()
}

/// Waits until `log` holds at least `n` events.
async fn wait_for(log: &Log, n: usize) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while log.lock().unwrap().len() < n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("events should arrive");
}

/// Gives the pump time to deliver anything still in flight.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

fn card_flip(session_id: SessionId, position: u32, name: &str) -> RowChange {
    let old = CardRow::face_down(session_id, position, name);
    let new = CardRow {
        match_state: Some(MatchState::M1),
        ..old.clone()
    };
    RowChange::Card { old, new }
}

/// Fails exactly the `fail_at`-th call to `open`.
struct FlakyFeed {
    inner: MemoryFeed,
    opens: AtomicUsize,
    fail_at: usize,
}

impl FlakyFeed {
    fn failing_at(fail_at: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryFeed::new(),
            opens: AtomicUsize::new(0),
            fail_at,
        })
    }
}

impl ChangeFeed for FlakyFeed {
    async fn open(&self, spec: ChannelSpec) -> Result<FeedChannel, FeedError> {
        let n = self.opens.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.fail_at {
            return Err(FeedError::ChannelSetup {
                topic: spec.topic(),
                reason: "flaky transport".into(),
            });
        }
        self.inner.open(spec).await
    }

    fn close(&self, id: ChannelId) {
        self.inner.close(id);
    }

    async fn broadcast(&self, room_id: RoomId, payload: Vec<u8>) -> Result<(), FeedError> {
        self.inner.broadcast(room_id, payload).await
    }
}

// =========================================================================
// Subscription
// =========================================================================

#[tokio::test]
async fn test_subscribe_same_subscriber_twice_delivers_once() {
    let feed = Arc::new(MemoryFeed::new());
    let bus = SessionEventBus::new(Arc::clone(&feed));
    let (subscriber, log) = recorder();

    bus.subscribe(ROOM, &subscriber, None).await.unwrap();
    bus.subscribe(ROOM, &subscriber.clone(), None).await.unwrap();

    let subs = bus.get_active_subscriptions().await;
    assert_eq!(subs.len(), 1);
    assert_eq!(subs[0].subscriber_count, 1);
    assert_eq!(feed.open_channel_count(), 3);

    feed.publish(ROOM, card_flip(SessionId(1), 4, "Pilot"));
    wait_for(&log, 1).await;
    settle().await;

    assert_eq!(kinds(&log), ["card_flipped"]);
}

#[tokio::test]
async fn test_subscribe_opens_three_channels_per_room() {
    let feed = Arc::new(MemoryFeed::new());
    let bus = SessionEventBus::new(Arc::clone(&feed));
    let (subscriber, _log) = recorder();

    bus.subscribe(ROOM, &subscriber, Some(SessionId(5))).await.unwrap();

    assert_eq!(
        feed.open_topics(),
        [
            "room:R-1:cards:S-5",
            "room:R-1:participants",
            "room:R-1:sessions",
        ]
    );
}

#[tokio::test]
async fn test_new_session_reopens_all_channels_and_keeps_subscribers() {
    let feed = Arc::new(MemoryFeed::new());
    let bus = SessionEventBus::new(Arc::clone(&feed));
    let (first, first_log) = recorder();
    let (second, second_log) = recorder();

    bus.subscribe(ROOM, &first, Some(SessionId(1))).await.unwrap();
    bus.subscribe(ROOM, &second, Some(SessionId(2))).await.unwrap();

    assert_eq!(feed.open_channel_count(), 3);
    assert!(feed.open_topics().contains(&"room:R-1:cards:S-2".to_string()));
    let subs = bus.get_active_subscriptions().await;
    assert_eq!(subs[0].session_id, Some(SessionId(2)));
    assert_eq!(subs[0].subscriber_count, 2);

    feed.publish(ROOM, card_flip(SessionId(1), 0, "Chef"));
    feed.publish(ROOM, card_flip(SessionId(2), 3, "Nurse"));
    wait_for(&first_log, 1).await;
    wait_for(&second_log, 1).await;
    settle().await;

    for log in [&first_log, &second_log] {
        let events = log.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].position(), Some(3));
    }
}

#[tokio::test]
async fn test_subscribe_without_session_keeps_open_channels() {
    let feed = Arc::new(MemoryFeed::new());
    let bus = SessionEventBus::new(Arc::clone(&feed));
    let (first, _) = recorder();
    let (second, _) = recorder();

    bus.subscribe(ROOM, &first, Some(SessionId(1))).await.unwrap();
    let topics = feed.open_topics();
    bus.subscribe(ROOM, &second, None).await.unwrap();

    assert_eq!(feed.open_topics(), topics);
}

#[tokio::test]
async fn test_unsubscribe_last_subscriber_closes_channels() {
    let feed = Arc::new(MemoryFeed::new());
    let bus = SessionEventBus::new(Arc::clone(&feed));
    let (a, _) = recorder();
    let (b, _) = recorder();
    bus.subscribe(ROOM, &a, None).await.unwrap();
    bus.subscribe(ROOM, &b, None).await.unwrap();

    bus.unsubscribe(ROOM, Some(&a)).await;
    assert_eq!(feed.open_channel_count(), 3);

    bus.unsubscribe(ROOM, Some(&b)).await;
    assert_eq!(feed.open_channel_count(), 0);
    assert!(bus.get_subscribed_rooms().await.is_empty());
}

#[tokio::test]
async fn test_unsubscribe_without_subscriber_removes_everyone() {
    let feed = Arc::new(MemoryFeed::new());
    let bus = SessionEventBus::new(Arc::clone(&feed));
    let (a, a_log) = recorder();
    let (b, _) = recorder();
    bus.subscribe(ROOM, &a, None).await.unwrap();
    bus.subscribe(ROOM, &b, None).await.unwrap();
    bus.subscribe(RoomId(2), &a, None).await.unwrap();

    bus.unsubscribe(ROOM, None).await;

    assert_eq!(bus.get_subscribed_rooms().await, [RoomId(2)]);
    feed.publish(ROOM, card_flip(SessionId(1), 0, "Chef"));
    settle().await;
    assert!(a_log.lock().unwrap().is_empty());

    bus.unsubscribe_all().await;
    assert_eq!(feed.open_channel_count(), 0);
}

#[tokio::test]
async fn test_channel_setup_failure_rolls_back_opened_channels() {
    let feed = FlakyFeed::failing_at(3);
    let bus = SessionEventBus::new(Arc::clone(&feed));
    let (subscriber, _) = recorder();

    let err = bus.subscribe(ROOM, &subscriber, None).await.unwrap_err();

    assert!(matches!(
        err,
        PairsyncError::Feed(FeedError::ChannelSetup { .. })
    ));
    assert_eq!(feed.inner.open_channel_count(), 0);
    assert!(bus.get_active_subscriptions().await.is_empty());

    // The bus does not retry; a second subscribe from the caller works.
    bus.subscribe(ROOM, &subscriber, None).await.unwrap();
    assert_eq!(feed.inner.open_channel_count(), 3);
}

#[tokio::test]
async fn test_failed_reopen_drops_room() {
    let feed = Arc::new(MemoryFeed::new());
    let bus = SessionEventBus::new(Arc::clone(&feed));
    let (subscriber, _) = recorder();
    bus.subscribe(ROOM, &subscriber, Some(SessionId(1))).await.unwrap();

    feed.fail_next_opens(1);
    let result = bus.subscribe(ROOM, &subscriber, Some(SessionId(2))).await;

    assert!(result.is_err());
    assert_eq!(feed.open_channel_count(), 0);
    assert!(bus.get_subscribed_rooms().await.is_empty());
}

// =========================================================================
// Delivery
// =========================================================================

#[tokio::test]
async fn test_panicking_subscriber_does_not_block_later_subscribers() {
    let feed = Arc::new(MemoryFeed::new());
    let bus = SessionEventBus::new(Arc::clone(&feed));
    let panicker = Subscriber::new(|_| panic!("subscriber bug"));
    let (subscriber, log) = recorder();

    bus.subscribe(ROOM, &panicker, None).await.unwrap();
    bus.subscribe(ROOM, &subscriber, None).await.unwrap();

    feed.publish(ROOM, card_flip(SessionId(1), 1, "Judge"));
    feed.publish(ROOM, card_flip(SessionId(1), 2, "Baker"));
    wait_for(&log, 2).await;

    assert_eq!(kinds(&log), ["card_flipped", "card_flipped"]);
}

#[tokio::test]
async fn test_events_from_one_change_arrive_in_derivation_order() {
    let feed = Arc::new(MemoryFeed::new());
    let bus = SessionEventBus::new(Arc::clone(&feed));
    let (subscriber, log) = recorder();
    bus.subscribe(ROOM, &subscriber, None).await.unwrap();

    let old = ParticipantRow {
        pairs_matched: 2,
        current_streak: 2,
        max_streak: 2,
        ..ParticipantRow::new(ParticipantId(1), 10, ROOM, "Ada")
    };
    let new = ParticipantRow {
        pairs_matched: 3,
        current_streak: 3,
        max_streak: 3,
        ..old.clone()
    };
    feed.publish(ROOM, RowChange::Participant { old, new });
    wait_for(&log, 2).await;

    assert_eq!(kinds(&log), ["player_stats_updated", "streak_bonus"]);
}

#[tokio::test]
async fn test_broadcast_reaches_subscribers_of_other_bus() {
    let feed = Arc::new(MemoryFeed::new());
    let listener = SessionEventBus::new(Arc::clone(&feed));
    let sender = SessionEventBus::new(Arc::clone(&feed));
    let (subscriber, log) = recorder();
    listener.subscribe(ROOM, &subscriber, None).await.unwrap();

    sender.broadcast_time_warning(ROOM, 10).await.unwrap();
    wait_for(&log, 1).await;

    assert_eq!(log.lock().unwrap()[0], GameEvent::time_warning(10));
    assert!(sender.get_subscribed_rooms().await.is_empty());
}

#[tokio::test]
async fn test_broadcast_is_scoped_to_room() {
    let feed = Arc::new(MemoryFeed::new());
    let bus = SessionEventBus::new(Arc::clone(&feed));
    let (subscriber, log) = recorder();
    bus.subscribe(RoomId(2), &subscriber, None).await.unwrap();

    bus.broadcast_card_reset(ROOM, 4).await.unwrap();
    settle().await;

    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_notify_stays_local() {
    let feed = Arc::new(MemoryFeed::new());
    let local = SessionEventBus::new(Arc::clone(&feed));
    let remote = SessionEventBus::new(Arc::clone(&feed));
    let (local_sub, local_log) = recorder();
    let (remote_sub, remote_log) = recorder();
    local.subscribe(ROOM, &local_sub, None).await.unwrap();
    remote.subscribe(ROOM, &remote_sub, None).await.unwrap();

    local.notify(ROOM, &GameEvent::card_reset(7)).await;
    settle().await;

    assert_eq!(kinds(&local_log), ["card_reset"]);
    assert!(remote_log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_broadcast_match_found_carries_award() {
    let feed = Arc::new(MemoryFeed::new());
    let bus = SessionEventBus::new(Arc::clone(&feed));
    let (subscriber, log) = recorder();
    bus.subscribe(ROOM, &subscriber, None).await.unwrap();

    let award = MatchAward {
        player_id: ParticipantId(1),
        card_1_position: 4,
        card_2_position: 9,
        pair_id: "pilot".into(),
        xp_earned: 10,
        consecutive_matches: 1,
    };
    bus.broadcast_match_found(ROOM, 9, "Pilot", "Ada", award)
        .await
        .unwrap();
    wait_for(&log, 1).await;

    match &log.lock().unwrap()[0] {
        GameEvent::MatchFound {
            position,
            match_state,
            xp_earned,
            card_1_position,
            ..
        } => {
            assert_eq!(*position, 9);
            assert_eq!(*match_state, MatchState::M3);
            assert_eq!(*xp_earned, Some(10));
            assert_eq!(*card_1_position, Some(4));
        }
        other => panic!("expected match_found, got {other:?}"),
    }
}

// =========================================================================
// Leaderboard
// =========================================================================

#[tokio::test]
async fn test_leaderboard_follows_participant_feed() {
    let feed = Arc::new(MemoryFeed::new());
    let bus = SessionEventBus::new(Arc::clone(&feed));
    let (subscriber, log) = recorder();
    bus.subscribe(ROOM, &subscriber, None).await.unwrap();

    let ada = ParticipantRow::new(ParticipantId(1), 10, ROOM, "Ada");
    let bo = ParticipantRow::new(ParticipantId(2), 20, ROOM, "Bo");
    bus.broadcast_player_joined(ROOM, &ada, "ABC123").await.unwrap();
    bus.broadcast_player_joined(ROOM, &bo, "ABC123").await.unwrap();
    wait_for(&log, 2).await;

    feed.publish(
        ROOM,
        RowChange::Participant {
            old: bo.clone(),
            new: ParticipantRow {
                pairs_matched: 1,
                current_streak: 1,
                max_streak: 1,
                total_xp: 10,
                ..bo.clone()
            },
        },
    );
    wait_for(&log, 3).await;

    let board: Vec<String> = bus
        .leaderboard(ROOM)
        .await
        .into_iter()
        .map(|p| p.display_name)
        .collect();
    assert_eq!(board, ["Bo", "Ada"]);
}
