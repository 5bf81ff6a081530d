//! Integration tests for the in-process change feed.

use pairsync_feed::{ChangeFeed, ChannelSpec, FeedError, FeedMessage, MemoryFeed, Resource};
use pairsync_protocol::{
    CardRow, MatchState, ParticipantId, ParticipantRow, RoomId, RowChange, SessionId,
};

// =========================================================================
// Helpers
// =========================================================================

fn card_change(session: u64, position: u32) -> RowChange {
    let old = CardRow::face_down(SessionId(session), position, "Chef");
    let new = CardRow {
        match_state: Some(MatchState::M1),
        ..old.clone()
    };
    RowChange::Card { old, new }
}

fn participant_change(room: u64) -> RowChange {
    let old = ParticipantRow::new(ParticipantId(1), 10, RoomId(room), "Ada");
    let new = ParticipantRow {
        pairs_matched: 1,
        ..old.clone()
    };
    RowChange::Participant { old, new }
}

// =========================================================================
// Routing
// =========================================================================

#[tokio::test]
async fn test_publish_routes_by_room_and_resource() {
    let feed = MemoryFeed::new();
    let cards = feed
        .open(ChannelSpec::new(RoomId(1), Resource::Cards, None))
        .await
        .unwrap();
    let mut participants = feed
        .open(ChannelSpec::new(RoomId(1), Resource::Participants, None))
        .await
        .unwrap();

    let delivered = feed.publish(RoomId(1), participant_change(1));

    assert_eq!(delivered, 1);
    assert!(matches!(
        participants.recv().await,
        Some(FeedMessage::Change(RowChange::Participant { .. }))
    ));
    assert!(cards.spec().resource == Resource::Cards);
    assert_eq!(feed.publish(RoomId(2), participant_change(2)), 0);
}

#[tokio::test]
async fn test_publish_card_respects_session_filter() {
    let feed = MemoryFeed::new();
    let mut session_five = feed
        .open(ChannelSpec::new(RoomId(1), Resource::Cards, Some(SessionId(5))))
        .await
        .unwrap();
    let _session_six = feed
        .open(ChannelSpec::new(RoomId(1), Resource::Cards, Some(SessionId(6))))
        .await
        .unwrap();

    let delivered = feed.publish(RoomId(1), card_change(5, 4));

    assert_eq!(delivered, 1, "only the session-5 cards channel matches");
    match session_five.recv().await {
        Some(FeedMessage::Change(RowChange::Card { new, .. })) => assert_eq!(new.position, 4),
        other => panic!("expected card change, got {other:?}"),
    }
}

#[tokio::test]
async fn test_broadcast_reaches_sessions_channels_only() {
    let feed = MemoryFeed::new();
    let mut sessions = feed
        .open(ChannelSpec::new(RoomId(1), Resource::Sessions, None))
        .await
        .unwrap();
    let _cards = feed
        .open(ChannelSpec::new(RoomId(1), Resource::Cards, None))
        .await
        .unwrap();

    feed.broadcast(RoomId(1), b"hello".to_vec()).await.unwrap();

    assert_eq!(
        sessions.recv().await,
        Some(FeedMessage::Broadcast(b"hello".to_vec()))
    );
}

// =========================================================================
// Lifecycle
// =========================================================================

#[tokio::test]
async fn test_close_removes_channel_and_is_idempotent() {
    let feed = MemoryFeed::new();
    let channel = feed
        .open(ChannelSpec::new(RoomId(1), Resource::Sessions, None))
        .await
        .unwrap();
    assert_eq!(feed.open_channel_count(), 1);

    feed.close(channel.id());
    feed.close(channel.id());

    assert_eq!(feed.open_channel_count(), 0);
}

#[tokio::test]
async fn test_dropped_receiver_is_pruned_on_publish() {
    let feed = MemoryFeed::new();
    let channel = feed
        .open(ChannelSpec::new(RoomId(1), Resource::Participants, None))
        .await
        .unwrap();
    drop(channel);

    assert_eq!(feed.publish(RoomId(1), participant_change(1)), 0);
    assert_eq!(feed.open_channel_count(), 0);
}

#[tokio::test]
async fn test_fail_next_opens_returns_channel_setup_error() {
    let feed = MemoryFeed::new();
    feed.fail_next_opens(1);

    let first = feed
        .open(ChannelSpec::new(RoomId(1), Resource::Sessions, None))
        .await;
    let second = feed
        .open(ChannelSpec::new(RoomId(1), Resource::Sessions, None))
        .await;

    assert!(matches!(first, Err(FeedError::ChannelSetup { .. })));
    assert!(second.is_ok(), "only one open was set to fail");
}
