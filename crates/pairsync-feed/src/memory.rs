//! In-process [`ChangeFeed`] backed by unbounded mpsc channels.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use pairsync_protocol::{RoomId, RowChange};
use tokio::sync::mpsc;

use crate::{ChangeFeed, ChannelId, ChannelSpec, FeedChannel, FeedError, FeedMessage, Resource};

struct OpenChannel {
    spec: ChannelSpec,
    sender: mpsc::UnboundedSender<FeedMessage>,
}

#[derive(Default)]
struct FeedState {
    channels: HashMap<ChannelId, OpenChannel>,
    /// Number of upcoming `open` calls that should fail.
    failing_opens: usize,
}

/// A change feed living entirely in this process.
///
/// The authoritative store calls [`publish`](Self::publish) after every
/// row update; the feed routes the change to each open channel whose spec
/// matches. Broadcasts ride the room's `sessions` channels.
#[derive(Default)]
pub struct MemoryFeed {
    state: Mutex<FeedState>,
    next_id: AtomicU64,
}

impl MemoryFeed {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FeedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Delivers a row change for `room_id` to every matching channel.
    ///
    /// Returns the number of channels it was delivered to.
    pub fn publish(&self, room_id: RoomId, change: RowChange) -> usize {
        let resource = Resource::of(&change);
        let card_session = match &change {
            RowChange::Card { new, .. } => Some(new.session_id),
            _ => None,
        };

        let mut state = self.lock();
        let mut delivered = 0;
        let mut dead = Vec::new();

        for (id, channel) in &state.channels {
            let spec = &channel.spec;
            if spec.room_id != room_id || spec.resource != resource {
                continue;
            }
            if resource == Resource::Cards
                && spec.session_id.is_some()
                && spec.session_id != card_session
            {
                continue;
            }
            if channel.sender.send(FeedMessage::Change(change.clone())).is_ok() {
                delivered += 1;
            } else {
                dead.push(*id);
            }
        }

        for id in dead {
            state.channels.remove(&id);
        }

        tracing::trace!(%room_id, %resource, delivered, "row change published");
        delivered
    }

    /// Makes the next `count` calls to `open` fail with
    /// [`FeedError::ChannelSetup`].
    pub fn fail_next_opens(&self, count: usize) {
        self.lock().failing_opens = count;
    }

    /// Number of channels currently open.
    pub fn open_channel_count(&self) -> usize {
        self.lock().channels.len()
    }

    /// Topics of every open channel, sorted.
    pub fn open_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .lock()
            .channels
            .values()
            .map(|c| c.spec.topic())
            .collect();
        topics.sort();
        topics
    }
}

impl ChangeFeed for MemoryFeed {
    async fn open(&self, spec: ChannelSpec) -> Result<FeedChannel, FeedError> {
        let mut state = self.lock();
        if state.failing_opens > 0 {
            state.failing_opens -= 1;
            return Err(FeedError::ChannelSetup {
                topic: spec.topic(),
                reason: "transport refused the subscription".into(),
            });
        }

        let id = ChannelId::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (sender, receiver) = mpsc::unbounded_channel();
        state.channels.insert(id, OpenChannel { spec, sender });

        tracing::debug!(%id, topic = %spec.topic(), "channel opened");
        Ok(FeedChannel::new(id, spec, receiver))
    }

    fn close(&self, id: ChannelId) {
        if self.lock().channels.remove(&id).is_some() {
            tracing::debug!(%id, "channel closed");
        }
    }

    async fn broadcast(&self, room_id: RoomId, payload: Vec<u8>) -> Result<(), FeedError> {
        let state = self.lock();
        let listeners = state.channels.values().filter(|c| {
            c.spec.room_id == room_id && c.spec.resource == Resource::Sessions
        });
        for channel in listeners {
            // A dropped receiver just means that subscriber went away.
            let _ = channel.sender.send(FeedMessage::Broadcast(payload.clone()));
        }
        Ok(())
    }
}
