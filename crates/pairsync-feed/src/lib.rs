//! Change-feed abstraction for Pairsync.
//!
//! The authoritative store is an external collaborator. All the core needs
//! from it is a feed that, per room and per resource, delivers
//! `(old_row, new_row)` pairs on update and carries room-scoped broadcast
//! messages. [`ChangeFeed`] is that seam; [`MemoryFeed`] is an in-process
//! implementation used by the in-memory store, the relay, and the tests.
//!
//! ```text
//! Store ──(row update)──→ ChangeFeed ──(FeedMessage)──→ FeedChannel ──→ Bus
//! ```

mod error;
mod memory;

pub use error::FeedError;
pub use memory::MemoryFeed;

use std::fmt;
use std::future::Future;

use pairsync_protocol::{RoomId, RowChange, SessionId};
use tokio::sync::mpsc;

/// The three logical resources watched per room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Sessions,
    Cards,
    Participants,
}

impl Resource {
    /// Every resource, in the order channels are opened.
    pub const ALL: [Resource; 3] = [Self::Sessions, Self::Cards, Self::Participants];

    /// Which resource a row change belongs to.
    pub fn of(change: &RowChange) -> Self {
        match change {
            RowChange::Session { .. } => Self::Sessions,
            RowChange::Card { .. } => Self::Cards,
            RowChange::Participant { .. } => Self::Participants,
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sessions => write!(f, "sessions"),
            Self::Cards => write!(f, "cards"),
            Self::Participants => write!(f, "participants"),
        }
    }
}

/// What a channel watches.
///
/// Card rows are keyed by session, not room, so a cards channel carries the
/// session it filters on. `session_id: None` on a cards channel means "every
/// card in the room".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelSpec {
    pub room_id: RoomId,
    pub resource: Resource,
    pub session_id: Option<SessionId>,
}

impl ChannelSpec {
    pub fn new(room_id: RoomId, resource: Resource, session_id: Option<SessionId>) -> Self {
        Self {
            room_id,
            resource,
            session_id,
        }
    }

    /// Human-readable topic name, used in logs and errors.
    pub fn topic(&self) -> String {
        match (self.resource, self.session_id) {
            (Resource::Cards, Some(session_id)) => {
                format!("room:{}:cards:{}", self.room_id, session_id)
            }
            (resource, _) => format!("room:{}:{}", self.room_id, resource),
        }
    }
}

/// Opaque identifier for an open channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(u64);

impl ChannelId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chan-{}", self.0)
    }
}

/// One message delivered on a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedMessage {
    /// A row was updated.
    Change(RowChange),
    /// A room-scoped broadcast, still encoded.
    Broadcast(Vec<u8>),
}

/// The receiving end of an open channel.
#[derive(Debug)]
pub struct FeedChannel {
    id: ChannelId,
    spec: ChannelSpec,
    receiver: mpsc::UnboundedReceiver<FeedMessage>,
}

impl FeedChannel {
    pub fn new(
        id: ChannelId,
        spec: ChannelSpec,
        receiver: mpsc::UnboundedReceiver<FeedMessage>,
    ) -> Self {
        Self { id, spec, receiver }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn spec(&self) -> &ChannelSpec {
        &self.spec
    }

    /// Waits for the next message. `None` once the feed closed the channel.
    pub async fn recv(&mut self) -> Option<FeedMessage> {
        self.receiver.recv().await
    }
}

/// A row-oriented change feed with room-scoped broadcast.
///
/// The futures are `Send` so the bus can drive them from spawned tasks.
pub trait ChangeFeed: Send + Sync + 'static {
    /// Opens a channel for `spec`.
    ///
    /// # Errors
    /// [`FeedError::ChannelSetup`] if the transport cannot open it.
    fn open(
        &self,
        spec: ChannelSpec,
    ) -> impl Future<Output = Result<FeedChannel, FeedError>> + Send;

    /// Closes a channel. Closing an unknown or already-closed channel is a
    /// no-op.
    fn close(&self, id: ChannelId);

    /// Sends an encoded message to every listener of the room.
    fn broadcast(
        &self,
        room_id: RoomId,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<(), FeedError>> + Send;
}
