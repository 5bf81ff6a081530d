//! # Pairsync
//!
//! Real-time room synchronization for a turn-based memory match game.
//!
//! An authoritative store owns the rows (sessions, cards, participants) and
//! publishes every update to a change feed. Pairsync watches that feed per
//! room, derives typed [`GameEvent`](protocol::GameEvent)s from each `(old, new)` row pair, and
//! fans them out to every subscriber of the room.
//!
//! ```text
//! MemoryStore ──(RowChange)──→ ChangeFeed ──→ SessionEventBus ──→ subscribers
//!      ↑                                                              │
//!      └──────────── RelayServer (WebSocket clients) ←────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pairsync::prelude::*;
//!
//! # async fn run() -> Result<(), PairsyncError> {
//! let relay = RelayServer::builder()
//!     .bind("0.0.0.0:8080")
//!     .clock_config(ClockConfig::with_limit(std::time::Duration::from_secs(300)))
//!     .build()
//!     .await?;
//! relay.run().await
//! # }
//! ```
//!
//! In-process use skips the relay entirely:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pairsync::prelude::*;
//!
//! # async fn run() -> Result<(), PairsyncError> {
//! let feed = Arc::new(MemoryFeed::new());
//! let store = MemoryStore::new(Arc::clone(&feed), GameConfig::default(), PresenceConfig::default());
//! let bus = SessionEventBus::new(feed);
//!
//! let subscriber = Subscriber::new(|event| println!("{}", event.kind()));
//! bus.subscribe(RoomId(1), &subscriber, None).await?;
//! store.join(RoomId(1), ParticipantId(1), 100, "Ada")?;
//! store.start_game(RoomId(1))?;
//! # Ok(())
//! # }
//! ```

mod bus;
mod driver;
mod error;
mod handler;
mod server;
mod store;

pub use bus::{SessionEventBus, Subscriber, SubscriptionInfo};
pub use driver::ClockDriver;
pub use error::PairsyncError;
pub use server::{RelayBuilder, RelayServer};
pub use store::{Connected, GameStart, MemoryStore};

pub use pairsync_clock as clock;
pub use pairsync_feed as feed;
pub use pairsync_game as game;
pub use pairsync_presence as presence;
pub use pairsync_protocol as protocol;

/// Everything needed to run a relay or embed the bus.
pub mod prelude {
    pub use crate::{
        ClockDriver, Connected, GameStart, MemoryStore, PairsyncError, RelayBuilder, RelayServer,
        SessionEventBus, Subscriber, SubscriptionInfo,
    };
    pub use pairsync_clock::{ClockConfig, ClockEvent, GameClock};
    pub use pairsync_feed::{ChangeFeed, MemoryFeed};
    pub use pairsync_game::{Board, GameConfig, GameError, MatchPolicy};
    pub use pairsync_presence::{
        ConnectionMonitor, ConnectionStatus, LinkState, MonitorCallbacks, MonitorConfig,
        MonitorRegistry, PresenceBoard, PresenceConfig, PresenceError, PresenceStore,
    };
    pub use pairsync_protocol::{
        CardRow, ClientMessage, Codec, GameEvent, JsonCodec, MatchAward, MatchState,
        ParticipantId, ParticipantRow, RoomId, RowChange, ServerMessage, SessionId, SessionRow,
        SessionStatus, StateSnapshot,
    };
}
