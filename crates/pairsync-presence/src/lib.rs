//! Participant liveness for Pairsync.
//!
//! # How it fits
//!
//! ```text
//! client side                         server side
//! ───────────                         ───────────
//! ConnectionMonitor ──ping/sync──→ PresenceStore ──→ PresenceTracker
//! PresenceBoard ───is_disconnected──↗
//! ```
//!
//! - [`ConnectionMonitor`]: heartbeat, passive liveness check, and
//!   reconnection with exponential backoff for one participant
//! - [`MonitorRegistry`]: register/unregister monitors by participant
//! - [`PresenceBoard`]: read-only polled view over many participants
//! - [`PresenceTracker`]: the store's record of who pinged when
//! - [`PresenceStore`]: the seam between them

mod board;
mod config;
mod error;
mod monitor;
mod registry;
mod store;
mod tracker;

pub use board::PresenceBoard;
pub use config::{MIN_TIMER_PERIOD, MonitorConfig, PresenceConfig, timer_period};
pub use error::PresenceError;
pub use monitor::{ConnectionMonitor, LinkState, MonitorCallbacks, MonitorStatus};
pub use registry::MonitorRegistry;
pub use store::PresenceStore;
pub use tracker::{ConnectionStatus, PresenceTracker};
