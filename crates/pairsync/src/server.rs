//! `RelayServer` builder and accept loop.
//!
//! The relay is the WebSocket face of Pairsync. It ties the layers
//! together: socket → relay message → store action → change feed → bus →
//! every socket subscribed to the room.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use pairsync_clock::ClockConfig;
use pairsync_feed::MemoryFeed;
use pairsync_game::GameConfig;
use pairsync_presence::{PresenceConfig, timer_period};
use pairsync_protocol::{JsonCodec, RoomId};
use tokio::net::TcpListener;
use tokio::time::{self, MissedTickBehavior};

use crate::handler::handle_connection;
use crate::{ClockDriver, MemoryStore, PairsyncError, SessionEventBus};

/// Shared relay state passed to each connection handler task.
pub(crate) struct RelayState {
    pub(crate) store: Arc<MemoryStore>,
    pub(crate) bus: Arc<SessionEventBus<MemoryFeed>>,
    pub(crate) codec: JsonCodec,
    pub(crate) clock_config: ClockConfig,
    pub(crate) clocks: Mutex<HashMap<RoomId, ClockDriver>>,
}

impl RelayState {
    /// Starts the room's clock if sessions are timed. Replaces any clock
    /// left over from an earlier session.
    pub(crate) fn start_clock(&self, room_id: RoomId) {
        if self.clock_config.time_limit.is_none() {
            return;
        }
        let driver = ClockDriver::spawn(
            room_id,
            self.clock_config.clone(),
            Arc::clone(&self.bus),
            Arc::clone(&self.store),
        );
        self.clocks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(room_id, driver);
    }

    /// Freezes the room's clock while its game is paused and lets it run
    /// otherwise.
    pub(crate) fn sync_clock(&self, room_id: RoomId) {
        let mut clocks = self.clocks.lock().unwrap_or_else(PoisonError::into_inner);
        clocks.retain(|_, driver| !driver.is_finished());
        if let Some(driver) = clocks.get(&room_id) {
            if self.store.is_paused(room_id) {
                driver.pause();
            } else {
                driver.resume();
            }
        }
    }
}

/// Builder for configuring and starting a relay.
///
/// # Example
///
/// ```rust,no_run
/// # async fn run() -> Result<(), pairsync::PairsyncError> {
/// use pairsync::RelayBuilder;
///
/// let relay = RelayBuilder::new().bind("0.0.0.0:8080").build().await?;
/// relay.run().await
/// # }
/// ```
pub struct RelayBuilder {
    bind_addr: String,
    game_config: GameConfig,
    presence_config: PresenceConfig,
    clock_config: ClockConfig,
}

impl RelayBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            game_config: GameConfig::default(),
            presence_config: PresenceConfig::default(),
            clock_config: ClockConfig::default(),
        }
    }

    /// Sets the address to bind the relay to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    pub fn game_config(mut self, config: GameConfig) -> Self {
        self.game_config = config;
        self
    }

    pub fn presence_config(mut self, config: PresenceConfig) -> Self {
        self.presence_config = config;
        self
    }

    /// Sets the per-session clock. Untimed by default.
    pub fn clock_config(mut self, config: ClockConfig) -> Self {
        self.clock_config = config;
        self
    }

    /// Binds the listener and wires the store, feed, and bus together.
    pub async fn build(self) -> Result<RelayServer, PairsyncError> {
        let listener = TcpListener::bind(&self.bind_addr).await?;
        tracing::info!(addr = %self.bind_addr, "relay listening");

        let feed = Arc::new(MemoryFeed::new());
        let store = Arc::new(MemoryStore::new(
            Arc::clone(&feed),
            self.game_config,
            self.presence_config.clone(),
        ));
        let state = Arc::new(RelayState {
            store,
            bus: Arc::new(SessionEventBus::new(feed)),
            codec: JsonCodec,
            clock_config: self.clock_config,
            clocks: Mutex::new(HashMap::new()),
        });

        Ok(RelayServer {
            listener,
            presence_config: self.presence_config,
            state,
        })
    }
}

impl Default for RelayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound relay. Call [`run()`](Self::run) to start accepting connections.
pub struct RelayServer {
    listener: TcpListener,
    presence_config: PresenceConfig,
    state: Arc<RelayState>,
}

impl RelayServer {
    /// Creates a new builder.
    pub fn builder() -> RelayBuilder {
        RelayBuilder::new()
    }

    /// Returns the local address the relay is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// The authoritative store behind the relay.
    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.state.store
    }

    pub fn bus(&self) -> &Arc<SessionEventBus<MemoryFeed>> {
        &self.state.bus
    }

    /// Runs the accept loop until the process is terminated.
    ///
    /// A background task sweeps presence every poll interval so that
    /// participants who stopped pinging lose their turn.
    pub async fn run(self) -> Result<(), PairsyncError> {
        tracing::info!("relay running");

        tokio::spawn(sweep(
            Arc::clone(&self.state),
            self.presence_config.poll_interval,
        ));

        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, addr, state).await {
                            tracing::debug!(%addr, error = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }
    }
}

async fn sweep(state: Arc<RelayState>, every: std::time::Duration) {
    let mut ticker = time::interval(timer_period(every));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        for id in state.store.sweep_presence() {
            if let Some(room_id) = state.store.participant_room(id) {
                state.sync_clock(room_id);
            }
        }
    }
}
