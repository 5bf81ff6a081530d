//! Per-room clock task for timed sessions.

use std::sync::Arc;

use pairsync_clock::{ClockConfig, ClockEvent, GameClock};
use pairsync_feed::ChangeFeed;
use pairsync_protocol::{Codec, RoomId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{MemoryStore, SessionEventBus};

#[derive(Debug, Clone, Copy)]
enum ClockCommand {
    Pause,
    Resume,
    Stop,
}

/// Runs a room's [`GameClock`] on its own task.
///
/// Each warning is broadcast as `time_warning` through the bus. On expiry
/// the room's session is finished in the store, which publishes the
/// `active → completed` row change and with it `game_ended`. The task stops
/// by itself once the session is over.
pub struct ClockDriver {
    room_id: RoomId,
    commands: mpsc::UnboundedSender<ClockCommand>,
    task: JoinHandle<()>,
}

impl ClockDriver {
    pub fn spawn<F: ChangeFeed, C: Codec>(
        room_id: RoomId,
        config: ClockConfig,
        bus: Arc<SessionEventBus<F, C>>,
        store: Arc<MemoryStore>,
    ) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let clock = GameClock::new(config);
        let task = tokio::spawn(run(room_id, clock, rx, bus, store));
        Self {
            room_id,
            commands,
            task,
        }
    }

    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    pub fn pause(&self) {
        let _ = self.commands.send(ClockCommand::Pause);
    }

    pub fn resume(&self) {
        let _ = self.commands.send(ClockCommand::Resume);
    }

    pub fn stop(&self) {
        let _ = self.commands.send(ClockCommand::Stop);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for ClockDriver {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run<F: ChangeFeed, C: Codec>(
    room_id: RoomId,
    mut clock: GameClock,
    mut commands: mpsc::UnboundedReceiver<ClockCommand>,
    bus: Arc<SessionEventBus<F, C>>,
    store: Arc<MemoryStore>,
) {
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(ClockCommand::Pause) => clock.pause(),
                Some(ClockCommand::Resume) => clock.resume(),
                Some(ClockCommand::Stop) | None => break,
            },
            event = clock.wait_for_event() => {
                if store.active_session(room_id).is_none() {
                    debug!(%room_id, "session over, clock stopped");
                    break;
                }
                match event {
                    ClockEvent::Warning { seconds_remaining } => {
                        if let Err(err) = bus.broadcast_time_warning(room_id, seconds_remaining).await {
                            warn!(%room_id, error = %err, "time warning not delivered");
                        }
                    }
                    ClockEvent::Expired => {
                        match store.finish(room_id) {
                            Ok(()) => info!(%room_id, "time is up, session finished"),
                            Err(err) => debug!(%room_id, error = %err, "session already over"),
                        }
                        break;
                    }
                }
            }
        }
    }
}
