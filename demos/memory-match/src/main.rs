use std::time::Duration;

use pairsync::prelude::*;
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Relay settings read from `PAIRSYNC_*` environment variables.
///
/// | Variable                | Default        |
/// |-------------------------|----------------|
/// | `PAIRSYNC_ADDR`         | `0.0.0.0:8080` |
/// | `PAIRSYNC_PAIRS`        | `26`           |
/// | `PAIRSYNC_MATCH_POLICY` | `extra_turn`   |
/// | `PAIRSYNC_TIME_LIMIT`   | untimed        |
#[derive(Debug)]
struct Settings {
    addr: String,
    game: GameConfig,
    clock: ClockConfig,
}

impl Settings {
    fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let addr = lookup("PAIRSYNC_ADDR").unwrap_or_else(|| "0.0.0.0:8080".into());

        let mut game = GameConfig::default();
        if let Some(pairs) = lookup("PAIRSYNC_PAIRS") {
            game.pair_count = pairs
                .parse()
                .ok()
                .filter(|&n| n > 0)
                .ok_or_else(|| format!("PAIRSYNC_PAIRS must be a positive number, got {pairs:?}"))?;
        }
        if let Some(policy) = lookup("PAIRSYNC_MATCH_POLICY") {
            game.match_policy = match policy.as_str() {
                "extra_turn" => MatchPolicy::ExtraTurn,
                "rotate" => MatchPolicy::Rotate,
                other => return Err(format!("unknown match policy {other:?}")),
            };
        }

        let clock = match lookup("PAIRSYNC_TIME_LIMIT") {
            Some(secs) => {
                let secs: u64 = secs
                    .parse()
                    .map_err(|_| format!("PAIRSYNC_TIME_LIMIT must be seconds, got {secs:?}"))?;
                ClockConfig::with_limit(Duration::from_secs(secs))
            }
            None => ClockConfig::default(),
        };

        Ok(Self { addr, game, clock })
    }
}

// ---------------------------------------------------------------------------
// Relay bootstrap
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = Settings::from_env()?;
    tracing::info!(
        addr = %settings.addr,
        pairs = settings.game.pair_count,
        time_limit = ?settings.clock.time_limit,
        "starting memory match relay"
    );

    let relay = RelayServer::builder()
        .bind(&settings.addr)
        .game_config(settings.game)
        .clock_config(settings.clock)
        .build()
        .await?;

    relay.run().await?;
    Ok(())
}
