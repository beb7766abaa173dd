//! CrowdPulse - Live Event Energy Engine
//!
//! Demo entry point: simulates a short event with a handful of moving
//! crowd members, then prints the resulting leaderboard and per-user
//! standings.

use crowdpulse::goals::tiers::{default_tiers, next_tier};
use crowdpulse::leaderboard::cache::LeaderboardCache;
use crowdpulse::leaderboard::resolver::RankResolver;
use crowdpulse::motion::provider::SimulatedAccelerometer;
use crowdpulse::scoring::aggregator::ScoreAggregator;
use crowdpulse::session::tracker::TrackingSession;
use crowdpulse::storage::config::{load_config, EngineConfig};
use crowdpulse::storage::database::{Database, Profile};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting CrowdPulse v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config().unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        EngineConfig::default()
    });

    // Demo runs against an in-memory store; a deployment opens a file
    // under the platform data directory instead.
    let db = Arc::new(Mutex::new(Database::open_in_memory()?));
    let aggregator = Arc::new(ScoreAggregator::new(Arc::clone(&db)));

    let event_id = Uuid::new_v4();
    tracing::info!("Simulated event {}", event_id);

    // A small crowd with different motion patterns.
    let crowd: Vec<(&str, SimulatedAccelerometer)> = vec![
        ("Ava", SimulatedAccelerometer::dancing()),
        ("Ben", SimulatedAccelerometer::new(vec![1.3, 1.4, 1.35])),
        ("Cleo", SimulatedAccelerometer::new(vec![1.1, 1.15, 1.12])),
        ("Dev", SimulatedAccelerometer::new(vec![1.0, 1.02, 1.01])),
    ];

    let mut sessions = Vec::new();
    for (name, accel) in crowd {
        let user_id = Uuid::new_v4();
        {
            let mut db = db.lock().expect("database lock poisoned");
            db.upsert_profile(&Profile::new(user_id, name.to_string()))?;
        }

        let mut session = TrackingSession::new(
            event_id,
            user_id,
            Arc::new(accel),
            Arc::clone(&aggregator),
            &config,
        );
        session.start().await?;
        sessions.push((name, session));
    }

    // Let a few flush windows elapse.
    let run_for = Duration::from_millis(config.batching.flush_interval_ms * 3 + 500);
    tracing::info!("Crowd is moving for {:?}...", run_for);
    tokio::time::sleep(run_for).await;

    for (name, session) in sessions.iter_mut() {
        if let Err(e) = session.stop().await {
            tracing::error!("Session for {} ended with undelivered energy: {}", name, e);
        }
    }

    let cache = LeaderboardCache::new(Arc::clone(&db), config.leaderboard.clone());
    cache.register_event(event_id);
    let snapshot = cache.refresh(&event_id)?;

    println!("\n=== Event leaderboard (generation {}) ===", snapshot.generation);
    for entry in &snapshot.entries {
        println!(
            "  #{:<3} {:<8} {:>8.1} pts",
            entry.rank, entry.display_name, entry.score
        );
    }

    let resolver = RankResolver::new(Arc::clone(&db));
    let tiers = default_tiers();

    println!("\n=== Standings ===");
    for (name, session) in &sessions {
        if let Some(info) = resolver.resolve(&event_id, &session.user_id())? {
            let goal = next_tier(&tiers, info.score);
            match goal {
                Some(tier) => println!(
                    "  {:<8} rank {}/{} with {:.1} pts, {}% toward {}",
                    name,
                    info.rank,
                    info.total_participants,
                    info.score,
                    tier.progress_percent(info.score),
                    tier.name
                ),
                None => println!(
                    "  {:<8} rank {}/{} with {:.1} pts, ladder complete",
                    name, info.rank, info.total_participants, info.score
                ),
            }
        }
    }

    Ok(())
}
