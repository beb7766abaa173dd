//! CrowdPulse - Live Event Energy Engine
//!
//! Turns crowd motion into live event leaderboards. Device accelerometer
//! readings are sampled at a fixed cadence, classified into intensity
//! tiers, accumulated into energy deltas, and flushed in batches to a
//! durable score store. Leaderboards are served from periodically
//! recomputed snapshots; a user's own rank is always resolved live.

pub mod energy;
pub mod goals;
pub mod leaderboard;
pub mod motion;
pub mod scoring;
pub mod session;
pub mod storage;

// Re-export commonly used types
pub use energy::batcher::EnergyBatcher;
pub use leaderboard::cache::LeaderboardCache;
pub use leaderboard::resolver::RankResolver;
pub use motion::sampler::MotionSampler;
pub use scoring::aggregator::ScoreAggregator;
pub use session::tracker::TrackingSession;
pub use storage::config::EngineConfig;
pub use storage::database::Database;
