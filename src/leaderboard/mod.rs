//! Event leaderboards: cached top-N snapshots and live per-user rank.

pub mod cache;
pub mod resolver;

pub use cache::{CacheHealth, LeaderboardCache, LeaderboardEntry, LeaderboardError, LeaderboardSnapshot};
pub use resolver::{RankError, RankInfo, RankResolver};
