//! Goal ladders and progress normalization for event scores.

pub mod tiers;

pub use tiers::{default_tiers, next_tier, EnergyGoalTier};
