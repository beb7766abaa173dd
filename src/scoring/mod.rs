//! Score aggregation module.
//!
//! Durable, atomic application of energy deltas to per-(event, user)
//! scores, with window-keyed de-duplication for at-least-once delivery.

pub mod aggregator;

// Re-exports for convenience
pub use aggregator::{AggregateError, ScoreAggregator};
