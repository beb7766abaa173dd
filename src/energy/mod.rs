//! Energy batching module.
//!
//! Decouples write frequency from sample frequency:
//! - In-memory accumulator with atomic drain-and-reset
//! - Periodic flush of one delta per non-idle window
//! - Bounded exponential backoff retries, guaranteed drain on stop

pub mod accumulator;
pub mod batcher;
pub mod types;

// Re-exports for convenience
pub use accumulator::EnergyAccumulator;
pub use batcher::{DeltaSink, EnergyBatcher, SampleFeed};
pub use types::{BatchError, BatchEvent, EnergyDelta, SinkError};
