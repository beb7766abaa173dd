//! Motion sampling module.
//!
//! Reads raw tri-axis acceleration at a fixed cadence and classifies each
//! reading into a discrete intensity tier:
//! - Fixed-interval polling of an accelerometer provider
//! - Magnitude-threshold intensity classification
//! - Event channel streaming to the energy batcher

pub mod provider;
pub mod sampler;
pub mod types;

// Re-exports for convenience
pub use provider::{AccelerometerProvider, SimulatedAccelerometer};
pub use sampler::MotionSampler;
pub use types::{IntensityTier, MotionError, MotionEvent, MotionSample, Vector3};
