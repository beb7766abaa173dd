//! Motion sampling type definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 3D vector for accelerometer readings, in g.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    /// X-axis component (left-right)
    pub x: f64,
    /// Y-axis component (up-down)
    pub y: f64,
    /// Z-axis component (forward-backward)
    pub z: f64,
}

impl Vector3 {
    /// Create a new vector with specified components.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Create a zero vector.
    pub fn zero() -> Self {
        Self::default()
    }

    /// Calculate the magnitude (length) of the vector.
    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// Discrete classification of instantaneous motion magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntensityTier {
    /// Device at rest (magnitude below 1.05 g, gravity only)
    Idle,
    /// Gentle motion
    Low,
    /// Steady movement
    Medium,
    /// Vigorous movement
    High,
    /// Peak motion (jumping, hard dancing)
    Extreme,
}

impl IntensityTier {
    /// Classify a raw acceleration magnitude (in g) into a tier.
    pub fn from_magnitude(magnitude: f64) -> Self {
        if magnitude < 1.05 {
            IntensityTier::Idle
        } else if magnitude < 1.2 {
            IntensityTier::Low
        } else if magnitude < 1.5 {
            IntensityTier::Medium
        } else if magnitude < 2.0 {
            IntensityTier::High
        } else {
            IntensityTier::Extreme
        }
    }

    /// Energy points contributed by one sample at this tier.
    ///
    /// Higher tiers contribute proportionally more; idle contributes nothing.
    pub fn energy_contribution(&self) -> f64 {
        match self {
            IntensityTier::Idle => 0.0,
            IntensityTier::Low => 1.0,
            IntensityTier::Medium => 2.0,
            IntensityTier::High => 3.5,
            IntensityTier::Extreme => 5.0,
        }
    }

    /// Get display name.
    pub fn display_name(&self) -> &'static str {
        match self {
            IntensityTier::Idle => "Idle",
            IntensityTier::Low => "Low",
            IntensityTier::Medium => "Medium",
            IntensityTier::High => "High",
            IntensityTier::Extreme => "Extreme",
        }
    }
}

impl std::fmt::Display for IntensityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// A single classified motion sample.
///
/// Ephemeral: produced at sensor cadence, consumed immediately by the
/// batcher, never persisted individually.
#[derive(Debug, Clone, Copy)]
pub struct MotionSample {
    /// Raw acceleration magnitude in g
    pub magnitude: f64,
    /// Classified intensity tier
    pub tier: IntensityTier,
    /// When the sample was taken
    pub sampled_at: DateTime<Utc>,
}

impl MotionSample {
    /// Classify a raw accelerometer reading into a sample.
    pub fn classify(acceleration: Vector3, sampled_at: DateTime<Utc>) -> Self {
        let magnitude = acceleration.magnitude();
        Self {
            magnitude,
            tier: IntensityTier::from_magnitude(magnitude),
            sampled_at,
        }
    }
}

/// Events emitted by the motion sampler.
#[derive(Debug, Clone)]
pub enum MotionEvent {
    /// Sampling started
    Started,
    /// A classified sample
    Sample(MotionSample),
    /// Sampling stopped; no further samples will be emitted
    Stopped,
}

/// Errors that can occur during motion sampling.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MotionError {
    /// No accelerometer access. Callers must disable tracking rather
    /// than show fabricated progress.
    #[error("Accelerometer unavailable: {0}")]
    SensorUnavailable(String),

    #[error("Sampler already running")]
    AlreadyRunning,

    #[error("Sampler not running")]
    NotRunning,

    #[error("Sensor read failed: {0}")]
    ReadFailed(String),
}
