//! Accelerometer provider abstraction.
//!
//! Real deployments wire a platform accelerometer behind this trait; the
//! simulated provider drives tests and the demo binary.

use crate::motion::types::{MotionError, Vector3};
use std::sync::atomic::{AtomicU64, Ordering};

/// Source of raw tri-axis acceleration readings.
///
/// Implementations must report unavailability rather than emit zeros; a
/// device with no accelerometer access must fail `check_available()` so
/// callers can disable tracking instead of showing fabricated progress.
pub trait AccelerometerProvider: Send + Sync {
    /// Verify the sensor can be read. Called once before sampling starts.
    fn check_available(&self) -> Result<(), MotionError>;

    /// Read the current acceleration, in g.
    fn read(&self) -> Result<Vector3, MotionError>;
}

/// Deterministic simulated accelerometer.
///
/// Produces a repeating intensity pattern so demos and tests get a known
/// sequence of tiers without real hardware.
pub struct SimulatedAccelerometer {
    /// Magnitudes cycled through on successive reads
    pattern: Vec<f64>,
    cursor: AtomicU64,
    available: bool,
}

impl SimulatedAccelerometer {
    /// Create a provider cycling through the given magnitudes (in g).
    pub fn new(pattern: Vec<f64>) -> Self {
        Self {
            pattern,
            cursor: AtomicU64::new(0),
            available: true,
        }
    }

    /// A provider that mimics a crowd member alternating between steady
    /// dancing and occasional jumps.
    pub fn dancing() -> Self {
        Self::new(vec![1.1, 1.3, 1.3, 1.7, 1.3, 2.2, 1.4, 1.0])
    }

    /// A provider that reports the sensor as unavailable.
    pub fn unavailable() -> Self {
        Self {
            pattern: Vec::new(),
            cursor: AtomicU64::new(0),
            available: false,
        }
    }
}

impl AccelerometerProvider for SimulatedAccelerometer {
    fn check_available(&self) -> Result<(), MotionError> {
        if self.available {
            Ok(())
        } else {
            Err(MotionError::SensorUnavailable(
                "no accelerometer present".to_string(),
            ))
        }
    }

    fn read(&self) -> Result<Vector3, MotionError> {
        self.check_available()?;
        if self.pattern.is_empty() {
            return Ok(Vector3::new(0.0, 1.0, 0.0));
        }
        let i = self.cursor.fetch_add(1, Ordering::Relaxed) as usize % self.pattern.len();
        // Put the whole magnitude on one axis; classification only uses the norm
        Ok(Vector3::new(0.0, self.pattern[i], 0.0))
    }
}
