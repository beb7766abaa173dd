//! In-memory energy accumulator.
//!
//! Explicit owned state with a single drain-and-reset operation; callers
//! guard it with a mutex so the sampling path and the flush path never
//! race on a half-read window.

use crate::energy::types::EnergyDelta;
use crate::motion::types::MotionSample;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Accumulates sampled intensity between flushes.
#[derive(Debug)]
pub struct EnergyAccumulator {
    event_id: Uuid,
    user_id: Uuid,
    amount: f64,
    window_start: DateTime<Utc>,
    sample_count: u64,
}

impl EnergyAccumulator {
    /// Create an accumulator seeded to zero, opening a window at `now`.
    pub fn new(event_id: Uuid, user_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            event_id,
            user_id,
            amount: 0.0,
            window_start: now,
            sample_count: 0,
        }
    }

    /// Add a classified sample's tier contribution.
    pub fn add(&mut self, sample: &MotionSample) {
        self.amount += sample.tier.energy_contribution();
        self.sample_count += 1;
    }

    /// Atomically read-and-reset: close the current window and open the
    /// next one at `now`.
    ///
    /// Returns `None` when no energy accrued, so idle windows produce no
    /// network writes.
    pub fn drain_and_reset(&mut self, now: DateTime<Utc>) -> Option<EnergyDelta> {
        let window_start = self.window_start;
        let amount = self.amount;
        let samples = self.sample_count;

        self.amount = 0.0;
        self.sample_count = 0;
        self.window_start = now;

        if amount <= 0.0 {
            return None;
        }

        tracing::debug!(
            "Drained window: {:.1} points over {} samples",
            amount,
            samples
        );

        Some(EnergyDelta {
            event_id: self.event_id,
            user_id: self.user_id,
            amount,
            window_start,
            window_end: now,
        })
    }

    /// Energy accrued in the open window.
    pub fn pending_amount(&self) -> f64 {
        self.amount
    }

    /// Samples recorded in the open window.
    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }
}
