//! Score aggregation service.
//!
//! Applies energy deltas to the persistent score store via an atomic
//! per-row increment, de-duplicating retried windows so at-least-once
//! delivery cannot inflate a score.

use crate::energy::batcher::DeltaSink;
use crate::energy::types::{EnergyDelta, SinkError};
use crate::storage::database::{Database, DatabaseError, DeltaOutcome, ScoreRecord};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Applies deltas to per-(event, user) scores.
pub struct ScoreAggregator {
    db: Arc<Mutex<Database>>,
}

impl ScoreAggregator {
    /// Create a new aggregator over the score store.
    pub fn new(db: Arc<Mutex<Database>>) -> Self {
        Self { db }
    }

    /// Apply a delta and return the updated score row.
    ///
    /// Safe under concurrent deltas from the same user's sessions and
    /// from other users: the increment runs as SQL against the stored
    /// value, never as a read-then-write of a locally cached one. A
    /// duplicate window is resolved by de-duplication and returns the
    /// unchanged score; it is not surfaced as an error.
    pub fn apply(&self, delta: &EnergyDelta) -> Result<ScoreRecord, AggregateError> {
        let mut db = self.db.lock().expect("database lock poisoned");

        let outcome = db
            .apply_delta(
                &delta.event_id,
                &delta.user_id,
                delta.amount,
                delta.window_start,
                delta.window_end,
            )
            .map_err(AggregateError::from_database)?;

        match outcome {
            DeltaOutcome::Applied(record) => Ok(record),
            DeltaOutcome::Duplicate(record) => {
                tracing::debug!(
                    "Duplicate delta {} ignored; score stays {:.1}",
                    delta.dedup_key(),
                    record.score
                );
                Ok(record)
            }
        }
    }

    /// Read the current score for a (event, user) pair.
    pub fn score(
        &self,
        event_id: &Uuid,
        user_id: &Uuid,
    ) -> Result<Option<ScoreRecord>, AggregateError> {
        let db = self.db.lock().expect("database lock poisoned");
        db.get_score(event_id, user_id)
            .map_err(AggregateError::from_database)
    }

    /// Mark a (event, user) session live or ended.
    pub fn set_live(
        &self,
        event_id: &Uuid,
        user_id: &Uuid,
        live: bool,
    ) -> Result<(), AggregateError> {
        let db = self.db.lock().expect("database lock poisoned");
        db.set_live(event_id, user_id, live)
            .map_err(AggregateError::from_database)
    }
}

impl DeltaSink for ScoreAggregator {
    fn submit(&self, delta: &EnergyDelta) -> Result<f64, SinkError> {
        self.apply(delta)
            .map(|record| record.score)
            .map_err(|e| match e {
                AggregateError::InvalidDelta(msg) => SinkError::Rejected(msg),
                AggregateError::StoreUnavailable(msg) => SinkError::Unavailable(msg),
            })
    }
}

/// Aggregation errors.
#[derive(Debug, thiserror::Error)]
pub enum AggregateError {
    /// Recoverable: the store could not be reached or the write failed
    /// transiently. Callers retry; writes are never lost silently.
    #[error("Score store unavailable: {0}")]
    StoreUnavailable(String),

    /// Structural: the delta itself is invalid. Surfaced immediately,
    /// not retried.
    #[error("Invalid delta: {0}")]
    InvalidDelta(String),
}

impl AggregateError {
    fn from_database(e: DatabaseError) -> Self {
        match e {
            DatabaseError::ConstraintViolation(msg) => AggregateError::InvalidDelta(msg),
            other => AggregateError::StoreUnavailable(other.to_string()),
        }
    }
}
