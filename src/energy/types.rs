//! Energy batching type definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An incremental energy contribution covering one batching window.
///
/// Owned by the batcher until flushed; the aggregator must treat delivery
/// as at-least-once, so `(event_id, user_id, window_start, window_end)`
/// is the natural de-duplication key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyDelta {
    pub event_id: Uuid,
    pub user_id: Uuid,
    /// Accumulated energy points for the window
    pub amount: f64,
    /// Start of the covered time window
    pub window_start: DateTime<Utc>,
    /// End of the covered time window
    pub window_end: DateTime<Utc>,
}

impl EnergyDelta {
    /// The de-duplication key, for logging.
    pub fn dedup_key(&self) -> String {
        format!(
            "{}/{}/{}..{}",
            self.event_id,
            self.user_id,
            self.window_start.to_rfc3339(),
            self.window_end.to_rfc3339()
        )
    }
}

/// Events emitted by the energy batcher.
#[derive(Debug, Clone)]
pub enum BatchEvent {
    /// A delta was delivered; carries the confirmed total score.
    Flushed { delta: EnergyDelta, score: f64 },
    /// Delivery attempts for a delta were exhausted this cycle; the delta
    /// is retained and retried on the next cycle.
    FlushFailed { delta: EnergyDelta, error: String },
    /// The batcher stopped after its final drain.
    Stopped,
}

/// Errors from the delta delivery seam.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SinkError {
    /// Transient failure (network or store unavailable); retryable.
    #[error("Delta sink unavailable: {0}")]
    Unavailable(String),

    /// Structural rejection (logic bug, malformed delta); not retried.
    #[error("Delta rejected: {0}")]
    Rejected(String),
}

/// Errors from the energy batcher.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("Batcher already running")]
    AlreadyRunning,

    #[error("Batcher not running")]
    NotRunning,

    /// The final drain could not deliver everything. The undelivered
    /// deltas are preserved for a later retry or an explicit discard
    /// decision; they are never silently dropped.
    #[error("{} delta(s) undelivered after exhausting retries", undelivered.len())]
    RetriesExhausted { undelivered: Vec<EnergyDelta> },

    #[error("Delta rejected by sink: {0}")]
    Rejected(String),
}
