//! Live rank lookup for a single user.
//!
//! Unlike the cached top-N board, a user's own rank is computed against
//! the score store at request time: it reflects every delta applied so
//! far, including ones newer than the latest published snapshot. One
//! count query per lookup keeps this cheap enough for per-user polling.

use crate::storage::database::{Database, DatabaseError};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// A user's live standing within an event.
#[derive(Debug, Clone)]
pub struct RankInfo {
    pub event_id: Uuid,
    pub user_id: Uuid,
    /// 1 + number of users with a strictly greater score
    pub rank: u32,
    pub score: f64,
    pub total_participants: u32,
    pub resolved_at: DateTime<Utc>,
}

/// Resolves live ranks against the score store.
pub struct RankResolver {
    db: Arc<Mutex<Database>>,
}

impl RankResolver {
    pub fn new(db: Arc<Mutex<Database>>) -> Self {
        Self { db }
    }

    /// Resolve a user's current rank within an event.
    ///
    /// Returns `Ok(None)` when the user has no score row for the event.
    /// Ties share a rank: everyone at the top score resolves to rank 1.
    pub fn resolve(
        &self,
        event_id: &Uuid,
        user_id: &Uuid,
    ) -> Result<Option<RankInfo>, RankError> {
        let db = self.db.lock().expect("database lock poisoned");

        let record = match db
            .get_score(event_id, user_id)
            .map_err(RankError::from_database)?
        {
            Some(record) => record,
            None => return Ok(None),
        };

        let conn = db.connection();
        let ahead: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM scores WHERE event_id = ?1 AND score > ?2",
                rusqlite::params![event_id.to_string(), record.score],
                |row| row.get(0),
            )
            .map_err(|e| RankError::QueryFailed(e.to_string()))?;

        let total = db
            .count_scores(event_id)
            .map_err(RankError::from_database)? as u32;

        Ok(Some(RankInfo {
            event_id: *event_id,
            user_id: *user_id,
            rank: ahead as u32 + 1,
            score: record.score,
            total_participants: total,
            resolved_at: Utc::now(),
        }))
    }
}

/// Rank lookup errors. Recoverable: the caller keeps its last known
/// rank and retries on the next poll.
#[derive(Debug, thiserror::Error)]
pub enum RankError {
    #[error("Rank query failed: {0}")]
    QueryFailed(String),
}

impl RankError {
    fn from_database(e: DatabaseError) -> Self {
        RankError::QueryFailed(e.to_string())
    }
}
