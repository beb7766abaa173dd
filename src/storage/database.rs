//! Database operations using rusqlite.

use crate::storage::schema::{CURRENT_VERSION, SCHEMA, SCHEMA_VERSION_TABLE};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Result as SqliteResult};
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Profile metadata joined into leaderboard snapshots.
#[derive(Debug, Clone)]
pub struct Profile {
    pub user_id: Uuid,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    /// Create a new profile with the given display name.
    pub fn new(user_id: Uuid, display_name: String) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            display_name,
            avatar_url: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A persisted (event, user) score row.
#[derive(Debug, Clone)]
pub struct ScoreRecord {
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub score: f64,
    pub updated_at: DateTime<Utc>,
    pub is_live: bool,
}

/// Outcome of applying an energy delta.
#[derive(Debug, Clone)]
pub enum DeltaOutcome {
    /// The delta was new and has been added to the score.
    Applied(ScoreRecord),
    /// The delta's window was already applied; the score is unchanged.
    /// Expected under at-least-once delivery, not an error.
    Duplicate(ScoreRecord),
}

impl DeltaOutcome {
    /// The score row after the call, whichever branch was taken.
    pub fn record(&self) -> &ScoreRecord {
        match self {
            DeltaOutcome::Applied(r) | DeltaOutcome::Duplicate(r) => r,
        }
    }
}

/// Database wrapper for SQLite operations.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create a database at the given path.
    pub fn open(path: &PathBuf) -> Result<Self, DatabaseError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DatabaseError::IoError(e.to_string()))?;
        }

        let conn =
            Connection::open(path).map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

        let db = Self { conn };
        db.initialize()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

        let db = Self { conn };
        db.initialize()?;

        Ok(db)
    }

    /// Initialize the database schema.
    fn initialize(&self) -> Result<(), DatabaseError> {
        self.conn
            .execute_batch(SCHEMA_VERSION_TABLE)
            .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;

        let current_version = self.get_schema_version()?;

        if current_version < CURRENT_VERSION {
            self.migrate(current_version)?;
        }

        Ok(())
    }

    /// Get the current schema version.
    fn get_schema_version(&self) -> Result<i32, DatabaseError> {
        let result: SqliteResult<i32> = self.conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        );

        match result {
            Ok(version) => Ok(version),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
            Err(e) => Err(DatabaseError::QueryFailed(e.to_string())),
        }
    }

    /// Run database migrations.
    fn migrate(&self, from_version: i32) -> Result<(), DatabaseError> {
        if from_version < 1 {
            self.conn
                .execute_batch(SCHEMA)
                .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;

            self.conn
                .execute(
                    "INSERT INTO schema_version (version, applied_at) VALUES (?, datetime('now'))",
                    [CURRENT_VERSION],
                )
                .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;

            tracing::info!("Database migrated to version {}", CURRENT_VERSION);
        }

        // Future migrations would go here:
        // if from_version < 2 { ... }

        Ok(())
    }

    /// Get a reference to the underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    // ========== Profile Operations ==========

    /// Insert or update a profile.
    pub fn upsert_profile(&self, profile: &Profile) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "INSERT INTO profiles (user_id, display_name, avatar_url, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(user_id) DO UPDATE SET
                     display_name = excluded.display_name,
                     avatar_url = excluded.avatar_url,
                     updated_at = excluded.updated_at",
                params![
                    profile.user_id.to_string(),
                    profile.display_name,
                    profile.avatar_url,
                    profile.created_at.to_rfc3339(),
                    profile.updated_at.to_rfc3339(),
                ],
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        Ok(())
    }

    /// Get a profile by user ID.
    pub fn get_profile(&self, user_id: &Uuid) -> Result<Option<Profile>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT user_id, display_name, avatar_url, created_at, updated_at
                 FROM profiles WHERE user_id = ?1",
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let result = stmt.query_row(params![user_id.to_string()], |row| {
            Ok(ProfileRow {
                user_id: row.get(0)?,
                display_name: row.get(1)?,
                avatar_url: row.get(2)?,
                created_at: row.get(3)?,
                updated_at: row.get(4)?,
            })
        });

        match result {
            Ok(row) => Ok(Some(row.into_profile()?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(DatabaseError::QueryFailed(e.to_string())),
        }
    }

    // ========== Score Operations ==========

    /// Apply an energy delta atomically.
    ///
    /// The ledger insert and the score increment happen in one transaction.
    /// The increment is expressed in SQL (`score = score + delta`), never as
    /// a read-then-write of a locally cached value, so concurrent deltas to
    /// the same row cannot clobber each other. A delta whose
    /// (event, user, window) key was already applied is reported as
    /// `Duplicate` and leaves the score untouched.
    pub fn apply_delta(
        &mut self,
        event_id: &Uuid,
        user_id: &Uuid,
        amount: f64,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<DeltaOutcome, DatabaseError> {
        if amount < 0.0 {
            return Err(DatabaseError::ConstraintViolation(format!(
                "negative delta amount {}",
                amount
            )));
        }

        let tx = self
            .conn
            .transaction()
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;

        let now = Utc::now();
        let ledger_insert = tx.execute(
            "INSERT INTO energy_deltas (event_id, user_id, amount, window_start, window_end, applied_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                event_id.to_string(),
                user_id.to_string(),
                amount,
                window_start.to_rfc3339(),
                window_end.to_rfc3339(),
                now.to_rfc3339(),
            ],
        );

        let duplicate = match ledger_insert {
            Ok(_) => false,
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                true
            }
            Err(e) => return Err(DatabaseError::QueryFailed(e.to_string())),
        };

        if !duplicate {
            tx.execute(
                "INSERT INTO scores (event_id, user_id, score, updated_at, is_live)
                 VALUES (?1, ?2, ?3, ?4, 1)
                 ON CONFLICT(event_id, user_id) DO UPDATE SET
                     score = scores.score + excluded.score,
                     updated_at = excluded.updated_at",
                params![
                    event_id.to_string(),
                    user_id.to_string(),
                    amount,
                    now.to_rfc3339(),
                ],
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
        }

        let record = Self::read_score(&tx, event_id, user_id)?.ok_or_else(|| {
            DatabaseError::NotFound(format!("Score ({}, {})", event_id, user_id))
        })?;

        tx.commit()
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;

        if duplicate {
            Ok(DeltaOutcome::Duplicate(record))
        } else {
            Ok(DeltaOutcome::Applied(record))
        }
    }

    /// Get the score row for a (event, user) pair.
    pub fn get_score(
        &self,
        event_id: &Uuid,
        user_id: &Uuid,
    ) -> Result<Option<ScoreRecord>, DatabaseError> {
        Self::read_score(&self.conn, event_id, user_id)
    }

    fn read_score(
        conn: &Connection,
        event_id: &Uuid,
        user_id: &Uuid,
    ) -> Result<Option<ScoreRecord>, DatabaseError> {
        let mut stmt = conn
            .prepare(
                "SELECT event_id, user_id, score, updated_at, is_live
                 FROM scores WHERE event_id = ?1 AND user_id = ?2",
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let result = stmt.query_row(
            params![event_id.to_string(), user_id.to_string()],
            |row| {
                Ok(ScoreRow {
                    event_id: row.get(0)?,
                    user_id: row.get(1)?,
                    score: row.get(2)?,
                    updated_at: row.get(3)?,
                    is_live: row.get(4)?,
                })
            },
        );

        match result {
            Ok(row) => Ok(Some(row.into_record()?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(DatabaseError::QueryFailed(e.to_string())),
        }
    }

    /// Mark a (event, user) score row live or not.
    ///
    /// Creates the row at zero if it does not exist yet, so a session that
    /// starts before the first delta still shows up as live.
    pub fn set_live(
        &self,
        event_id: &Uuid,
        user_id: &Uuid,
        live: bool,
    ) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "INSERT INTO scores (event_id, user_id, score, updated_at, is_live)
                 VALUES (?1, ?2, 0, ?3, ?4)
                 ON CONFLICT(event_id, user_id) DO UPDATE SET
                     is_live = excluded.is_live,
                     updated_at = excluded.updated_at",
                params![
                    event_id.to_string(),
                    user_id.to_string(),
                    Utc::now().to_rfc3339(),
                    live as i32,
                ],
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        Ok(())
    }

    /// Count score rows for an event.
    pub fn count_scores(&self, event_id: &Uuid) -> Result<usize, DatabaseError> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM scores WHERE event_id = ?1",
                params![event_id.to_string()],
                |row| row.get(0),
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        Ok(count as usize)
    }
}

/// Intermediate struct for reading profile rows from database.
struct ProfileRow {
    user_id: String,
    display_name: String,
    avatar_url: Option<String>,
    created_at: String,
    updated_at: String,
}

impl ProfileRow {
    fn into_profile(self) -> Result<Profile, DatabaseError> {
        let user_id = Uuid::parse_str(&self.user_id).map_err(|e| {
            DatabaseError::DeserializationError(format!("Invalid user UUID: {}", e))
        })?;

        let created_at = parse_timestamp(&self.created_at, "created_at")?;
        let updated_at = parse_timestamp(&self.updated_at, "updated_at")?;

        Ok(Profile {
            user_id,
            display_name: self.display_name,
            avatar_url: self.avatar_url,
            created_at,
            updated_at,
        })
    }
}

/// Intermediate struct for reading score rows from database.
struct ScoreRow {
    event_id: String,
    user_id: String,
    score: f64,
    updated_at: String,
    is_live: i32,
}

impl ScoreRow {
    fn into_record(self) -> Result<ScoreRecord, DatabaseError> {
        let event_id = Uuid::parse_str(&self.event_id).map_err(|e| {
            DatabaseError::DeserializationError(format!("Invalid event UUID: {}", e))
        })?;

        let user_id = Uuid::parse_str(&self.user_id).map_err(|e| {
            DatabaseError::DeserializationError(format!("Invalid user UUID: {}", e))
        })?;

        let updated_at = parse_timestamp(&self.updated_at, "updated_at")?;

        Ok(ScoreRecord {
            event_id,
            user_id,
            score: self.score,
            updated_at,
            is_live: self.is_live != 0,
        })
    }
}

fn parse_timestamp(raw: &str, field: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::DeserializationError(format!("Invalid {}: {}", field, e)))
}

/// Database errors.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Failed to connect to database: {0}")]
    ConnectionFailed(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}
