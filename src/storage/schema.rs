//! Database schema definitions for CrowdPulse.

/// SQL schema for creating all database tables.
pub const SCHEMA: &str = r#"
-- Profile metadata consumed by leaderboard snapshots. Writes are owned
-- by an external collaborator; the engine only reads display fields.
CREATE TABLE IF NOT EXISTS profiles (
    user_id TEXT PRIMARY KEY,
    display_name TEXT NOT NULL,
    avatar_url TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- One score row per (event, user). Mutated only through the aggregator's
-- atomic increment; never decreased or deleted by the engine.
CREATE TABLE IF NOT EXISTS scores (
    event_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    score REAL NOT NULL DEFAULT 0 CHECK (score >= 0),
    updated_at TEXT NOT NULL,
    is_live INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (event_id, user_id)
);

CREATE INDEX IF NOT EXISTS idx_scores_event_score ON scores(event_id, score DESC);

-- Applied-delta ledger. The UNIQUE constraint is the de-duplication key
-- for at-least-once delta delivery: a retried flush re-sends the same
-- window and collides here instead of double counting.
CREATE TABLE IF NOT EXISTS energy_deltas (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    event_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    amount REAL NOT NULL,
    window_start TEXT NOT NULL,
    window_end TEXT NOT NULL,
    applied_at TEXT NOT NULL,
    UNIQUE(event_id, user_id, window_start, window_end)
);

CREATE INDEX IF NOT EXISTS idx_energy_deltas_event_user ON energy_deltas(event_id, user_id);
"#;

/// SQL for schema version tracking (migrations)
pub const SCHEMA_VERSION_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);
"#;

/// Current schema version
pub const CURRENT_VERSION: i32 = 1;
