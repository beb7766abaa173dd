//! Persistent storage module.
//!
//! SQLite-backed score store, applied-delta ledger, profile metadata,
//! and TOML engine configuration.

pub mod config;
pub mod database;
pub mod schema;

// Re-exports for convenience
pub use config::{load_config, save_config, EngineConfig};
pub use database::{Database, DatabaseError, DeltaOutcome, Profile, ScoreRecord};
