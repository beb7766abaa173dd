//! Periodically recomputed leaderboard snapshots.
//!
//! Event leaderboards are read far more often than written: many devices
//! poll every few seconds. Serving reads from a snapshot recomputed on a
//! fixed cadence trades bounded staleness (at most one refresh interval)
//! for taking all poll traffic off the hot write path. Each snapshot is
//! an immutable generation published atomically; readers observe the old
//! generation or the new one, never a mix.

use crate::storage::config::LeaderboardSettings;
use crate::storage::database::{Database, DatabaseError};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

/// One ranked row within a snapshot.
#[derive(Debug, Clone)]
pub struct LeaderboardEntry {
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub score: f64,
    /// Contiguous rank within the generation, 1-based
    pub rank: u32,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub computed_at: DateTime<Utc>,
}

/// One immutable, atomically-published ranked snapshot of an event.
#[derive(Debug, Clone)]
pub struct LeaderboardSnapshot {
    pub event_id: Uuid,
    /// Entries ordered by rank ascending
    pub entries: Vec<LeaderboardEntry>,
    /// Monotonically increasing generation counter
    pub generation: u64,
    /// When this generation was computed
    pub computed_at: DateTime<Utc>,
    /// Total score rows for the event (may exceed `entries.len()`)
    pub total_participants: u32,
}

/// Freshness of a cached snapshot relative to the refresh cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheHealth {
    /// Within the documented bounded-staleness window
    Fresh,
    /// Older than the configured multiple of the refresh interval; the
    /// refresh job itself has likely failed
    Expired,
}

/// Cache of ranked snapshots, one per registered event.
pub struct LeaderboardCache {
    db: Arc<Mutex<Database>>,
    settings: LeaderboardSettings,
    snapshots: Arc<RwLock<HashMap<Uuid, Arc<LeaderboardSnapshot>>>>,
    events: Arc<Mutex<HashSet<Uuid>>>,
    generation: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    stop_notify: Arc<Notify>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl LeaderboardCache {
    /// Create a new cache over the score store.
    pub fn new(db: Arc<Mutex<Database>>, settings: LeaderboardSettings) -> Self {
        Self {
            db,
            settings,
            snapshots: Arc::new(RwLock::new(HashMap::new())),
            events: Arc::new(Mutex::new(HashSet::new())),
            generation: Arc::new(AtomicU64::new(0)),
            running: Arc::new(AtomicBool::new(false)),
            stop_notify: Arc::new(Notify::new()),
            task: None,
        }
    }

    /// Register an event for periodic recomputation.
    pub fn register_event(&self, event_id: Uuid) {
        self.events
            .lock()
            .expect("events lock poisoned")
            .insert(event_id);
    }

    /// Recompute and atomically publish a new generation for an event.
    pub fn refresh(&self, event_id: &Uuid) -> Result<Arc<LeaderboardSnapshot>, LeaderboardError> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let snapshot = {
            let db = self.db.lock().expect("database lock poisoned");
            Self::compute_snapshot(&db, event_id, self.settings.cached_top_n, generation)?
        };

        let snapshot = Arc::new(snapshot);
        self.snapshots
            .write()
            .expect("snapshots lock poisoned")
            .insert(*event_id, Arc::clone(&snapshot));

        tracing::debug!(
            "Published leaderboard generation {} for event {} ({} entries)",
            generation,
            event_id,
            snapshot.entries.len()
        );

        Ok(snapshot)
    }

    /// Build a snapshot from the score store.
    ///
    /// Tie-break for equal scores: the user who reached the score earlier
    /// (smaller `updated_at`) ranks higher, with ascending user id as the
    /// final arbiter. Deterministic, so repeated recomputation over
    /// unchanged scores yields identical orderings and ranks never
    /// flicker between refreshes.
    fn compute_snapshot(
        db: &Database,
        event_id: &Uuid,
        top_n: usize,
        generation: u64,
    ) -> Result<LeaderboardSnapshot, LeaderboardError> {
        let computed_at = Utc::now();
        let total_participants = db
            .count_scores(event_id)
            .map_err(LeaderboardError::from_database)? as u32;

        let conn = db.connection();
        let mut stmt = conn
            .prepare(
                "SELECT s.user_id, s.score, p.display_name, p.avatar_url
                 FROM scores s
                 LEFT JOIN profiles p ON s.user_id = p.user_id
                 WHERE s.event_id = ?1
                 ORDER BY s.score DESC, s.updated_at ASC, s.user_id ASC
                 LIMIT ?2",
            )
            .map_err(|e| LeaderboardError::QueryFailed(e.to_string()))?;

        let rows = stmt
            .query_map(
                rusqlite::params![event_id.to_string(), top_n],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, f64>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                },
            )
            .map_err(|e| LeaderboardError::QueryFailed(e.to_string()))?;

        let mut entries = Vec::new();
        let mut rank = 0u32;

        for row in rows {
            rank += 1;
            let (user_id_str, score, display_name, avatar_url) =
                row.map_err(|e| LeaderboardError::QueryFailed(e.to_string()))?;

            let user_id = Uuid::parse_str(&user_id_str)
                .map_err(|e| LeaderboardError::QueryFailed(e.to_string()))?;

            entries.push(LeaderboardEntry {
                event_id: *event_id,
                user_id,
                score,
                rank,
                display_name: display_name.unwrap_or_else(|| "Guest".to_string()),
                avatar_url,
                computed_at,
            });
        }

        Ok(LeaderboardSnapshot {
            event_id: *event_id,
            entries,
            generation,
            computed_at,
            total_participants,
        })
    }

    /// Get the top `limit` entries for an event from the current snapshot.
    pub fn top_n(
        &self,
        event_id: &Uuid,
        limit: usize,
    ) -> Result<Vec<LeaderboardEntry>, LeaderboardError> {
        let snapshot = self
            .snapshot(event_id)
            .ok_or(LeaderboardError::NoSnapshot(*event_id))?;

        if self.health(event_id) == Some(CacheHealth::Expired) {
            tracing::error!(
                "Leaderboard snapshot for event {} is past its staleness bound; refresh job may be down",
                event_id
            );
        }

        Ok(snapshot.entries.iter().take(limit).cloned().collect())
    }

    /// Get the current snapshot for an event, if one has been published.
    pub fn snapshot(&self, event_id: &Uuid) -> Option<Arc<LeaderboardSnapshot>> {
        self.snapshots
            .read()
            .expect("snapshots lock poisoned")
            .get(event_id)
            .cloned()
    }

    /// When the current generation for an event was computed.
    pub fn generation_time(&self, event_id: &Uuid) -> Option<DateTime<Utc>> {
        self.snapshot(event_id).map(|s| s.computed_at)
    }

    /// Age of the current snapshot.
    pub fn staleness(&self, event_id: &Uuid) -> Option<ChronoDuration> {
        self.generation_time(event_id).map(|t| Utc::now() - t)
    }

    /// Freshness classification of the current snapshot.
    ///
    /// Staleness up to one refresh interval is the documented contract;
    /// beyond `stale_after_intervals` intervals the refresh job itself
    /// has failed, which is a monitoring concern.
    pub fn health(&self, event_id: &Uuid) -> Option<CacheHealth> {
        let staleness = self.staleness(event_id)?;
        let bound = ChronoDuration::seconds(
            (self.settings.refresh_interval_secs * self.settings.stale_after_intervals as u64)
                as i64,
        );
        Some(if staleness > bound {
            CacheHealth::Expired
        } else {
            CacheHealth::Fresh
        })
    }

    /// Start the periodic refresh loop over all registered events.
    pub fn start_refresher(&mut self) -> Result<(), LeaderboardError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(LeaderboardError::AlreadyRunning);
        }

        let db = Arc::clone(&self.db);
        let settings = self.settings.clone();
        let snapshots = Arc::clone(&self.snapshots);
        let events = Arc::clone(&self.events);
        let generation = Arc::clone(&self.generation);
        let running = Arc::clone(&self.running);
        let stop_notify = Arc::clone(&self.stop_notify);

        self.task = Some(tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs(settings.refresh_interval_secs));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            while running.load(Ordering::SeqCst) {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = stop_notify.notified() => break,
                }
                if !running.load(Ordering::SeqCst) {
                    break;
                }

                let event_ids: Vec<Uuid> = events
                    .lock()
                    .expect("events lock poisoned")
                    .iter()
                    .copied()
                    .collect();

                for event_id in event_ids {
                    let next_gen = generation.fetch_add(1, Ordering::SeqCst) + 1;
                    let result = {
                        let db = db.lock().expect("database lock poisoned");
                        Self::compute_snapshot(&db, &event_id, settings.cached_top_n, next_gen)
                    };

                    match result {
                        Ok(snapshot) => {
                            snapshots
                                .write()
                                .expect("snapshots lock poisoned")
                                .insert(event_id, Arc::new(snapshot));
                        }
                        Err(e) => {
                            tracing::warn!(
                                "Leaderboard refresh failed for event {}: {}",
                                event_id,
                                e
                            );
                        }
                    }
                }
            }
        }));

        tracing::info!(
            "Leaderboard refresher started ({} s cadence)",
            self.settings.refresh_interval_secs
        );
        Ok(())
    }

    /// Stop the refresh loop. Published snapshots remain readable.
    pub async fn stop_refresher(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.stop_notify.notify_one();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        tracing::info!("Leaderboard refresher stopped");
    }

    /// Check if the refresher is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Leaderboard errors.
#[derive(Debug, thiserror::Error)]
pub enum LeaderboardError {
    #[error("No snapshot published for event {0}")]
    NoSnapshot(Uuid),

    #[error("Refresher already running")]
    AlreadyRunning,

    #[error("Query failed: {0}")]
    QueryFailed(String),
}

impl LeaderboardError {
    fn from_database(e: DatabaseError) -> Self {
        LeaderboardError::QueryFailed(e.to_string())
    }
}
