//! Integration tests for leaderboard snapshots and live rank.
//!
//! Exercises the cached top-N board and the live resolver together
//! against one score store, including tie handling and snapshot
//! generation semantics.

use chrono::{Duration as ChronoDuration, Utc};
use crowdpulse::leaderboard::cache::{LeaderboardCache, LeaderboardError};
use crowdpulse::leaderboard::resolver::RankResolver;
use crowdpulse::storage::config::LeaderboardSettings;
use crowdpulse::storage::database::{Database, Profile};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

fn open_store() -> Arc<Mutex<Database>> {
    Arc::new(Mutex::new(Database::open_in_memory().unwrap()))
}

fn seed_user(db: &Arc<Mutex<Database>>, event_id: Uuid, name: &str, score: f64) -> Uuid {
    let user_id = Uuid::new_v4();
    let mut db = db.lock().unwrap();
    db.upsert_profile(&Profile::new(user_id, name.to_string()))
        .unwrap();
    if score > 0.0 {
        let t0 = Utc::now();
        db.apply_delta(&event_id, &user_id, score, t0, t0 + ChronoDuration::seconds(3))
            .unwrap();
    }
    user_id
}

#[test]
fn test_cached_board_and_live_rank_agree_on_fresh_data() {
    let db = open_store();
    let event_id = Uuid::new_v4();
    let scores = [
        ("Ava", 500.0),
        ("Ben", 350.0),
        ("Cleo", 200.0),
        ("Dev", 125.0),
    ];
    let ids: Vec<Uuid> = scores
        .iter()
        .map(|(name, score)| seed_user(&db, event_id, name, *score))
        .collect();

    let cache = LeaderboardCache::new(Arc::clone(&db), LeaderboardSettings::default());
    cache.refresh(&event_id).unwrap();
    let resolver = RankResolver::new(Arc::clone(&db));

    let board = cache.top_n(&event_id, 100).unwrap();
    assert_eq!(board.len(), 4);

    for (i, user_id) in ids.iter().enumerate() {
        let cached = board.iter().find(|e| e.user_id == *user_id).unwrap();
        let live = resolver.resolve(&event_id, user_id).unwrap().unwrap();
        assert_eq!(cached.rank, (i + 1) as u32);
        assert_eq!(live.rank, cached.rank);
        assert_eq!(live.score, cached.score);
    }
}

#[test]
fn test_live_rank_leads_the_cache_between_refreshes() {
    let db = open_store();
    let event_id = Uuid::new_v4();
    let leader = seed_user(&db, event_id, "Leader", 300.0);
    let chaser = seed_user(&db, event_id, "Chaser", 250.0);

    let cache = LeaderboardCache::new(Arc::clone(&db), LeaderboardSettings::default());
    cache.refresh(&event_id).unwrap();
    let resolver = RankResolver::new(Arc::clone(&db));

    // Chaser overtakes after the snapshot was published.
    {
        let mut db = db.lock().unwrap();
        let t1 = Utc::now() + ChronoDuration::seconds(10);
        db.apply_delta(&event_id, &chaser, 100.0, t1, t1 + ChronoDuration::seconds(3))
            .unwrap();
    }

    // Cache still shows the old order; the resolver sees the overtake.
    let board = cache.top_n(&event_id, 10).unwrap();
    assert_eq!(board[0].user_id, leader);
    assert_eq!(
        resolver.resolve(&event_id, &chaser).unwrap().unwrap().rank,
        1
    );
    assert_eq!(
        resolver.resolve(&event_id, &leader).unwrap().unwrap().rank,
        2
    );

    // Next refresh reconciles the board.
    cache.refresh(&event_id).unwrap();
    let board = cache.top_n(&event_id, 10).unwrap();
    assert_eq!(board[0].user_id, chaser);
}

#[test]
fn test_tied_scores_hold_their_order_across_refreshes() {
    let db = open_store();
    let event_id = Uuid::new_v4();

    let first = seed_user(&db, event_id, "First", 100.0);
    std::thread::sleep(std::time::Duration::from_millis(5));
    let second = seed_user(&db, event_id, "Second", 100.0);

    let cache = LeaderboardCache::new(Arc::clone(&db), LeaderboardSettings::default());

    let mut generations = Vec::new();
    for _ in 0..5 {
        let snapshot = cache.refresh(&event_id).unwrap();
        let order: Vec<Uuid> = snapshot.entries.iter().map(|e| e.user_id).collect();
        assert_eq!(order, vec![first, second]);
        generations.push(snapshot.generation);
    }

    // Generations advance even when the ordering does not change.
    assert!(generations.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_board_caps_at_top_n_but_counts_everyone() {
    let db = open_store();
    let event_id = Uuid::new_v4();
    for i in 0..12 {
        seed_user(&db, event_id, &format!("U{}", i), (i + 1) as f64 * 10.0);
    }

    let settings = LeaderboardSettings {
        cached_top_n: 10,
        ..LeaderboardSettings::default()
    };
    let cache = LeaderboardCache::new(Arc::clone(&db), settings);
    let snapshot = cache.refresh(&event_id).unwrap();

    assert_eq!(snapshot.entries.len(), 10);
    assert_eq!(snapshot.total_participants, 12);
    // Lowest two scores fell off the board
    assert!(snapshot.entries.iter().all(|e| e.score >= 30.0));
}

#[test]
fn test_unpublished_event_reads_fail_cleanly() {
    let db = open_store();
    let cache = LeaderboardCache::new(db, LeaderboardSettings::default());
    let unknown = Uuid::new_v4();

    assert!(matches!(
        cache.top_n(&unknown, 10),
        Err(LeaderboardError::NoSnapshot(_))
    ));
    assert!(cache.snapshot(&unknown).is_none());
    assert!(cache.health(&unknown).is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_background_refresher_publishes_generations() {
    let db = open_store();
    let event_id = Uuid::new_v4();
    seed_user(&db, event_id, "Solo", 42.0);

    let settings = LeaderboardSettings {
        refresh_interval_secs: 1,
        ..LeaderboardSettings::default()
    };
    let mut cache = LeaderboardCache::new(Arc::clone(&db), settings);
    cache.register_event(event_id);

    cache.start_refresher().unwrap();
    assert!(cache.is_running());
    tokio::time::sleep(std::time::Duration::from_millis(1300)).await;
    cache.stop_refresher().await;
    assert!(!cache.is_running());

    let snapshot = cache.snapshot(&event_id).unwrap();
    assert_eq!(snapshot.entries.len(), 1);
    assert_eq!(snapshot.entries[0].display_name, "Solo");
}
