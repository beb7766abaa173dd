//! Tracking session lifecycle.
//!
//! A session ties one user's motion sampling to energy batching for one
//! event. Start marks the user live and begins sampling; stop tears the
//! pipeline down in order (sampler first, then a final batch drain) so
//! energy sensed before the stop is never silently dropped.

use crate::energy::batcher::EnergyBatcher;
use crate::energy::types::BatchError;
use crate::motion::provider::AccelerometerProvider;
use crate::motion::sampler::MotionSampler;
use crate::motion::types::{MotionError, MotionEvent};
use crate::scoring::aggregator::{AggregateError, ScoreAggregator};
use crate::storage::config::EngineConfig;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// Lifecycle state of a tracking session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not tracking; no sampling, no writes
    Idle,
    /// Sampling motion and accruing energy
    Sampling,
    /// Stop requested; draining remaining energy
    Flushing,
}

/// One user's live tracking session within an event.
pub struct TrackingSession {
    event_id: Uuid,
    user_id: Uuid,
    sampler: MotionSampler,
    batcher: EnergyBatcher,
    aggregator: Arc<ScoreAggregator>,
    state: Arc<Mutex<SessionState>>,
    pump: Option<tokio::task::JoinHandle<()>>,
}

impl TrackingSession {
    /// Create an idle session for a (event, user) pair.
    pub fn new(
        event_id: Uuid,
        user_id: Uuid,
        provider: Arc<dyn AccelerometerProvider>,
        aggregator: Arc<ScoreAggregator>,
        config: &EngineConfig,
    ) -> Self {
        let sampler = MotionSampler::with_interval(
            provider,
            Duration::from_millis(config.sampling.sample_interval_ms),
        );
        let batcher = EnergyBatcher::new(
            event_id,
            user_id,
            Arc::clone(&aggregator) as Arc<dyn crate::energy::batcher::DeltaSink>,
            config.batching.clone(),
        );

        Self {
            event_id,
            user_id,
            sampler,
            batcher,
            aggregator,
            state: Arc::new(Mutex::new(SessionState::Idle)),
            pump: None,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.lock().expect("state lock poisoned")
    }

    /// Start tracking: start the sampler, then the batcher's flush loop,
    /// mark the user live, and pump classified samples between them.
    ///
    /// On a sensor failure nothing is left running and the user is not
    /// marked live.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        {
            let state = self.state.lock().expect("state lock poisoned");
            if *state != SessionState::Idle {
                return Err(SessionError::AlreadyActive);
            }
        }

        let rx = self.sampler.event_receiver();
        let feed = self.batcher.sample_feed();

        // Sampler first: its sensor probe is the only start step that can
        // realistically fail, and at this point nothing needs rollback.
        self.sampler.start()?;
        if let Err(e) = self.batcher.start() {
            let _ = self.sampler.stop().await;
            return Err(e.into());
        }

        if let Err(e) = self
            .aggregator
            .set_live(&self.event_id, &self.user_id, true)
        {
            let _ = self.sampler.stop().await;
            // The window is empty; stop cannot leave undelivered data.
            let _ = self.batcher.stop().await;
            return Err(e.into());
        }

        // The crossbeam receiver blocks, so the pump lives on a blocking
        // thread; it exits when the sampler emits its end-of-stream marker.
        self.pump = Some(tokio::task::spawn_blocking(move || {
            for event in rx.iter() {
                match event {
                    MotionEvent::Sample(sample) => feed.record(&sample),
                    MotionEvent::Stopped => break,
                    MotionEvent::Started => {}
                }
            }
        }));

        *self.state.lock().expect("state lock poisoned") = SessionState::Sampling;
        tracing::info!(
            "Tracking session started for user {} in event {}",
            self.user_id,
            self.event_id
        );
        Ok(())
    }

    /// Stop tracking.
    ///
    /// Stops the sampler first so no new samples arrive, then performs the
    /// batcher's final drain. The user is marked not-live even if the
    /// drain fails; in that case the undelivered deltas are reported in
    /// the error and remain retrievable from the session.
    pub async fn stop(&mut self) -> Result<(), SessionError> {
        {
            let mut state = self.state.lock().expect("state lock poisoned");
            if *state != SessionState::Sampling {
                return Err(SessionError::NotActive);
            }
            *state = SessionState::Flushing;
        }

        // A sampler that hit a sensor fault mid-session has already
        // stopped itself; the session still owes the final drain, the
        // live-flag clear, and the transition to Idle.
        if let Err(e) = self.sampler.stop().await {
            tracing::warn!("Sampler already stopped: {}", e);
        }
        if let Some(pump) = self.pump.take() {
            let _ = pump.await;
        }

        let drain = self.batcher.stop().await;

        self.aggregator
            .set_live(&self.event_id, &self.user_id, false)?;
        *self.state.lock().expect("state lock poisoned") = SessionState::Idle;

        match drain {
            Ok(()) => {
                tracing::info!(
                    "Tracking session for user {} ended, fully drained",
                    self.user_id
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Energy accrued in the open window but not yet flushed.
    pub fn unflushed_energy(&self) -> f64 {
        self.batcher.pending_amount()
    }

    /// Deltas drained but never delivered (after a failed stop).
    pub fn undelivered(&self) -> Vec<crate::energy::types::EnergyDelta> {
        self.batcher.undelivered()
    }
}

/// Session lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session already active")]
    AlreadyActive,

    #[error("Session not active")]
    NotActive,

    #[error("Motion error: {0}")]
    Motion(#[from] MotionError),

    #[error("Batch error: {0}")]
    Batch(#[from] BatchError),

    #[error("Aggregation error: {0}")]
    Aggregate(#[from] AggregateError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::provider::SimulatedAccelerometer;
    use crate::storage::config::{BatchSettings, SamplingSettings};
    use crate::storage::database::Database;

    fn fast_config() -> EngineConfig {
        EngineConfig {
            sampling: SamplingSettings {
                sample_interval_ms: 5,
            },
            batching: BatchSettings {
                flush_interval_ms: 25,
                max_flush_attempts: 3,
                retry_backoff_ms: 1,
                network_timeout_ms: 1000,
            },
            ..EngineConfig::default()
        }
    }

    fn setup() -> (Arc<Mutex<Database>>, Arc<ScoreAggregator>) {
        let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        let aggregator = Arc::new(ScoreAggregator::new(Arc::clone(&db)));
        (db, aggregator)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_session_accrues_score_end_to_end() {
        let (_db, aggregator) = setup();
        let event_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();

        let mut session = TrackingSession::new(
            event_id,
            user_id,
            Arc::new(SimulatedAccelerometer::dancing()),
            Arc::clone(&aggregator),
            &fast_config(),
        );

        assert_eq!(session.state(), SessionState::Idle);
        session.start().await.unwrap();
        assert_eq!(session.state(), SessionState::Sampling);

        tokio::time::sleep(Duration::from_millis(80)).await;
        session.stop().await.unwrap();
        assert_eq!(session.state(), SessionState::Idle);

        let record = aggregator.score(&event_id, &user_id).unwrap().unwrap();
        assert!(record.score > 0.0);
        assert!(!record.is_live);
        assert_eq!(session.unflushed_energy(), 0.0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_start_marks_live_and_stop_clears_it() {
        let (db, aggregator) = setup();
        let event_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();

        let mut session = TrackingSession::new(
            event_id,
            user_id,
            Arc::new(SimulatedAccelerometer::dancing()),
            Arc::clone(&aggregator),
            &fast_config(),
        );

        session.start().await.unwrap();
        {
            let db = db.lock().unwrap();
            let record = db.get_score(&event_id, &user_id).unwrap().unwrap();
            assert!(record.is_live);
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        session.stop().await.unwrap();
        {
            let db = db.lock().unwrap();
            let record = db.get_score(&event_id, &user_id).unwrap().unwrap();
            assert!(!record.is_live);
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unavailable_sensor_leaves_session_idle() {
        let (db, aggregator) = setup();
        let event_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();

        let mut session = TrackingSession::new(
            event_id,
            user_id,
            Arc::new(SimulatedAccelerometer::unavailable()),
            Arc::clone(&aggregator),
            &fast_config(),
        );

        assert!(matches!(
            session.start().await,
            Err(SessionError::Motion(MotionError::SensorUnavailable(_)))
        ));
        assert_eq!(session.state(), SessionState::Idle);

        // Never marked live
        let db = db.lock().unwrap();
        assert!(db.get_score(&event_id, &user_id).unwrap().is_none());
    }

    /// Serves a few good readings, then fails every read like a sensor
    /// dropping out mid-session.
    struct DyingAccelerometer {
        reads_left: std::sync::atomic::AtomicU32,
    }

    impl DyingAccelerometer {
        fn after(reads: u32) -> Self {
            Self {
                reads_left: std::sync::atomic::AtomicU32::new(reads),
            }
        }
    }

    impl crate::motion::provider::AccelerometerProvider for DyingAccelerometer {
        fn check_available(&self) -> Result<(), MotionError> {
            Ok(())
        }

        fn read(&self) -> Result<crate::motion::types::Vector3, MotionError> {
            use std::sync::atomic::Ordering;
            if self
                .reads_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                Ok(crate::motion::types::Vector3::new(0.0, 1.3, 0.0))
            } else {
                Err(MotionError::ReadFailed("sensor dropped out".to_string()))
            }
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stop_after_sensor_death_still_drains() {
        let (_db, aggregator) = setup();
        let event_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();

        // Flush interval beyond the test duration: the only way the
        // accrued energy reaches the store is the drain on stop.
        let config = EngineConfig {
            sampling: SamplingSettings {
                sample_interval_ms: 5,
            },
            batching: BatchSettings {
                flush_interval_ms: 60_000,
                max_flush_attempts: 3,
                retry_backoff_ms: 1,
                network_timeout_ms: 1000,
            },
            ..EngineConfig::default()
        };

        let mut session = TrackingSession::new(
            event_id,
            user_id,
            Arc::new(DyingAccelerometer::after(3)),
            Arc::clone(&aggregator),
            &config,
        );

        session.start().await.unwrap();
        // Let the sensor serve its readings and then die.
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(session.unflushed_energy() > 0.0);

        session.stop().await.unwrap();
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.unflushed_energy(), 0.0);

        // 3 medium samples at 2.0 points each made it through before the
        // sensor died
        let record = aggregator.score(&event_id, &user_id).unwrap().unwrap();
        assert_eq!(record.score, 6.0);
        assert!(!record.is_live);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_double_start_and_stray_stop_rejected() {
        let (_db, aggregator) = setup();
        let mut session = TrackingSession::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Arc::new(SimulatedAccelerometer::dancing()),
            aggregator,
            &fast_config(),
        );

        assert!(matches!(
            session.stop().await,
            Err(SessionError::NotActive)
        ));

        session.start().await.unwrap();
        assert!(matches!(session.start().await, Err(SessionError::AlreadyActive)));
        session.stop().await.unwrap();
    }
}
