//! Energy batcher: bounds write amplification while preserving accuracy.
//!
//! Samples arrive at sensor cadence (default 100 ms); network writes leave
//! at flush cadence (default 3000 ms), cutting write volume ~30x versus
//! per-sample writes. Drained-but-undelivered deltas live in a pending
//! queue separate from the accumulator, so a retry in flight never blocks
//! sampling and never double counts.

use crate::energy::accumulator::EnergyAccumulator;
use crate::energy::types::{BatchError, BatchEvent, EnergyDelta, SinkError};
use crate::motion::types::MotionSample;
use crate::storage::config::BatchSettings;
use chrono::Utc;
use crossbeam::channel::{Receiver, Sender};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

/// Destination for flushed deltas.
///
/// Implementations perform the actual write (local aggregator, HTTP
/// backend) and return the confirmed total score. Delivery is
/// at-least-once: an implementation must tolerate re-submission of the
/// same window without double counting.
pub trait DeltaSink: Send + Sync {
    /// Apply one delta and return the resulting total score.
    fn submit(&self, delta: &EnergyDelta) -> Result<f64, SinkError>;
}

/// Clonable handle for feeding samples into a batcher's open window
/// from another thread, without sharing the batcher itself.
#[derive(Clone)]
pub struct SampleFeed {
    accumulator: Arc<Mutex<EnergyAccumulator>>,
}

impl SampleFeed {
    /// Record a classified sample into the open window.
    pub fn record(&self, sample: &MotionSample) {
        let mut acc = self.accumulator.lock().expect("accumulator lock poisoned");
        acc.add(sample);
    }
}

/// Batches sampled energy into periodic delta writes.
pub struct EnergyBatcher {
    config: BatchSettings,
    accumulator: Arc<Mutex<EnergyAccumulator>>,
    /// Drained deltas awaiting delivery (front = oldest)
    pending: Arc<Mutex<VecDeque<EnergyDelta>>>,
    sink: Arc<dyn DeltaSink>,
    event_tx: Option<Sender<BatchEvent>>,
    running: Arc<AtomicBool>,
    flushing: Arc<AtomicBool>,
    stop_notify: Arc<Notify>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl EnergyBatcher {
    /// Create a batcher for one (event, user) pair writing to `sink`.
    pub fn new(
        event_id: Uuid,
        user_id: Uuid,
        sink: Arc<dyn DeltaSink>,
        config: BatchSettings,
    ) -> Self {
        Self {
            config,
            accumulator: Arc::new(Mutex::new(EnergyAccumulator::new(
                event_id,
                user_id,
                Utc::now(),
            ))),
            pending: Arc::new(Mutex::new(VecDeque::new())),
            sink,
            event_tx: None,
            running: Arc::new(AtomicBool::new(false)),
            flushing: Arc::new(AtomicBool::new(false)),
            stop_notify: Arc::new(Notify::new()),
            task: None,
        }
    }

    /// Get an event receiver for batch events.
    pub fn event_receiver(&mut self) -> Receiver<BatchEvent> {
        let (tx, rx) = crossbeam::channel::unbounded();
        self.event_tx = Some(tx);
        rx
    }

    /// Get a clonable feed into this batcher's open window.
    pub fn sample_feed(&self) -> SampleFeed {
        SampleFeed {
            accumulator: Arc::clone(&self.accumulator),
        }
    }

    /// Record a classified sample into the open window.
    ///
    /// Cheap and lock-brief: never waits on a network round trip.
    pub fn record_sample(&self, sample: &MotionSample) {
        let mut acc = self.accumulator.lock().expect("accumulator lock poisoned");
        acc.add(sample);
    }

    /// Energy accrued in the open window (not yet drained).
    pub fn pending_amount(&self) -> f64 {
        self.accumulator
            .lock()
            .expect("accumulator lock poisoned")
            .pending_amount()
    }

    /// Deltas drained but not yet delivered.
    pub fn undelivered(&self) -> Vec<EnergyDelta> {
        self.pending
            .lock()
            .expect("pending lock poisoned")
            .iter()
            .cloned()
            .collect()
    }

    /// Explicitly discard undelivered deltas, returning them.
    ///
    /// The only path by which accumulated energy may be dropped, and the
    /// caller makes that decision.
    pub fn discard_undelivered(&self) -> Vec<EnergyDelta> {
        self.pending
            .lock()
            .expect("pending lock poisoned")
            .drain(..)
            .collect()
    }

    /// Whether a flush cycle is in progress.
    pub fn is_flushing(&self) -> bool {
        self.flushing.load(Ordering::SeqCst)
    }

    /// Check if the flush loop is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the periodic flush loop.
    pub fn start(&mut self) -> Result<(), BatchError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(BatchError::AlreadyRunning);
        }

        let config = self.config.clone();
        let accumulator = Arc::clone(&self.accumulator);
        let pending = Arc::clone(&self.pending);
        let sink = Arc::clone(&self.sink);
        let event_tx = self.event_tx.clone();
        let running = Arc::clone(&self.running);
        let flushing = Arc::clone(&self.flushing);
        let stop_notify = Arc::clone(&self.stop_notify);

        self.task = Some(tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_millis(config.flush_interval_ms));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; skip it so the first
            // window spans a full interval.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = stop_notify.notified() => break,
                }
                if !running.load(Ordering::SeqCst) {
                    break;
                }

                flushing.store(true, Ordering::SeqCst);
                Self::flush_once(&config, &accumulator, &pending, &sink, event_tx.as_ref())
                    .await;
                flushing.store(false, Ordering::SeqCst);
            }
        }));

        tracing::info!(
            "Energy batcher started ({} ms flush interval)",
            self.config.flush_interval_ms
        );
        Ok(())
    }

    /// Stop the batcher.
    ///
    /// Performs one final drain-and-deliver of any remaining energy before
    /// returning; waits for the terminal outcome. If retries are exhausted
    /// the undelivered deltas are preserved (see `undelivered()` /
    /// `discard_undelivered()`) and reported in the error.
    pub async fn stop(&mut self) -> Result<(), BatchError> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(BatchError::NotRunning);
        }

        self.stop_notify.notify_one();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }

        // Final flush: no energy may be silently dropped on stop.
        self.flushing.store(true, Ordering::SeqCst);
        Self::flush_once(
            &self.config,
            &self.accumulator,
            &self.pending,
            &self.sink,
            self.event_tx.as_ref(),
        )
        .await;
        self.flushing.store(false, Ordering::SeqCst);

        if let Some(tx) = &self.event_tx {
            let _ = tx.send(BatchEvent::Stopped);
        }

        let undelivered = self.undelivered();
        if undelivered.is_empty() {
            tracing::info!("Energy batcher stopped, fully drained");
            Ok(())
        } else {
            tracing::error!(
                "Energy batcher stopped with {} undelivered delta(s)",
                undelivered.len()
            );
            Err(BatchError::RetriesExhausted { undelivered })
        }
    }

    /// One flush cycle: drain the open window, then deliver the pending
    /// queue in order.
    async fn flush_once(
        config: &BatchSettings,
        accumulator: &Arc<Mutex<EnergyAccumulator>>,
        pending: &Arc<Mutex<VecDeque<EnergyDelta>>>,
        sink: &Arc<dyn DeltaSink>,
        event_tx: Option<&Sender<BatchEvent>>,
    ) {
        // Drain holds the lock only for the read-and-reset, never across
        // network I/O, so sampling continues into the next window while
        // delivery (or a retry) is in flight.
        let drained = {
            let mut acc = accumulator.lock().expect("accumulator lock poisoned");
            acc.drain_and_reset(Utc::now())
        };
        if let Some(delta) = drained {
            pending.lock().expect("pending lock poisoned").push_back(delta);
        }

        loop {
            let next = pending
                .lock()
                .expect("pending lock poisoned")
                .front()
                .cloned();
            let Some(delta) = next else { break };

            match Self::deliver_with_retry(config, sink, &delta).await {
                Ok(score) => {
                    pending.lock().expect("pending lock poisoned").pop_front();
                    tracing::debug!(
                        "Delivered delta {} ({:.1} points, total {:.1})",
                        delta.dedup_key(),
                        delta.amount,
                        score
                    );
                    if let Some(tx) = event_tx {
                        let _ = tx.send(BatchEvent::Flushed { delta, score });
                    }
                }
                Err(SinkError::Rejected(msg)) => {
                    // Structural: retrying cannot succeed. Surface and
                    // drop this delta only.
                    pending.lock().expect("pending lock poisoned").pop_front();
                    tracing::error!("Delta {} rejected: {}", delta.dedup_key(), msg);
                    if let Some(tx) = event_tx {
                        let _ = tx.send(BatchEvent::FlushFailed { delta, error: msg });
                    }
                }
                Err(SinkError::Unavailable(msg)) => {
                    // Transient and retries exhausted for this cycle: keep
                    // the delta queued for the next cycle.
                    tracing::warn!(
                        "Delta {} undelivered after {} attempts: {}",
                        delta.dedup_key(),
                        config.max_flush_attempts,
                        msg
                    );
                    if let Some(tx) = event_tx {
                        let _ = tx.send(BatchEvent::FlushFailed { delta, error: msg });
                    }
                    break;
                }
            }
        }
    }

    /// Deliver one delta with bounded exponential backoff and a
    /// per-attempt timeout.
    async fn deliver_with_retry(
        config: &BatchSettings,
        sink: &Arc<dyn DeltaSink>,
        delta: &EnergyDelta,
    ) -> Result<f64, SinkError> {
        let mut backoff = Duration::from_millis(config.retry_backoff_ms);
        let timeout = Duration::from_millis(config.network_timeout_ms);
        let attempts = config.max_flush_attempts.max(1);
        let mut last_err = SinkError::Unavailable("no attempts made".to_string());

        for attempt in 1..=attempts {
            let sink = Arc::clone(sink);
            let submitted = delta.clone();
            let call = tokio::task::spawn_blocking(move || sink.submit(&submitted));

            let result = match tokio::time::timeout(timeout, call).await {
                Err(_) => Err(SinkError::Unavailable(format!(
                    "write timed out after {:?}",
                    timeout
                ))),
                Ok(Err(join_err)) => {
                    Err(SinkError::Unavailable(format!("write task failed: {}", join_err)))
                }
                Ok(Ok(result)) => result,
            };

            match result {
                Ok(score) => return Ok(score),
                Err(SinkError::Rejected(msg)) => return Err(SinkError::Rejected(msg)),
                Err(SinkError::Unavailable(msg)) => {
                    tracing::debug!(
                        "Flush attempt {}/{} failed: {}",
                        attempt,
                        attempts,
                        msg
                    );
                    last_err = SinkError::Unavailable(msg);
                    if attempt < attempts {
                        tokio::time::sleep(backoff).await;
                        backoff = backoff.saturating_mul(2);
                    }
                }
            }
        }

        Err(last_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::types::{IntensityTier, MotionSample};
    use std::sync::atomic::AtomicU32;

    fn medium_sample() -> MotionSample {
        MotionSample {
            magnitude: 1.3,
            tier: IntensityTier::Medium,
            sampled_at: Utc::now(),
        }
    }

    fn fast_settings() -> BatchSettings {
        BatchSettings {
            flush_interval_ms: 20,
            max_flush_attempts: 3,
            retry_backoff_ms: 1,
            network_timeout_ms: 1000,
        }
    }

    /// Records every accepted delta; can be told to fail the next N
    /// submissions to exercise the retry path.
    struct TestSink {
        accepted: Mutex<Vec<EnergyDelta>>,
        total: Mutex<f64>,
        fail_next: AtomicU32,
    }

    impl TestSink {
        fn new() -> Self {
            Self {
                accepted: Mutex::new(Vec::new()),
                total: Mutex::new(0.0),
                fail_next: AtomicU32::new(0),
            }
        }

        fn failing(times: u32) -> Self {
            let sink = Self::new();
            sink.fail_next.store(times, Ordering::SeqCst);
            sink
        }

        fn total(&self) -> f64 {
            *self.total.lock().unwrap()
        }

        fn accepted(&self) -> Vec<EnergyDelta> {
            self.accepted.lock().unwrap().clone()
        }
    }

    impl DeltaSink for TestSink {
        fn submit(&self, delta: &EnergyDelta) -> Result<f64, SinkError> {
            if self
                .fail_next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(SinkError::Unavailable("simulated outage".to_string()));
            }

            let mut accepted = self.accepted.lock().unwrap();
            // At-least-once tolerance: same window applied once
            if accepted.iter().any(|d| {
                d.window_start == delta.window_start && d.window_end == delta.window_end
            }) {
                return Ok(*self.total.lock().unwrap());
            }

            accepted.push(delta.clone());
            let mut total = self.total.lock().unwrap();
            *total += delta.amount;
            Ok(*total)
        }
    }

    #[tokio::test]
    async fn test_periodic_flush_delivers_accumulated_energy() {
        let sink = Arc::new(TestSink::new());
        let mut batcher = EnergyBatcher::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Arc::clone(&sink) as Arc<dyn DeltaSink>,
            fast_settings(),
        );
        let rx = batcher.event_receiver();

        batcher.start().unwrap();
        for _ in 0..4 {
            batcher.record_sample(&medium_sample());
        }
        tokio::time::sleep(Duration::from_millis(60)).await;
        batcher.stop().await.unwrap();

        assert_eq!(sink.total(), 8.0);
        assert!(rx
            .try_iter()
            .any(|e| matches!(e, BatchEvent::Flushed { .. })));
    }

    #[tokio::test]
    async fn test_stop_flushes_remaining_energy_exactly_once() {
        let sink = Arc::new(TestSink::new());
        let mut batcher = EnergyBatcher::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Arc::clone(&sink) as Arc<dyn DeltaSink>,
            BatchSettings {
                flush_interval_ms: 60_000, // never ticks during the test
                ..fast_settings()
            },
        );

        batcher.start().unwrap();
        for _ in 0..3 {
            batcher.record_sample(&medium_sample());
        }
        batcher.stop().await.unwrap();

        assert_eq!(sink.total(), 6.0);
        assert_eq!(sink.accepted().len(), 1);
        assert_eq!(batcher.pending_amount(), 0.0);
        assert!(batcher.undelivered().is_empty());
    }

    #[tokio::test]
    async fn test_transient_failure_retried_without_double_count() {
        // First attempt fails; backoff retry succeeds within one cycle.
        let sink = Arc::new(TestSink::failing(1));
        let mut batcher = EnergyBatcher::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Arc::clone(&sink) as Arc<dyn DeltaSink>,
            fast_settings(),
        );

        batcher.start().unwrap();
        batcher.record_sample(&medium_sample());
        batcher.record_sample(&medium_sample());
        tokio::time::sleep(Duration::from_millis(60)).await;
        batcher.stop().await.unwrap();

        assert_eq!(sink.total(), 4.0);
        assert_eq!(sink.accepted().len(), 1);
    }

    #[tokio::test]
    async fn test_pending_retry_does_not_affect_next_window() {
        // Sink down long enough that the first delta sits in the pending
        // queue, while new samples keep accruing in a fresh window.
        let sink = Arc::new(TestSink::failing(3));
        let mut batcher = EnergyBatcher::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Arc::clone(&sink) as Arc<dyn DeltaSink>,
            BatchSettings {
                flush_interval_ms: 20,
                max_flush_attempts: 1,
                retry_backoff_ms: 1,
                network_timeout_ms: 1000,
            },
        );

        batcher.start().unwrap();
        batcher.record_sample(&medium_sample());
        tokio::time::sleep(Duration::from_millis(30)).await;

        // First window drained and stuck in pending; new samples land in
        // the next window untouched by the retry.
        assert_eq!(batcher.undelivered().len(), 1);
        batcher.record_sample(&medium_sample());
        batcher.record_sample(&medium_sample());
        assert_eq!(batcher.pending_amount(), 4.0);

        // Sink recovers; everything is delivered, nothing twice.
        tokio::time::sleep(Duration::from_millis(80)).await;
        batcher.stop().await.unwrap();

        assert_eq!(sink.total(), 6.0);
        assert_eq!(sink.accepted().len(), 2);
    }

    #[tokio::test]
    async fn test_stop_preserves_undelivered_on_exhausted_retries() {
        let sink = Arc::new(TestSink::failing(u32::MAX));
        let mut batcher = EnergyBatcher::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Arc::clone(&sink) as Arc<dyn DeltaSink>,
            BatchSettings {
                flush_interval_ms: 60_000,
                max_flush_attempts: 2,
                retry_backoff_ms: 1,
                network_timeout_ms: 1000,
            },
        );

        batcher.start().unwrap();
        batcher.record_sample(&medium_sample());

        let result = batcher.stop().await;
        match result {
            Err(BatchError::RetriesExhausted { undelivered }) => {
                assert_eq!(undelivered.len(), 1);
                assert_eq!(undelivered[0].amount, 2.0);
            }
            other => panic!("expected RetriesExhausted, got {:?}", other),
        }

        // Preserved for a subsequent retry or explicit discard
        assert_eq!(batcher.undelivered().len(), 1);
        let discarded = batcher.discard_undelivered();
        assert_eq!(discarded.len(), 1);
        assert!(batcher.undelivered().is_empty());
    }

    #[tokio::test]
    async fn test_idle_user_generates_no_writes() {
        let sink = Arc::new(TestSink::new());
        let mut batcher = EnergyBatcher::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Arc::clone(&sink) as Arc<dyn DeltaSink>,
            fast_settings(),
        );

        batcher.start().unwrap();
        batcher.record_sample(&MotionSample {
            magnitude: 1.0,
            tier: IntensityTier::Idle,
            sampled_at: Utc::now(),
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        batcher.stop().await.unwrap();

        assert!(sink.accepted().is_empty());
    }
}
