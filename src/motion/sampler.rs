//! Fixed-cadence motion sampler.
//!
//! Polls an accelerometer provider on a fixed interval, classifies each
//! reading into an intensity tier, and streams the classified samples to
//! subscribers over an event channel.

use crate::motion::provider::AccelerometerProvider;
use crate::motion::types::{MotionError, MotionEvent, MotionSample};
use chrono::Utc;
use crossbeam::channel::{Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Default sampling interval (100 ms, 10 Hz).
pub const DEFAULT_SAMPLE_INTERVAL_MS: u64 = 100;

/// Samples an accelerometer at a fixed cadence.
pub struct MotionSampler {
    provider: Arc<dyn AccelerometerProvider>,
    sample_interval: Duration,
    event_tx: Option<Sender<MotionEvent>>,
    running: Arc<AtomicBool>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl MotionSampler {
    /// Create a sampler over the given provider with the default interval.
    pub fn new(provider: Arc<dyn AccelerometerProvider>) -> Self {
        Self::with_interval(provider, Duration::from_millis(DEFAULT_SAMPLE_INTERVAL_MS))
    }

    /// Create a sampler with an explicit sampling interval.
    pub fn with_interval(provider: Arc<dyn AccelerometerProvider>, interval: Duration) -> Self {
        Self {
            provider,
            sample_interval: interval,
            event_tx: None,
            running: Arc::new(AtomicBool::new(false)),
            task: None,
        }
    }

    /// Get an event receiver for motion events.
    ///
    /// Must be called before `start()`; replaces any previous receiver.
    pub fn event_receiver(&mut self) -> Receiver<MotionEvent> {
        let (tx, rx) = crossbeam::channel::unbounded();
        self.event_tx = Some(tx);
        rx
    }

    /// Start sampling.
    ///
    /// Fails with `SensorUnavailable` if the accelerometer cannot be read;
    /// in that case no samples are ever emitted.
    pub fn start(&mut self) -> Result<(), MotionError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(MotionError::AlreadyRunning);
        }

        // Probe the sensor up front so callers can disable tracking
        // instead of receiving a stream of zeros.
        self.provider.check_available()?;

        let tx = self.event_tx.clone().ok_or_else(|| {
            MotionError::ReadFailed("no event receiver attached".to_string())
        })?;

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let provider = Arc::clone(&self.provider);
        let interval = self.sample_interval;

        let _ = tx.send(MotionEvent::Started);

        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            while running.load(Ordering::SeqCst) {
                ticker.tick().await;
                if !running.load(Ordering::SeqCst) {
                    break;
                }

                match provider.read() {
                    Ok(acceleration) => {
                        let sample = MotionSample::classify(acceleration, Utc::now());
                        if tx.send(MotionEvent::Sample(sample)).is_err() {
                            // Receiver dropped; nothing left to feed.
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Accelerometer read failed: {}", e);
                        running.store(false, Ordering::SeqCst);
                        break;
                    }
                }
            }

            let _ = tx.send(MotionEvent::Stopped);
        }));

        tracing::info!("Motion sampling started ({:?} cadence)", interval);
        Ok(())
    }

    /// Stop sampling.
    ///
    /// Guarantees no further `Sample` events are emitted after this
    /// returns; the `Stopped` event marks the end of the stream.
    pub async fn stop(&mut self) -> Result<(), MotionError> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(MotionError::NotRunning);
        }

        if let Some(task) = self.task.take() {
            let _ = task.await;
        }

        tracing::info!("Motion sampling stopped");
        Ok(())
    }

    /// Check if currently sampling.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::provider::SimulatedAccelerometer;
    use crate::motion::types::IntensityTier;

    #[tokio::test]
    async fn test_sampler_emits_classified_samples() {
        let provider = Arc::new(SimulatedAccelerometer::new(vec![1.3]));
        let mut sampler = MotionSampler::with_interval(provider, Duration::from_millis(5));
        let rx = sampler.event_receiver();

        sampler.start().unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        sampler.stop().await.unwrap();

        let events: Vec<_> = rx.try_iter().collect();
        assert!(matches!(events.first(), Some(MotionEvent::Started)));
        assert!(matches!(events.last(), Some(MotionEvent::Stopped)));

        let samples: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                MotionEvent::Sample(s) => Some(*s),
                _ => None,
            })
            .collect();
        assert!(!samples.is_empty());
        assert!(samples.iter().all(|s| s.tier == IntensityTier::Medium));
    }

    #[tokio::test]
    async fn test_sampler_refuses_unavailable_sensor() {
        let provider = Arc::new(SimulatedAccelerometer::unavailable());
        let mut sampler = MotionSampler::new(provider);
        let rx = sampler.event_receiver();

        let result = sampler.start();
        assert!(matches!(result, Err(MotionError::SensorUnavailable(_))));
        assert!(!sampler.is_running());
        // No fabricated samples
        assert!(rx.try_iter().next().is_none());
    }

    #[tokio::test]
    async fn test_no_emissions_after_stop() {
        let provider = Arc::new(SimulatedAccelerometer::dancing());
        let mut sampler = MotionSampler::with_interval(provider, Duration::from_millis(5));
        let rx = sampler.event_receiver();

        sampler.start().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        sampler.stop().await.unwrap();

        // Drain everything emitted before the stop completed.
        let _ = rx.try_iter().count();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(rx.try_iter().count(), 0);
    }

    #[tokio::test]
    async fn test_double_start_rejected() {
        let provider = Arc::new(SimulatedAccelerometer::dancing());
        let mut sampler = MotionSampler::with_interval(provider, Duration::from_millis(5));
        let _rx = sampler.event_receiver();

        sampler.start().unwrap();
        assert!(matches!(sampler.start(), Err(MotionError::AlreadyRunning)));
        sampler.stop().await.unwrap();
    }
}
