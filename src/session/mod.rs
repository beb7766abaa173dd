//! Tracking session lifecycle: wires motion sampling to energy batching.

pub mod tracker;

pub use tracker::{SessionError, SessionState, TrackingSession};
