//! Clock abstraction for testable timing.
//!
//! Dealers and pipelines take their timers through [`Clock`] so deployments
//! can inject alternative time sources. The production implementation maps
//! to tokio's timer, which also means the whole suite runs deterministically
//! under tokio's paused test time.

use std::time::{Duration, Instant, SystemTime};

use crate::log::BoxedFuture;

/// Injectable time source.
pub trait Clock: Send + Sync + std::fmt::Debug + 'static {
    /// Returns the current instant for duration measurements.
    fn now(&self) -> Instant;

    /// Returns the current system time for timestamps.
    fn now_system(&self) -> SystemTime;

    /// Sleeps for the specified duration.
    fn sleep(&self, duration: Duration) -> BoxedFuture<'_, ()>;
}

/// Production clock backed by system time and tokio's timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Creates a new system clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn now_system(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep(&self, duration: Duration) -> BoxedFuture<'_, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}
