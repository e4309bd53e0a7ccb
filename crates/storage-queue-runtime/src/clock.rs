//! Time sources.
//!
//! The in-memory provider stamps insertion, expiration and visibility times
//! through a [`Clock`] so tests can pin the current time.

use crate::message::Timestamp;
use chrono::{DateTime, Duration, Utc};
use std::sync::RwLock;

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;

/// Source of the current time
pub trait Clock: Send + Sync {
    /// Current time
    fn now(&self) -> Timestamp;
}

/// Wall-clock time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    current: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    /// Create clock fixed at `start`
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: RwLock::new(start),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, duration: Duration) {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        *current += duration;
    }

    /// Jump to an absolute time
    pub fn set(&self, time: DateTime<Utc>) {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        *current = time;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        let current = self.current.read().unwrap_or_else(|e| e.into_inner());
        Timestamp::from_datetime(*current)
    }
}
