//! Wall-clock abstraction so cooldown windows can be driven from tests.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Source of the current time for every ledger operation.
pub trait TimeSource: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

/// Production time source backed by the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock shared between a test and the code under test.
///
/// Clones observe the same instant.
#[derive(Debug, Clone)]
pub struct SharedMockTimeSource {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl Default for SharedMockTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedMockTimeSource {
    /// Start at a fixed, whole-second instant so assertions stay readable.
    pub fn new() -> Self {
        let start = DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_else(Utc::now);
        Self::starting_at(start)
    }

    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance_time(&self, by: Duration) {
        if let Ok(delta) = chrono::Duration::from_std(by) {
            *self.now.lock() += delta;
        }
    }
}

impl TimeSource for SharedMockTimeSource {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}
