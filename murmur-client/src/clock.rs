//! Wall-clock source for gap detection.

use std::fmt::Debug;

use chrono::{DateTime, Utc};

/// Source of wall-clock time for connection bookkeeping.
pub trait Clock: Send + Sync + Debug {
    /// Current time.
    fn now(&self) -> DateTime<Utc>;
}

/// [`Clock`] backed by the system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
