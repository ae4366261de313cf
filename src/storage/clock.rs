//! Transaction-time clocks

use crate::core::temporal::Timestamp;
use std::sync::atomic::{AtomicI64, Ordering};

/// Source of transaction commit times
pub trait Clock: Send + Sync {
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

/// Manually advanced clock for deterministic transaction times
#[derive(Debug)]
pub struct ManualClock {
    nanos: AtomicI64,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            nanos: AtomicI64::new(start.as_nanos()),
        }
    }

    pub fn set(&self, ts: Timestamp) {
        self.nanos.store(ts.as_nanos(), Ordering::SeqCst);
    }

    /// Move forward by whole seconds, returning the new time
    pub fn advance_secs(&self, secs: i64) -> Timestamp {
        let delta = secs * 1_000_000_000;
        Timestamp::from_nanos(self.nanos.fetch_add(delta, Ordering::SeqCst) + delta)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_nanos(self.nanos.load(Ordering::SeqCst))
    }
}
