//! Unique id source: monotonic, timestamp-derived entry and store ids.
//!
//! Ids are nanoseconds since the Unix epoch, bumped by one whenever the clock
//! has not advanced (or went backwards) since the previous id. They never
//! collide or decrease across threads, which FIFO-within-priority relies on.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A source of strictly increasing `i64` ids.
#[derive(Debug)]
pub struct UniqueIdGenerator {
    /// Last id handed out.
    last: AtomicI64,
}

impl UniqueIdGenerator {
    pub const fn new() -> Self {
        Self {
            last: AtomicI64::new(0),
        }
    }

    /// Allocate the next id, never smaller than the current wall clock.
    pub fn next(&self) -> i64 {
        let now = wall_clock_nanos();
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(prev.saturating_add(1));
            match self.last.compare_exchange_weak(
                prev,
                candidate,
                Ordering::SeqCst,
                Ordering::Relaxed,
            ) {
                Ok(_) => return candidate,
                Err(actual) => prev = actual,
            }
        }
    }

    /// Read the last id without allocating.
    pub fn read(&self) -> i64 {
        self.last.load(Ordering::SeqCst)
    }
}

impl Default for UniqueIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL: UniqueIdGenerator = UniqueIdGenerator::new();

/// Next id from the process-wide generator.
pub fn next_unique_id() -> i64 {
    GLOBAL.next()
}

fn wall_clock_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
