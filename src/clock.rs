//! Monotonic time source (C1) — a testable seam so TTL scenarios don't need
//! real wall-clock sleeps.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

/// A monotonic clock. `Cache` only ever asks for `now()`; everything else
/// (TTL comparisons, batch-window deadlines) is expressed in terms of the
/// `Instant`s this returns.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Instant;
}

/// The default clock: `tokio::time::Instant::now()`. Compatible with
/// `tokio::time::{pause, advance}` in tests, so TTL/batch-window tests can
/// fast-forward virtual time instead of sleeping.
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A manually-advanced clock for tests that want explicit control without
/// relying on the Tokio test-util paused clock (e.g. unit tests for
/// `lru_index`/`entry` that don't run under a Tokio runtime at all).
#[derive(Debug, Clone)]
pub struct ManualClock {
    base: Instant,
    offset_ms: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Advance the clock by `d`. Never moves time backwards.
    pub fn advance(&self, d: Duration) {
        self.offset_ms
            .fetch_add(d.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + Duration::from_millis(self.offset_ms.load(Ordering::SeqCst))
    }
}

/// A shared, object-safe clock handle.
pub type SharedClock = Arc<dyn Clock>;

pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}
