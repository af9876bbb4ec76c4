//! Monotonic and wall-clock time service (component A).
//!
//! Every other component reads time through this trait instead of calling
//! `Instant::now()`/`SystemTime::now()` directly so tests can substitute a
//! deterministic clock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Milliseconds since an arbitrary epoch, monotonic within a process run.
pub type MonoMs = u64;

pub trait Clock: Send + Sync {
    /// Monotonic milliseconds, never decreases within a process lifetime.
    fn now_ms(&self) -> MonoMs;

    /// Wall-clock milliseconds since the Unix epoch.
    fn wall_ms(&self) -> u64;

    /// Block the calling thread until `deadline` (monotonic ms).
    fn sleep_until(&self, deadline: MonoMs);
}

/// Real clock backed by `Instant`/`SystemTime`.
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> MonoMs {
        self.start.elapsed().as_millis() as u64
    }

    fn wall_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }

    fn sleep_until(&self, deadline: MonoMs) {
        let now = self.now_ms();
        if deadline > now {
            std::thread::sleep(Duration::from_millis(deadline - now));
        }
    }
}

/// Deterministic clock for tests: `now_ms` is a manually advanced counter,
/// `sleep_until` advances the counter instead of blocking.
pub struct TestClock {
    ms: AtomicU64,
}

impl TestClock {
    pub fn new() -> Self {
        Self { ms: AtomicU64::new(0) }
    }

    pub fn advance(&self, delta_ms: u64) {
        self.ms.fetch_add(delta_ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: u64) {
        self.ms.store(ms, Ordering::SeqCst);
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now_ms(&self) -> MonoMs {
        self.ms.load(Ordering::SeqCst)
    }

    fn wall_ms(&self) -> u64 {
        self.now_ms()
    }

    fn sleep_until(&self, deadline: MonoMs) {
        let now = self.now_ms();
        if deadline > now {
            self.ms.store(deadline, Ordering::SeqCst);
        }
    }
}
