//! Injectable time source.
//!
//! Every timing-sensitive component (adaptive TTL, cooldowns, due-time
//! computation) reads time through this trait instead of calling
//! `SystemTime::now()` directly, so tests can drive a deterministic clock
//! instead of sleeping through real wall-clock seconds.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// A time source. `now()` is wall-clock seconds since the epoch (matching
/// the envelope's `created_at`/`last_accessed` fields); `monotonic_ms()` is
/// a monotonically increasing millisecond counter used for durations.
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
    fn monotonic_ms(&self) -> u64;
}

/// Real wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64()
    }

    fn monotonic_ms(&self) -> u64 {
        static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
        let start = START.get_or_init(std::time::Instant::now);
        start.elapsed().as_millis() as u64
    }
}

/// A manually-advanced clock for deterministic tests.
#[derive(Debug, Clone)]
pub struct ManualClock {
    secs: Arc<AtomicU64>,
    // stored as fixed-point millis of seconds to keep atomics simple
    frac_millis: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start_secs: f64) -> Self {
        let whole = start_secs.trunc() as u64;
        let frac = ((start_secs.fract()) * 1000.0) as u64;
        Self {
            secs: Arc::new(AtomicU64::new(whole)),
            frac_millis: Arc::new(AtomicU64::new(frac)),
        }
    }

    pub fn advance(&self, delta_secs: f64) {
        let current = self.secs.load(Ordering::SeqCst) as f64
            + self.frac_millis.load(Ordering::SeqCst) as f64 / 1000.0;
        let next = current + delta_secs;
        self.secs.store(next.trunc() as u64, Ordering::SeqCst);
        self.frac_millis
            .store((next.fract() * 1000.0) as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        self.secs.load(Ordering::SeqCst) as f64
            + self.frac_millis.load(Ordering::SeqCst) as f64 / 1000.0
    }

    fn monotonic_ms(&self) -> u64 {
        (self.now() * 1000.0) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(1000.0);
        assert_eq!(clock.now(), 1000.0);
        clock.advance(10.5);
        assert!((clock.now() - 1010.5).abs() < 1e-6);
    }
}
