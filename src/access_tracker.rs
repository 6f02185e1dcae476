//! Bounded per-key access history, the source of frequency and volatility
//! for adaptive TTL and predictive warming alike.
//!
//! Grounded on the teacher's `performance::cache::WorkflowCache`
//! `LruCache<K, V>`-wrapped-in-a-lock idiom: key cardinality is capped by
//! evicting the least-recently-touched key rather than growing unbounded.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

use crate::ring_buffer::RingBuffer;

const HISTORY_CAPACITY: usize = 20;

/// Tracks, per key, a bounded sequence of recent access timestamps.
/// Key cardinality is capped at `max_keys` via LRU eviction.
pub struct AccessTracker {
    history: Mutex<LruCache<String, RingBuffer<f64>>>,
    volatility_divisor: f64,
}

impl AccessTracker {
    pub fn new(max_keys: usize, volatility_divisor: f64) -> Self {
        let cap = NonZeroUsize::new(max_keys).unwrap_or(NonZeroUsize::new(1).unwrap());
        Self {
            history: Mutex::new(LruCache::new(cap)),
            volatility_divisor,
        }
    }

    /// Record an access at `timestamp` (wall-clock seconds).
    pub fn track_access(&self, key: &str, timestamp: f64) {
        let mut history = self.history.lock();
        match history.get_mut(key) {
            Some(ring) => ring.push(timestamp),
            None => {
                let mut ring = RingBuffer::new(HISTORY_CAPACITY);
                ring.push(timestamp);
                history.put(key.to_string(), ring);
            }
        }
    }

    /// Count of accesses within `window_seconds` of `now`.
    pub fn frequency_per_hour(&self, key: &str, now: f64, window_seconds: f64) -> f64 {
        let mut history = self.history.lock();
        let Some(ring) = history.get(key) else {
            return 0.0;
        };
        let count = ring
            .iter()
            .filter(|&&ts| now - ts <= window_seconds)
            .count() as f64;
        // normalize the observed window to a per-hour rate
        count * (3600.0 / window_seconds)
    }

    /// Normalized stddev of inter-access intervals, `min(sigma / divisor, 1.0)`.
    /// Requires at least 5 recorded accesses; otherwise 0.0 (no signal yet).
    pub fn volatility(&self, key: &str) -> f64 {
        let mut history = self.history.lock();
        let Some(ring) = history.get(key) else {
            return 0.0;
        };
        Self::ring_volatility(ring, self.volatility_divisor)
    }

    fn ring_volatility(ring: &RingBuffer<f64>, divisor: f64) -> f64 {
        let samples: Vec<f64> = ring.iter().copied().collect();
        if samples.len() < 5 {
            return 0.0;
        }
        let intervals: Vec<f64> = samples.windows(2).map(|w| w[1] - w[0]).collect();
        let mean = intervals.iter().sum::<f64>() / intervals.len() as f64;
        let variance =
            intervals.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / intervals.len() as f64;
        let sigma = variance.sqrt();
        (sigma / divisor).min(1.0)
    }

    /// Mean volatility across every tracked key, without perturbing LRU
    /// recency order. `0.0` if no keys are tracked.
    pub fn average_volatility(&self) -> f64 {
        let history = self.history.lock();
        if history.is_empty() {
            return 0.0;
        }
        let total: f64 = history
            .iter()
            .map(|(_, ring)| Self::ring_volatility(ring, self.volatility_divisor))
            .sum();
        total / history.len() as f64
    }

    pub fn last_access(&self, key: &str) -> Option<f64> {
        let mut history = self.history.lock();
        history.get(key).and_then(|ring| ring.iter().next_back().copied())
    }

    pub fn len(&self) -> usize {
        self.history.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_key_cardinality_by_lru() {
        let tracker = AccessTracker::new(2, 1000.0);
        tracker.track_access("a", 1.0);
        tracker.track_access("b", 2.0);
        tracker.track_access("c", 3.0);
        assert_eq!(tracker.len(), 2);
        assert!(tracker.last_access("a").is_none());
    }

    #[test]
    fn volatility_needs_five_samples() {
        let tracker = AccessTracker::new(100, 1000.0);
        for i in 0..4 {
            tracker.track_access("k", i as f64 * 10.0);
        }
        assert_eq!(tracker.volatility("k"), 0.0);
        tracker.track_access("k", 40.0);
        assert!(tracker.volatility("k") >= 0.0);
    }

    #[test]
    fn frequency_counts_within_window() {
        let tracker = AccessTracker::new(100, 1000.0);
        tracker.track_access("k", 0.0);
        tracker.track_access("k", 100.0);
        tracker.track_access("k", 5000.0);
        // now=5000, window=3600s -> only the 5000.0 access qualifies
        let freq = tracker.frequency_per_hour("k", 5000.0, 3600.0);
        assert_eq!(freq, 1.0);
    }
}
