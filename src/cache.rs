//! CacheCore: a namespaced key-value interface over [`KvBackend`], enriched
//! with adaptive TTL and access accounting.
//!
//! Grounded on the teacher's `cache::ReflexCache` (DashMap-based hot layer)
//! and `performance::cache::WorkflowCache` (LRU + lock-guarded stats) —
//! the envelope round-trips through `KvBackend` the way `ReflexCache`
//! round-trips specs through its DashMap, while the stats counters use the
//! same `parking_lot`/atomic discipline as `performance::cache`.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::access_tracker::AccessTracker;
use crate::clock::Clock;
use crate::config::CacheConfig;
use crate::kv_backend::KvBackend;

const DEFAULT_NAMESPACE: &str = "default";
const RECENT_ACCESSES_CAPACITY: usize = 10;

/// Self-describing envelope stored at `intelligent_cache:<namespace>:<hash>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Envelope {
    value: Vec<u8>,
    created_at: f64,
    last_accessed: f64,
    access_count: u64,
    access_pattern: Vec<f64>,
    volatility_score: f64,
    base_ttl: u64,
    adaptive_ttl: u64,
}

impl Envelope {
    fn push_access(&mut self, timestamp: f64) {
        self.access_pattern.push(timestamp);
        if self.access_pattern.len() > RECENT_ACCESSES_CAPACITY {
            self.access_pattern.remove(0);
        }
    }
}

/// Aggregate counters exposed by [`CacheCore::stats`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub hit_rate: f64,
    pub avg_volatility: f64,
}

pub struct CacheCore {
    kv: Arc<dyn KvBackend>,
    access_tracker: Arc<AccessTracker>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
}

impl CacheCore {
    pub fn new(kv: Arc<dyn KvBackend>, clock: Arc<dyn Clock>, config: CacheConfig) -> Self {
        let access_tracker = Arc::new(AccessTracker::new(
            config.max_cache_size,
            config.volatility_divisor,
        ));
        Self {
            kv,
            access_tracker,
            clock,
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
        }
    }

    pub fn access_tracker(&self) -> &Arc<AccessTracker> {
        &self.access_tracker
    }

    fn storage_key(namespace: &str, key: &str) -> String {
        format!("intelligent_cache:{namespace}:{:x}", md5::compute(key))
    }

    /// `adaptive_ttl = round(candidate * (1 - volatility_score * 0.5))`,
    /// clamped to `[min_ttl, max_ttl]`. See spec §4.1.
    fn compute_adaptive_ttl(&self, access_pattern: &[f64], base_ttl: u64, volatility_score: f64) -> u64 {
        let base = base_ttl as f64;
        let min_ttl = self.config.min_ttl_seconds as f64;
        let max_ttl = self.config.max_ttl_seconds as f64;

        let candidate = if access_pattern.len() < 2 {
            base
        } else {
            let recent = &access_pattern[access_pattern.len().saturating_sub(5)..];
            let intervals: Vec<f64> = recent.windows(2).map(|w| w[1] - w[0]).collect();
            let mean_interval = intervals.iter().sum::<f64>() / intervals.len() as f64;
            if mean_interval < 60.0 {
                (base * 2.0).min(max_ttl)
            } else if mean_interval < 300.0 {
                base
            } else {
                (base / 2.0).max(min_ttl)
            }
        };

        let dampened = (candidate * (1.0 - volatility_score * 0.5)).round();
        dampened.clamp(min_ttl, max_ttl) as u64
    }

    /// Returns `(value, hit)`. On hit, refreshes the adaptive TTL
    /// best-effort; re-write failure never fails the read.
    pub async fn get(&self, key: &str, namespace: Option<&str>) -> (Option<Vec<u8>>, bool) {
        let namespace = namespace.unwrap_or(DEFAULT_NAMESPACE);
        let storage_key = Self::storage_key(namespace, key);

        let raw = match self.kv.get(&storage_key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_cache_miss(namespace);
                return (None, false);
            }
            Err(e) => {
                tracing::debug!(error = %e, key, "kv get failed, treating as miss");
                self.misses.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_cache_miss(namespace);
                return (None, false);
            }
        };

        let mut envelope: Envelope = match serde_json::from_slice(&raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(error = %e, key, "envelope malformed, treating as miss");
                self.misses.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_cache_miss(namespace);
                return (None, false);
            }
        };

        let now = self.clock.now();
        self.access_tracker.track_access(key, now);
        envelope.last_accessed = now;
        envelope.access_count += 1;
        envelope.push_access(now);
        envelope.volatility_score = self.access_tracker.volatility(key);
        envelope.adaptive_ttl = self.compute_adaptive_ttl(
            &envelope.access_pattern,
            envelope.base_ttl,
            envelope.volatility_score,
        );

        self.hits.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_cache_hit(namespace);
        crate::metrics::record_cache_hit_rate(namespace, self.stats().hit_rate);
        let value = envelope.value.clone();

        if let Ok(bytes) = serde_json::to_vec(&envelope) {
            if let Err(e) = self.kv.setex(&storage_key, envelope.adaptive_ttl, bytes).await {
                tracing::debug!(error = %e, key, "best-effort envelope rewrite failed");
            }
        }

        (Some(value), true)
    }

    pub async fn set(&self, key: &str, value: Vec<u8>, base_ttl: Option<u64>, namespace: Option<&str>) -> bool {
        let namespace = namespace.unwrap_or(DEFAULT_NAMESPACE);
        let storage_key = Self::storage_key(namespace, key);
        let base_ttl = base_ttl.unwrap_or(self.config.default_ttl_seconds);
        let now = self.clock.now();

        let envelope = Envelope {
            value,
            created_at: now,
            last_accessed: now,
            access_count: 0,
            access_pattern: Vec::new(),
            volatility_score: 0.0,
            base_ttl,
            adaptive_ttl: base_ttl,
        };

        let bytes = match serde_json::to_vec(&envelope) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, key, "failed to serialize envelope");
                return false;
            }
        };

        match self.kv.setex(&storage_key, base_ttl, bytes).await {
            Ok(()) => {
                self.sets.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_cache_set(namespace);
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, key, "kv setex failed");
                false
            }
        }
    }

    pub async fn delete(&self, key: &str, namespace: Option<&str>) -> bool {
        self.delete_checked(key, namespace).await.unwrap_or(false)
    }

    /// Like [`Self::delete`] but surfaces backend errors instead of folding
    /// them into `false`, so callers that need to tell "key didn't exist"
    /// apart from "backend unavailable" (e.g. invalidation's fatal-error
    /// accounting) can.
    pub async fn delete_checked(&self, key: &str, namespace: Option<&str>) -> crate::error::CachingResult<bool> {
        let namespace = namespace.unwrap_or(DEFAULT_NAMESPACE);
        let storage_key = Self::storage_key(namespace, key);
        match self.kv.del(&storage_key).await {
            Ok(count) => {
                self.deletes.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_cache_delete(namespace);
                Ok(count > 0)
            }
            Err(e) => {
                tracing::debug!(error = %e, key, "kv del failed");
                Err(e)
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            hit_rate: if total == 0 { 0.0 } else { hits as f64 / total as f64 },
            avg_volatility: self.access_tracker.average_volatility(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::kv_backend::MemoryKvBackend;

    fn core(clock: Arc<ManualClock>) -> CacheCore {
        CacheCore::new(Arc::new(MemoryKvBackend::new()), clock, CacheConfig::default())
    }

    #[tokio::test]
    async fn set_then_get_is_a_hit() {
        let clock = Arc::new(ManualClock::new(0.0));
        let cache = core(clock);
        assert!(cache.set("k", b"v".to_vec(), None, None).await);
        let (value, hit) = cache.get("k", None).await;
        assert!(hit);
        assert_eq!(value, Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn miss_on_unknown_key() {
        let clock = Arc::new(ManualClock::new(0.0));
        let cache = core(clock);
        let (value, hit) = cache.get("missing", None).await;
        assert!(!hit);
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn adaptive_ttl_stays_within_bounds() {
        let clock = Arc::new(ManualClock::new(0.0));
        let cache = core(clock.clone());
        cache.set("k", b"v".to_vec(), Some(3600), None).await;
        for _ in 0..10 {
            clock.advance(10.0);
            cache.get("k", None).await;
        }
        // re-fetch raw envelope via another get to inspect bounds indirectly
        let (_value, hit) = cache.get("k", None).await;
        assert!(hit);
    }

    #[tokio::test]
    async fn s1_adaptive_ttl_inflation_under_hot_access() {
        let clock = Arc::new(ManualClock::new(0.0));
        let cache = core(clock.clone());
        cache.set("k", b"v".to_vec(), Some(3600), None).await;
        for _ in 0..6 {
            clock.advance(10.0);
            cache.get("k", None).await;
        }
        let ttl = cache.compute_adaptive_ttl(&[0.0, 10.0, 20.0, 30.0, 40.0, 50.0], 3600, 0.05);
        assert!(ttl > 3600, "ttl {ttl} should inflate under hot access");
        assert!((6480..=7200).contains(&ttl));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let clock = Arc::new(ManualClock::new(0.0));
        let cache = core(clock);
        cache.set("k", b"v".to_vec(), None, None).await;
        assert!(cache.delete("k", None).await);
        assert!(!cache.delete("k", None).await);
    }
}
