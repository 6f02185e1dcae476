//! Predictive cache warming: pattern registry, predictor, job queue, and a
//! concurrency-bounded worker pool.
//!
//! Grounded on `original_source/backend/app/cache/warming_service.py`.
//! Open Question #4's resolution: the Python original's `_warm_key` is a
//! stub that merely checks cache presence; this implementation instead
//! requires a loader callback per pattern, and a pattern warmed without one
//! produces a `Failed` job with a descriptive error rather than a silent
//! no-op success.

use dashmap::DashMap;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::cache::CacheCore;
use crate::clock::Clock;
use crate::config::WarmingConfig;
use crate::error::CachingResult;
use crate::invalidation::matches_pattern;
use crate::ring_buffer::RingBuffer;

pub type LoaderFn = Arc<dyn Fn(String) -> BoxFuture<'static, CachingResult<Vec<u8>>> + Send + Sync>;

const KEY_HISTORY_CAPACITY: usize = 100;
const WARM_COOLDOWN_SECONDS: f64 = 1800.0;

#[derive(Clone)]
pub struct WarmingPattern {
    pub key_pattern: String,
    pub frequency_per_hour: f64,
    pub priority: u8,
    pub last_warmed: Option<f64>,
    pub success_rate: f64,
    pub avg_load_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Clone)]
pub struct WarmingJob {
    pub id: Uuid,
    pub pattern: String,
    pub target_keys: Vec<String>,
    pub priority: u8,
    pub created_at: f64,
    pub state: JobState,
    pub progress_percent: f64,
    pub error: Option<String>,
}

pub enum WarmOutcome {
    Queued(Uuid),
    Skipped(&'static str),
}

pub struct WarmingService {
    patterns: DashMap<String, WarmingPattern>,
    loaders: DashMap<String, LoaderFn>,
    jobs: DashMap<Uuid, WarmingJob>,
    key_history: DashMap<String, RingBuffer<f64>>,
    cache: Arc<CacheCore>,
    clock: Arc<dyn Clock>,
    config: WarmingConfig,
    active_jobs: Arc<AtomicUsize>,
}

impl WarmingService {
    pub fn new(cache: Arc<CacheCore>, clock: Arc<dyn Clock>, config: WarmingConfig) -> Self {
        Self {
            patterns: DashMap::new(),
            loaders: DashMap::new(),
            jobs: DashMap::new(),
            key_history: DashMap::new(),
            cache,
            clock,
            config,
            active_jobs: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn register_pattern(&self, key_pattern: &str, priority: u8, loader: Option<LoaderFn>) {
        self.patterns.insert(
            key_pattern.to_string(),
            WarmingPattern {
                key_pattern: key_pattern.to_string(),
                frequency_per_hour: 0.0,
                priority,
                last_warmed: None,
                success_rate: 0.0,
                avg_load_ms: 0.0,
            },
        );
        if let Some(loader) = loader {
            self.loaders.insert(key_pattern.to_string(), loader);
        }
    }

    pub fn pattern(&self, key_pattern: &str) -> Option<WarmingPattern> {
        self.patterns.get(key_pattern).map(|p| p.clone())
    }

    /// Records an observed access, updating matching patterns' rolling stats.
    pub fn track_access(&self, key: &str, load_time_ms: f64) {
        let now = self.clock.now();
        self.key_history
            .entry(key.to_string())
            .or_insert_with(|| RingBuffer::new(KEY_HISTORY_CAPACITY))
            .push(now);

        for mut pattern in self.patterns.iter_mut() {
            if matches_pattern(key, &pattern.key_pattern) {
                let freq = self.key_frequency_per_hour(key, now);
                pattern.frequency_per_hour = freq;
                pattern.avg_load_ms = (pattern.avg_load_ms + load_time_ms) / 2.0;
            }
        }
    }

    fn key_frequency_per_hour(&self, key: &str, now: f64) -> f64 {
        self.key_history
            .get(key)
            .map(|ring| ring.iter().filter(|&&ts| now - ts <= 3600.0).count() as f64)
            .unwrap_or(0.0)
    }

    fn last_access(&self, key: &str) -> Option<f64> {
        self.key_history.get(key).and_then(|ring| ring.iter().next_back().copied())
    }

    /// Candidate keys ranked by `0.7 * frequency_per_hour + 0.3 * recency`,
    /// top `max_warming_keys` returned.
    pub fn predict_keys(&self, key_pattern: &str) -> Vec<String> {
        let now = self.clock.now();
        let mut scored: Vec<(String, f64)> = self
            .key_history
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|key| matches_pattern(key, key_pattern))
            .map(|key| {
                let freq = self.key_frequency_per_hour(&key, now);
                let last_access = self.last_access(&key).unwrap_or(now);
                let recency = 1.0 / (now - last_access + 1.0);
                let score = 0.7 * freq + 0.3 * recency;
                (key, score)
            })
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored
            .into_iter()
            .take(self.config.max_warming_keys)
            .map(|(key, _)| key)
            .collect()
    }

    /// Creates and queues a warming job for `key_pattern`, unless skipped
    /// by the frequency threshold or the 30-minute recency cooldown.
    pub fn warm(&self, key_pattern: &str) -> WarmOutcome {
        let now = self.clock.now();
        let Some(mut pattern) = self.patterns.get_mut(key_pattern) else {
            return WarmOutcome::Skipped("unknown pattern");
        };

        if pattern.frequency_per_hour < self.config.min_frequency_threshold {
            return WarmOutcome::Skipped("below frequency threshold");
        }
        if let Some(last_warmed) = pattern.last_warmed {
            if now - last_warmed < WARM_COOLDOWN_SECONDS {
                return WarmOutcome::Skipped("warmed recently");
            }
        }

        let target_keys = self.predict_keys(key_pattern);
        let job = WarmingJob {
            id: Uuid::new_v4(),
            pattern: key_pattern.to_string(),
            target_keys,
            priority: pattern.priority,
            created_at: now,
            state: JobState::Pending,
            progress_percent: 0.0,
            error: None,
        };
        let id = job.id;
        pattern.last_warmed = Some(now);
        self.jobs.insert(id, job);
        WarmOutcome::Queued(id)
    }

    pub fn job(&self, id: &Uuid) -> Option<WarmingJob> {
        self.jobs.get(id).map(|j| j.clone())
    }

    /// Executes a queued job: loads and sets each target key sequentially,
    /// yielding briefly between keys. Respects `max_concurrent_jobs` via the
    /// caller-observed `active_job_count`.
    pub async fn execute_job(&self, id: Uuid) {
        let Some(mut job) = self.jobs.get_mut(&id).map(|j| j.clone()) else {
            return;
        };
        job.state = JobState::Running;
        self.jobs.insert(id, job.clone());
        self.active_jobs.fetch_add(1, Ordering::SeqCst);

        let Some(loader) = self.loaders.get(&job.pattern).map(|l| l.clone()) else {
            job.state = JobState::Failed;
            job.error = Some(format!("no loader registered for pattern {}", job.pattern));
            self.jobs.insert(id, job);
            self.active_jobs.fetch_sub(1, Ordering::SeqCst);
            return;
        };

        let total = job.target_keys.len().max(1);
        let mut successful = 0usize;
        for (i, key) in job.target_keys.clone().into_iter().enumerate() {
            match loader(key.clone()).await {
                Ok(bytes) => {
                    if self.cache.set(&key, bytes, None, None).await {
                        successful += 1;
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, key, "warming load failed");
                }
            }
            job.progress_percent = ((i + 1) as f64 / total as f64) * 100.0;
            self.jobs.insert(id, job.clone());
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }

        let success_rate = successful as f64 / total as f64;
        if let Some(mut pattern) = self.patterns.get_mut(&job.pattern) {
            pattern.success_rate = success_rate;
        }
        job.state = JobState::Completed;
        self.jobs.insert(id, job);
        self.active_jobs.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn active_job_count(&self) -> usize {
        self.active_jobs.load(Ordering::SeqCst)
    }

    pub fn has_free_slot(&self) -> bool {
        self.active_job_count() < self.config.max_concurrent_jobs
    }

    /// One cycle of the background loop: scan patterns by (priority desc,
    /// frequency desc), enqueue warms up to free worker slots.
    pub fn scan_and_warm(&self) -> Vec<Uuid> {
        let mut patterns: Vec<WarmingPattern> =
            self.patterns.iter().map(|p| p.clone()).collect();
        patterns.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(b.frequency_per_hour.total_cmp(&a.frequency_per_hour))
        });

        let mut queued = Vec::new();
        for pattern in patterns {
            if !self.has_free_slot() {
                break;
            }
            if let WarmOutcome::Queued(id) = self.warm(&pattern.key_pattern) {
                queued.push(id);
            }
        }
        queued
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::kv_backend::MemoryKvBackend;

    fn service(clock: Arc<ManualClock>) -> WarmingService {
        let cache = Arc::new(CacheCore::new(
            Arc::new(MemoryKvBackend::new()),
            clock.clone(),
            crate::config::CacheConfig::default(),
        ));
        WarmingService::new(cache, clock, WarmingConfig::default())
    }

    #[test]
    fn s5_warm_is_skipped_when_called_again_immediately() {
        let clock = Arc::new(ManualClock::new(0.0));
        let service = service(clock.clone());
        service.register_pattern("user_profile:*", 5, None);

        for i in 0..10 {
            service.track_access(&format!("user_profile:{i}"), 10.0);
            clock.advance(1.0);
        }
        // force frequency above threshold explicitly, matching spec's "5/hr" setup
        {
            let mut pattern = service.patterns.get_mut("user_profile:*").unwrap();
            pattern.frequency_per_hour = 5.0;
        }

        match service.warm("user_profile:*") {
            WarmOutcome::Queued(_) => {}
            WarmOutcome::Skipped(reason) => panic!("expected queued, got skipped: {reason}"),
        }

        match service.warm("user_profile:*") {
            WarmOutcome::Skipped(_) => {}
            WarmOutcome::Queued(_) => panic!("expected skipped on immediate re-warm"),
        }
    }

    #[test]
    fn skips_below_frequency_threshold() {
        let clock = Arc::new(ManualClock::new(0.0));
        let service = service(clock);
        service.register_pattern("rare:*", 1, None);
        match service.warm("rare:*") {
            WarmOutcome::Skipped(_) => {}
            WarmOutcome::Queued(_) => panic!("should be skipped, frequency is 0"),
        }
    }

    #[tokio::test]
    async fn job_fails_without_loader() {
        let clock = Arc::new(ManualClock::new(0.0));
        let service = service(clock.clone());
        service.register_pattern("p:*", 5, None);
        service.track_access("p:1", 1.0);
        {
            let mut pattern = service.patterns.get_mut("p:*").unwrap();
            pattern.frequency_per_hour = 5.0;
        }
        let WarmOutcome::Queued(id) = service.warm("p:*") else {
            panic!("expected queued");
        };
        service.execute_job(id).await;
        let job = service.job(&id).unwrap();
        assert_eq!(job.state, JobState::Failed);
    }
}
