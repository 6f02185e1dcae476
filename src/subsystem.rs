//! `CachingSubsystem`: the single composed value owning every component,
//! built explicitly at startup instead of through global singletons.
//!
//! Grounded on Design Note "single composed value instead of global
//! singletons" and the teacher's top-level `App`/engine composition root
//! pattern, which wires its subsystems once in `main` and passes the
//! composed value down rather than reaching for statics.

use std::sync::Arc;

use crate::access_tracker::AccessTracker;
use crate::cache::CacheCore;
use crate::clock::{Clock, SystemClock};
use crate::config::AppConfig;
use crate::dependency_graph::DependencyGraph;
use crate::health::registry::HealthCheckRegistry;
use crate::health::scheduler::HealthCheckScheduler;
use crate::invalidation::InvalidationEngine;
use crate::kv_backend::{KvBackend, MemoryKvBackend, RedisKvBackend};
use crate::recovery::RecoveryEngine;
use crate::warming::WarmingService;

pub struct CachingSubsystem {
    pub cache: Arc<CacheCore>,
    pub graph: Arc<DependencyGraph>,
    pub invalidation: Arc<InvalidationEngine>,
    pub warming: Arc<WarmingService>,
    pub health_registry: Arc<HealthCheckRegistry>,
    pub health_scheduler: Arc<HealthCheckScheduler>,
    pub recovery: Arc<RecoveryEngine>,
    clock: Arc<dyn Clock>,
}

impl CachingSubsystem {
    /// Builds every component from `config`, connecting to Redis if
    /// `config.redis_url` is set, falling back to the in-memory backend
    /// otherwise.
    pub async fn build(config: AppConfig) -> crate::error::CachingResult<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let kv: Arc<dyn KvBackend> = match &config.redis_url {
            Some(url) => Arc::new(RedisKvBackend::connect(url).await?),
            None => Arc::new(MemoryKvBackend::new()),
        };

        let cache = Arc::new(CacheCore::new(kv, clock.clone(), config.cache.clone()));
        let graph = Arc::new(DependencyGraph::new());
        let invalidation = Arc::new(InvalidationEngine::new(
            graph.clone(),
            cache.clone(),
            clock.clone(),
            config.invalidation.clone(),
        ));
        invalidation.seed_default_rules();

        let warming = Arc::new(WarmingService::new(cache.clone(), clock.clone(), config.warming.clone()));

        let health_registry = Arc::new(HealthCheckRegistry::new());
        let health_scheduler = Arc::new(HealthCheckScheduler::new(
            health_registry.clone(),
            clock.clone(),
            config.scheduler.clone(),
        ));

        let recovery = Arc::new(RecoveryEngine::new(clock.clone(), config.recovery.clone(), cache.clone()));

        Ok(Self {
            cache,
            graph,
            invalidation,
            warming,
            health_registry,
            health_scheduler,
            recovery,
            clock,
        })
    }

    pub fn access_tracker(&self) -> &Arc<AccessTracker> {
        self.cache.access_tracker()
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Spawns the invalidation-rule optimizer and event-retention reaper.
    pub fn spawn_invalidation_maintenance(&self) -> tokio::task::JoinHandle<()> {
        let invalidation = self.invalidation.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
                invalidation.optimize_rules();
                invalidation.reap_events();
            }
        })
    }

    /// Spawns the invalidation event-queue drain loop.
    pub fn spawn_invalidation_worker(&self) -> tokio::task::JoinHandle<()> {
        let invalidation = self.invalidation.clone();
        tokio::spawn(async move {
            loop {
                if invalidation.process_next().await.is_none() {
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
            }
        })
    }

    /// Spawns the predictive-warming background loop at
    /// `config.warming.warming_interval_seconds`: each cycle scans patterns
    /// for due warms, then drains every queued job by running it to
    /// completion so jobs don't sit `Pending` forever.
    pub fn spawn_warming_loop(&self, interval_seconds: u64) -> tokio::task::JoinHandle<()> {
        let warming = self.warming.clone();
        tokio::spawn(async move {
            loop {
                let queued = warming.scan_and_warm();
                for id in queued {
                    let warming = warming.clone();
                    tokio::spawn(async move { warming.execute_job(id).await });
                }
                tokio::time::sleep(std::time::Duration::from_secs(interval_seconds)).await;
            }
        })
    }

    /// Spawns the health-check scheduler's dispatch loop at
    /// `config.scheduler.check_interval_seconds`, routing unhealthy results
    /// into the recovery engine.
    pub fn spawn_health_loop(&self, interval_seconds: u64, degraded_maps_to: String) -> tokio::task::JoinHandle<()> {
        let scheduler = self.health_scheduler.clone();
        let recovery = self.recovery.clone();
        let config = crate::config::RecoveryConfig {
            degraded_maps_to,
            ..Default::default()
        };
        tokio::spawn(async move {
            scheduler.start().await;
            loop {
                let results = scheduler.run_cycle().await;
                for result in results {
                    if let Some(failure_type) =
                        crate::recovery::FailureType::from_health_result(&result, &config)
                    {
                        recovery.recover(&result.probe, failure_type).await;
                    }
                }
                tokio::time::sleep(std::time::Duration::from_secs(interval_seconds)).await;
            }
        })
    }

    pub async fn shutdown(&self) {
        self.health_scheduler.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn builds_with_default_config() {
        let subsystem = CachingSubsystem::build(AppConfig::default()).await.unwrap();
        assert!(subsystem.cache.stats().hits == 0);
        assert!(subsystem.invalidation.rule("user_profile_update").is_some());
    }
}
