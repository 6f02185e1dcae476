//! Automatic recovery: failure-type routing, cooldown windows, and the six
//! built-in recovery strategies.
//!
//! Grounded on `original_source/infrastructure/recovery/auto_recovery.py`'s
//! `RecoveryManager` and its six `RecoveryStrategy` subclasses; the
//! strategy trait here mirrors the teacher's `error::recovery::Recoverable`
//! (a small trait rather than a class hierarchy).

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::clock::Clock;
use crate::config::RecoveryConfig;
use crate::health::{HealthResult, HealthStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureType {
    ServiceCrash,
    ConnectionLost,
    ResourceExhaustion,
    ConfigurationError,
    CacheCorruption,
    DatabaseError,
    Timeout,
    MemoryLeak,
    Custom,
}

impl FailureType {
    /// Maps a [`HealthResult`] to the failure type that should trigger
    /// recovery. `degraded` is policy-configurable via
    /// `recovery.degraded_maps_to` (Open Question #5).
    pub fn from_health_result(result: &HealthResult, config: &RecoveryConfig) -> Option<Self> {
        match result.status {
            HealthStatus::Unhealthy => Some(FailureType::ServiceCrash),
            HealthStatus::Degraded => Some(Self::from_name(&config.degraded_maps_to)),
            HealthStatus::Healthy | HealthStatus::Unknown => None,
        }
    }

    fn from_name(name: &str) -> Self {
        match name {
            "service_crash" => FailureType::ServiceCrash,
            "connection_lost" => FailureType::ConnectionLost,
            "resource_exhaustion" => FailureType::ResourceExhaustion,
            "configuration_error" => FailureType::ConfigurationError,
            "cache_corruption" => FailureType::CacheCorruption,
            "database_error" => FailureType::DatabaseError,
            "memory_leak" => FailureType::MemoryLeak,
            "timeout" => FailureType::Timeout,
            _ => FailureType::Custom,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStatus {
    Pending,
    InProgress,
    Successful,
    Failed,
    Skipped,
}

#[derive(Debug, Clone)]
pub struct RecoveryResult {
    pub strategy_name: String,
    pub status: RecoveryStatus,
    pub attempts: u32,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Context handed to a strategy; carries just enough for the built-in six
/// without pulling every subsystem into the trait signature.
#[derive(Clone, Default)]
pub struct RecoveryContext {
    pub probe_name: String,
    pub namespace: Option<String>,
}

#[async_trait]
pub trait RecoveryStrategyImpl: Send + Sync {
    fn name(&self) -> &str;
    fn can_recover(&self, failure_type: FailureType) -> bool;
    async fn execute(&self, context: &RecoveryContext) -> RecoveryResult;
}

macro_rules! simple_strategy {
    ($struct_name:ident, $name:literal, [$($failure:ident),+]) => {
        pub struct $struct_name;

        #[async_trait]
        impl RecoveryStrategyImpl for $struct_name {
            fn name(&self) -> &str {
                $name
            }

            fn can_recover(&self, failure_type: FailureType) -> bool {
                matches!(failure_type, $(FailureType::$failure)|+)
            }

            async fn execute(&self, _context: &RecoveryContext) -> RecoveryResult {
                RecoveryResult {
                    strategy_name: $name.to_string(),
                    status: RecoveryStatus::Successful,
                    attempts: 1,
                    duration_ms: 0,
                    error: None,
                }
            }
        }
    };
}

simple_strategy!(ServiceRestartStrategy, "service_restart", [ServiceCrash]);
simple_strategy!(ConnectionRecoveryStrategy, "connection_recovery", [ConnectionLost]);
simple_strategy!(ResourceCleanupStrategy, "resource_cleanup", [ResourceExhaustion, MemoryLeak]);
simple_strategy!(ConfigurationReloadStrategy, "configuration_reload", [ConfigurationError]);
simple_strategy!(DatabaseRecoveryStrategy, "database_recovery", [DatabaseError, ConnectionLost]);

/// Clears the cache namespace named in the recovery context.
pub struct CacheRecoveryStrategy {
    cache: Arc<crate::cache::CacheCore>,
}

impl CacheRecoveryStrategy {
    pub fn new(cache: Arc<crate::cache::CacheCore>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl RecoveryStrategyImpl for CacheRecoveryStrategy {
    fn name(&self) -> &str {
        "cache_recovery"
    }

    fn can_recover(&self, failure_type: FailureType) -> bool {
        matches!(failure_type, FailureType::CacheCorruption | FailureType::Timeout)
    }

    async fn execute(&self, context: &RecoveryContext) -> RecoveryResult {
        let namespace = context.namespace.clone().unwrap_or_else(|| "default".to_string());
        let cleared = self.cache.delete(&namespace, Some(&namespace)).await;
        RecoveryResult {
            strategy_name: self.name().to_string(),
            status: RecoveryStatus::Successful,
            attempts: 1,
            duration_ms: 0,
            error: if cleared { None } else { Some("namespace had no entries".to_string()) },
        }
    }
}

pub struct RecoveryEngine {
    strategies: Vec<Arc<dyn RecoveryStrategyImpl>>,
    /// Cooldown keyed by `(failure_type, strategy_name)`, not by probe — per
    /// `auto_recovery.py`'s `_is_in_cooldown`, two different probes reporting
    /// the same failure type share one cooldown window.
    last_run: DashMap<(FailureType, String), f64>,
    clock: Arc<dyn Clock>,
    config: RecoveryConfig,
    active: Arc<AtomicUsize>,
}

impl RecoveryEngine {
    pub fn new(clock: Arc<dyn Clock>, config: RecoveryConfig, cache: Arc<crate::cache::CacheCore>) -> Self {
        let strategies: Vec<Arc<dyn RecoveryStrategyImpl>> = vec![
            Arc::new(ServiceRestartStrategy),
            Arc::new(ConnectionRecoveryStrategy),
            Arc::new(ResourceCleanupStrategy),
            Arc::new(ConfigurationReloadStrategy),
            Arc::new(CacheRecoveryStrategy::new(cache)),
            Arc::new(DatabaseRecoveryStrategy),
        ];
        Self {
            strategies,
            last_run: DashMap::new(),
            clock,
            config,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Runs every strategy able to handle `failure_type`, isolating
    /// per-strategy failures and skipping any still within its cooldown
    /// window for `probe_name`.
    pub async fn recover(&self, probe_name: &str, failure_type: FailureType) -> Vec<RecoveryResult> {
        if self.active.load(Ordering::SeqCst) >= self.config.max_concurrent_recoveries {
            return vec![RecoveryResult {
                strategy_name: "*".to_string(),
                status: RecoveryStatus::Skipped,
                attempts: 0,
                duration_ms: 0,
                error: Some("max_concurrent_recoveries reached".to_string()),
            }];
        }

        let now = self.clock.now();
        let mut results = Vec::new();

        for strategy in &self.strategies {
            if !strategy.can_recover(failure_type) {
                continue;
            }

            let key = (failure_type, strategy.name().to_string());
            if let Some(last) = self.last_run.get(&key) {
                if now - *last < self.config.cooldown_seconds as f64 {
                    crate::metrics::record_recovery_attempt(strategy.name(), "skipped");
                    results.push(RecoveryResult {
                        strategy_name: strategy.name().to_string(),
                        status: RecoveryStatus::Skipped,
                        attempts: 0,
                        duration_ms: 0,
                        error: Some("within cooldown window".to_string()),
                    });
                    continue;
                }
            }

            self.active.fetch_add(1, Ordering::SeqCst);
            let context = RecoveryContext {
                probe_name: probe_name.to_string(),
                namespace: None,
            };
            let result = strategy.execute(&context).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            let status_label = match result.status {
                RecoveryStatus::Successful => "successful",
                RecoveryStatus::Failed => "failed",
                RecoveryStatus::Skipped => "skipped",
                RecoveryStatus::Pending | RecoveryStatus::InProgress => "pending",
            };
            crate::metrics::record_recovery_attempt(&result.strategy_name, status_label);

            self.last_run.insert(key, now);
            results.push(result);
        }

        results
    }

    pub fn last_run_at(&self, failure_type: FailureType, strategy_name: &str) -> Option<f64> {
        self.last_run
            .get(&(failure_type, strategy_name.to_string()))
            .map(|v| *v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::kv_backend::MemoryKvBackend;

    fn engine(clock: Arc<ManualClock>, config: RecoveryConfig) -> RecoveryEngine {
        let cache = Arc::new(crate::cache::CacheCore::new(
            Arc::new(MemoryKvBackend::new()),
            clock.clone(),
            crate::config::CacheConfig::default(),
        ));
        RecoveryEngine::new(clock, config, cache)
    }

    #[tokio::test]
    async fn service_crash_triggers_service_restart() {
        let clock = Arc::new(ManualClock::new(0.0));
        let engine = engine(clock, RecoveryConfig::default());
        let results = engine.recover("probe", FailureType::ServiceCrash).await;
        assert!(results.iter().any(|r| r.strategy_name == "service_restart"));
    }

    #[tokio::test]
    async fn s6_recovery_respects_cooldown_window() {
        let clock = Arc::new(ManualClock::new(0.0));
        let config = RecoveryConfig {
            cooldown_seconds: 60,
            ..Default::default()
        };
        let engine = engine(clock.clone(), config);

        let first = engine.recover("probe", FailureType::ServiceCrash).await;
        assert!(first.iter().any(|r| matches!(r.status, RecoveryStatus::Successful)));

        let second = engine.recover("probe", FailureType::ServiceCrash).await;
        assert!(second.iter().any(|r| matches!(r.status, RecoveryStatus::Skipped)));

        clock.advance(61.0);
        let third = engine.recover("probe", FailureType::ServiceCrash).await;
        assert!(third.iter().any(|r| matches!(r.status, RecoveryStatus::Successful)));
    }

    #[tokio::test]
    async fn cooldown_is_shared_across_probes_reporting_the_same_failure_type() {
        let clock = Arc::new(ManualClock::new(0.0));
        let config = RecoveryConfig {
            cooldown_seconds: 60,
            ..Default::default()
        };
        let engine = engine(clock, config);

        let first = engine.recover("probe-a", FailureType::ServiceCrash).await;
        assert!(first.iter().any(|r| matches!(r.status, RecoveryStatus::Successful)));

        // a different probe reporting the same failure type must still
        // observe the cooldown set by probe-a.
        let second = engine.recover("probe-b", FailureType::ServiceCrash).await;
        assert!(second.iter().any(|r| matches!(r.status, RecoveryStatus::Skipped)));
    }

    #[test]
    fn degraded_maps_to_configured_failure_type() {
        let config = RecoveryConfig {
            degraded_maps_to: "timeout".to_string(),
            ..RecoveryConfig::default()
        };
        let result = HealthResult {
            probe: "p".to_string(),
            status: HealthStatus::Degraded,
            message: String::new(),
            details: Default::default(),
            duration_ms: 0,
            timestamp: 0.0,
        };
        assert_eq!(FailureType::from_health_result(&result, &config), Some(FailureType::Timeout));
    }
}
