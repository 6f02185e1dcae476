//! Priority-ordered dispatch loop with bounded concurrency, retry-with-
//! cooldown, and a cooperative graceful-shutdown state machine.
//!
//! Grounded on `original_source/infrastructure/health/scheduler.py`'s
//! `HealthCheckScheduler.run_cycle` and teacher's `concurrency::CancelToken`
//! for shutdown cooperation; concurrency bound via `tokio::sync::Semaphore`
//! the way teacher bounds worker pools in `executor`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};

use super::registry::HealthCheckRegistry;
use super::{HealthResult, HealthStatus};
use crate::clock::Clock;
use crate::concurrency::CancelToken;
use crate::config::SchedulerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

pub struct HealthCheckScheduler {
    registry: Arc<HealthCheckRegistry>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    semaphore: Arc<Semaphore>,
    state: Mutex<SchedulerState>,
    cancel: CancelToken,
    retry_counts: Mutex<HashMap<String, u32>>,
    cycles_run: AtomicU32,
}

impl HealthCheckScheduler {
    pub fn new(registry: Arc<HealthCheckRegistry>, clock: Arc<dyn Clock>, config: SchedulerConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_checks));
        Self {
            registry,
            clock,
            config,
            semaphore,
            state: Mutex::new(SchedulerState::Stopped),
            cancel: CancelToken::new(),
            retry_counts: Mutex::new(HashMap::new()),
            cycles_run: AtomicU32::new(0),
        }
    }

    pub async fn state(&self) -> SchedulerState {
        *self.state.lock().await
    }

    async fn transition(&self, to: SchedulerState) {
        *self.state.lock().await = to;
    }

    pub async fn start(&self) {
        self.transition(SchedulerState::Starting).await;
        self.transition(SchedulerState::Running).await;
    }

    /// Runs one dispatch cycle: due checks in priority order, each spawned
    /// onto the runtime and run concurrently under `max_concurrent_checks`
    /// own permit, with its own configured timeout. A probe that exceeds its
    /// timeout synthesizes an `Unhealthy` result rather than hanging the
    /// cycle.
    pub async fn run_cycle(&self) -> Vec<HealthResult> {
        let now = self.clock.now();
        let due = self.registry.due_checks(now);

        let mut tasks = Vec::with_capacity(due.len());
        for name in due {
            if self.cancel.is_cancelled() {
                break;
            }
            let Some(probe) = self.registry.probe(&name) else {
                continue;
            };
            let (timeout_seconds, category, priority) = self
                .registry
                .dispatch_info(&name)
                .unwrap_or((self.config.retry_delay_seconds.max(1) as f64, super::registry::HealthCategory::Infrastructure, super::registry::HealthPriority::Low));
            let probe_timeout = std::time::Duration::from_secs_f64(timeout_seconds.max(0.001));

            let semaphore = self.semaphore.clone();
            let clock = self.clock.clone();
            let registry = self.registry.clone();

            tasks.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");
                let result = match tokio::time::timeout(probe_timeout, probe.check()).await {
                    Ok(result) => result,
                    Err(_) => HealthResult {
                        probe: name.clone(),
                        status: HealthStatus::Unhealthy,
                        message: format!("probe exceeded {}ms timeout", probe_timeout.as_millis()),
                        details: HashMap::new(),
                        duration_ms: probe_timeout.as_millis() as u64,
                        timestamp: clock.now(),
                    },
                };

                registry.record_result(&name, result.clone(), clock.now());
                let stats = registry.probe_stats(&name).unwrap_or_default();
                stats.record(&name, category.as_str(), priority.as_str());
                match crate::metrics::alert_level(&result, &stats) {
                    crate::metrics::AlertLevel::Critical => {
                        tracing::error!(check_name = %name, status = ?result.status, "health check alert: critical")
                    }
                    crate::metrics::AlertLevel::Warning => {
                        tracing::warn!(check_name = %name, status = ?result.status, "health check alert: warning")
                    }
                    crate::metrics::AlertLevel::None => {}
                }

                (name, result)
            }));
        }

        let mut results = Vec::with_capacity(tasks.len());
        for task in tasks {
            let Ok((name, result)) = task.await else {
                continue;
            };
            if result.status == HealthStatus::Unhealthy && self.config.retry_failed_checks {
                self.maybe_retry(&name).await;
            } else {
                self.retry_counts.lock().await.remove(&name);
            }
            results.push(result);
        }

        self.cycles_run.fetch_add(1, Ordering::Relaxed);
        if !results.is_empty() {
            let healthy = results.iter().filter(|r| r.status == HealthStatus::Healthy).count();
            crate::metrics::record_overall_success_rate(healthy as f64 / results.len() as f64);
        }
        results
    }

    async fn maybe_retry(&self, name: &str) {
        let mut counts = self.retry_counts.lock().await;
        let count = counts.entry(name.to_string()).or_insert(0);
        if *count < self.config.max_retry_attempts {
            *count += 1;
        }
    }

    pub async fn retry_count(&self, name: &str) -> u32 {
        self.retry_counts.lock().await.get(name).copied().unwrap_or(0)
    }

    pub fn cycles_run(&self) -> u32 {
        self.cycles_run.load(Ordering::Relaxed)
    }

    /// Cooperative shutdown: cancels the token immediately, then waits up to
    /// `shutdown_timeout_seconds` for in-flight permits to drain before
    /// forcing the state to `Stopped`.
    pub async fn shutdown(&self) {
        self.transition(SchedulerState::Stopping).await;
        self.cancel.cancel();

        let deadline = std::time::Duration::from_secs(self.config.shutdown_timeout_seconds);
        let total_permits = self.config.max_concurrent_checks;
        let drain = async {
            let _ = self.semaphore.acquire_many(total_permits as u32).await;
        };
        let _ = tokio::time::timeout(deadline, drain).await;

        self.transition(SchedulerState::Stopped).await;
    }

    pub async fn mark_error(&self) {
        self.transition(SchedulerState::Error).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::health::registry::{HealthCategory, HealthPriority};
    use crate::health::{CustomProbe, HealthProbeCheck};

    fn instant_probe(name: &'static str, status: HealthStatus) -> Arc<dyn HealthProbeCheck> {
        Arc::new(CustomProbe::new(
            name,
            Arc::new(move || {
                Box::pin(async move {
                    HealthResult {
                        probe: name.to_string(),
                        status,
                        message: String::new(),
                        details: HashMap::new(),
                        duration_ms: 1,
                        timestamp: 0.0,
                    }
                })
            }),
        ))
    }

    #[tokio::test]
    async fn s3_priority_ordering_dispatches_critical_first() {
        let clock = Arc::new(ManualClock::new(0.0));
        let registry = Arc::new(HealthCheckRegistry::new());
        registry.register("low", instant_probe("low", HealthStatus::Healthy), HealthCategory::Cache, HealthPriority::Low, 0.0, 0.0);
        registry.register("critical", instant_probe("critical", HealthStatus::Healthy), HealthCategory::Cache, HealthPriority::Critical, 0.0, 0.0);
        registry.register("high", instant_probe("high", HealthStatus::Healthy), HealthCategory::Cache, HealthPriority::High, 0.0, 0.0);

        let scheduler = HealthCheckScheduler::new(registry, clock, SchedulerConfig::default());
        let results = scheduler.run_cycle().await;
        let order: Vec<String> = results.into_iter().map(|r| r.probe).collect();
        assert_eq!(order, vec!["critical".to_string(), "high".to_string(), "low".to_string()]);
    }

    #[tokio::test]
    async fn s4_probe_timeout_synthesizes_unhealthy() {
        let clock = Arc::new(ManualClock::new(0.0));
        let registry = Arc::new(HealthCheckRegistry::new());
        let slow = Arc::new(CustomProbe::new(
            "slow",
            Arc::new(|| {
                Box::pin(async move {
                    tokio::time::sleep(std::time::Duration::from_secs(60)).await;
                    HealthResult {
                        probe: "slow".to_string(),
                        status: HealthStatus::Healthy,
                        message: String::new(),
                        details: HashMap::new(),
                        duration_ms: 60_000,
                        timestamp: 0.0,
                    }
                })
            }),
        ));
        registry.register_with_timeout(
            "slow",
            slow,
            HealthCategory::Cache,
            HealthPriority::High,
            0.0,
            0.0,
            0.001, // near-zero probe timeout
            3,
            30.0,
        );

        let config = SchedulerConfig::default();

        tokio::time::pause();
        let scheduler = HealthCheckScheduler::new(registry, clock, config);
        let handle = tokio::spawn(async move { scheduler.run_cycle().await });
        tokio::time::advance(std::time::Duration::from_secs(2)).await;
        let results = handle.await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn shutdown_reaches_stopped_state() {
        let clock = Arc::new(ManualClock::new(0.0));
        let registry = Arc::new(HealthCheckRegistry::new());
        let scheduler = HealthCheckScheduler::new(registry, clock, SchedulerConfig::default());
        scheduler.start().await;
        assert_eq!(scheduler.state().await, SchedulerState::Running);
        scheduler.shutdown().await;
        assert_eq!(scheduler.state().await, SchedulerState::Stopped);
    }
}
