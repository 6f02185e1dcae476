//! Registry of scheduled health checks: category/priority metadata, due-check
//! listing, and statistics bookkeeping.
//!
//! Grounded on `original_source/infrastructure/health/health_check_registry.py`'s
//! `HealthCheckRegistry.register` / `get_due_checks` / `update_statistics`.

use dashmap::DashMap;
use std::sync::Arc;

use super::{HealthProbeCheck, HealthResult, ProbeHistory};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HealthCategory {
    Infrastructure,
    Database,
    Cache,
    ExternalApi,
    SystemResources,
    BusinessLogic,
    Security,
    Performance,
}

impl HealthCategory {
    /// Matches the original's `HealthCheckCategory.value` strings.
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthCategory::Infrastructure => "infrastructure",
            HealthCategory::Database => "database",
            HealthCategory::Cache => "cache",
            HealthCategory::ExternalApi => "external_api",
            HealthCategory::SystemResources => "system_resources",
            HealthCategory::BusinessLogic => "business_logic",
            HealthCategory::Security => "security",
            HealthCategory::Performance => "performance",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HealthPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl HealthPriority {
    /// Matches the original's `HealthCheckPriority.value` strings.
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthPriority::Low => "low",
            HealthPriority::Medium => "medium",
            HealthPriority::High => "high",
            HealthPriority::Critical => "critical",
        }
    }
}

pub struct RegisteredCheck {
    pub probe: Arc<dyn HealthProbeCheck>,
    pub category: HealthCategory,
    pub priority: HealthPriority,
    pub interval_seconds: f64,
    pub enabled: bool,
    pub next_run: f64,
    pub last_run: f64,
    pub history: ProbeHistory,
    /// Per-probe timeout; see `original_source`'s `HealthCheckMetadata.timeout_seconds`.
    pub timeout_seconds: f64,
    pub retry_attempts: u32,
    pub retry_delay_seconds: f64,
}

#[derive(Default)]
pub struct HealthCheckRegistry {
    checks: DashMap<String, RegisteredCheck>,
}

impl HealthCheckRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// No-op if a check with this name is already registered.
    #[allow(clippy::too_many_arguments)]
    pub fn register(
        &self,
        name: &str,
        probe: Arc<dyn HealthProbeCheck>,
        category: HealthCategory,
        priority: HealthPriority,
        interval_seconds: f64,
        now: f64,
    ) -> bool {
        self.register_with_timeout(
            name,
            probe,
            category,
            priority,
            interval_seconds,
            now,
            30.0,
            3,
            30.0,
        )
    }

    /// Like [`Self::register`] but with explicit per-probe timeout and retry
    /// policy, matching `original_source`'s `HealthCheckMetadata` fields.
    #[allow(clippy::too_many_arguments)]
    pub fn register_with_timeout(
        &self,
        name: &str,
        probe: Arc<dyn HealthProbeCheck>,
        category: HealthCategory,
        priority: HealthPriority,
        interval_seconds: f64,
        now: f64,
        timeout_seconds: f64,
        retry_attempts: u32,
        retry_delay_seconds: f64,
    ) -> bool {
        if self.checks.contains_key(name) {
            return false;
        }
        self.checks.insert(
            name.to_string(),
            RegisteredCheck {
                probe,
                category,
                priority,
                interval_seconds,
                enabled: true,
                next_run: now,
                last_run: 0.0,
                history: ProbeHistory::default(),
                timeout_seconds,
                retry_attempts,
                retry_delay_seconds,
            },
        );
        true
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.checks.remove(name).is_some()
    }

    pub fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        match self.checks.get_mut(name) {
            Some(mut check) => {
                check.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn by_category(&self, category: HealthCategory) -> Vec<String> {
        self.checks
            .iter()
            .filter(|entry| entry.value().category == category)
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn by_priority(&self, priority: HealthPriority) -> Vec<String> {
        self.checks
            .iter()
            .filter(|entry| entry.value().priority == priority)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Names of enabled checks whose `next_run <= now`, sorted by priority
    /// descending (critical first).
    pub fn due_checks(&self, now: f64) -> Vec<String> {
        let mut due: Vec<(String, HealthPriority)> = self
            .checks
            .iter()
            .filter(|entry| entry.value().enabled && entry.value().next_run <= now)
            .map(|entry| (entry.key().clone(), entry.value().priority))
            .collect();
        due.sort_by_key(|b| std::cmp::Reverse(b.1));
        due.into_iter().map(|(name, _)| name).collect()
    }

    pub fn probe(&self, name: &str) -> Option<Arc<dyn HealthProbeCheck>> {
        self.checks.get(name).map(|c| c.probe.clone())
    }

    /// `(timeout_seconds, category, priority)` for a registered check.
    pub fn dispatch_info(&self, name: &str) -> Option<(f64, HealthCategory, HealthPriority)> {
        self.checks
            .get(name)
            .map(|c| (c.timeout_seconds, c.category, c.priority))
    }

    pub fn record_result(&self, name: &str, result: HealthResult, now: f64) {
        if let Some(mut check) = self.checks.get_mut(name) {
            check.last_run = now;
            check.next_run = now + check.interval_seconds;
            check.history.record(result);
        }
    }

    pub fn latest_result(&self, name: &str) -> Option<HealthResult> {
        self.checks.get(name).and_then(|c| c.history.latest())
    }

    pub fn probe_stats(&self, name: &str) -> Option<crate::metrics::HealthCheckStats> {
        self.checks.get(name).map(|c| c.history.stats())
    }

    pub fn success_rate(&self, name: &str, window_seconds: f64, now: f64) -> Option<f64> {
        self.checks
            .get(name)
            .map(|c| c.history.success_rate(window_seconds, now))
    }

    pub fn names(&self) -> Vec<String> {
        self.checks.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv_backend::MemoryKvBackend;
    use crate::health::KvBackendProbe;

    fn probe() -> Arc<dyn HealthProbeCheck> {
        Arc::new(KvBackendProbe::new("kv", Arc::new(MemoryKvBackend::new())))
    }

    #[test]
    fn registering_twice_is_a_no_op() {
        let registry = HealthCheckRegistry::new();
        assert!(registry.register("kv", probe(), HealthCategory::Cache, HealthPriority::High, 60.0, 0.0));
        assert!(!registry.register("kv", probe(), HealthCategory::Cache, HealthPriority::High, 60.0, 0.0));
    }

    #[test]
    fn due_checks_sorted_by_priority_descending() {
        let registry = HealthCheckRegistry::new();
        registry.register("low", probe(), HealthCategory::Cache, HealthPriority::Low, 0.0, 0.0);
        registry.register("crit", probe(), HealthCategory::Cache, HealthPriority::Critical, 0.0, 0.0);
        registry.register("med", probe(), HealthCategory::Cache, HealthPriority::Medium, 0.0, 0.0);

        let due = registry.due_checks(0.0);
        assert_eq!(due, vec!["crit".to_string(), "med".to_string(), "low".to_string()]);
    }

    #[test]
    fn disabled_check_is_never_due() {
        let registry = HealthCheckRegistry::new();
        registry.register("kv", probe(), HealthCategory::Cache, HealthPriority::High, 0.0, 0.0);
        registry.set_enabled("kv", false);
        assert!(registry.due_checks(0.0).is_empty());
    }
}
