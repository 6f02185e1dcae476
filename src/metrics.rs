//! Metric emission and alert-threshold evaluation.
//!
//! Grounded on the teacher's observability conventions (named series with
//! `target`/`probe` labels recorded via the real `metrics` facade) rather
//! than the hand-rolled `PrometheusExporter` the teacher's own repo used
//! for its workflow engine; installation matches teacher's bootstrap
//! (`PrometheusBuilder::install_recorder`).

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::health::HealthResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertLevel {
    None,
    Warning,
    Critical,
}

/// Installs the process-wide Prometheus recorder and returns a handle whose
/// `render()` produces the text-exposition payload.
pub fn install_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("prometheus recorder installs exactly once per process")
}

pub fn record_cache_hit(namespace: &str) {
    metrics::counter!("cache_hits", "namespace" => namespace.to_string()).increment(1);
}

pub fn record_cache_miss(namespace: &str) {
    metrics::counter!("cache_misses", "namespace" => namespace.to_string()).increment(1);
}

pub fn record_cache_set(namespace: &str) {
    metrics::counter!("cache_sets", "namespace" => namespace.to_string()).increment(1);
}

pub fn record_cache_delete(namespace: &str) {
    metrics::counter!("cache_deletes", "namespace" => namespace.to_string()).increment(1);
}

pub fn record_cache_hit_rate(namespace: &str, rate: f64) {
    metrics::gauge!("cache_hit_rate", "namespace" => namespace.to_string()).set(rate);
}

/// Records the per-probe series named in spec §4.10, labeled by
/// `check_name`/`category`/`priority` per the original's own
/// `get_prometheus_metrics` label set.
#[derive(Debug, Clone, Default)]
pub struct HealthCheckStats {
    pub total_runs: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,
    pub average_response_time_ms: f64,
    pub min_response_time_ms: f64,
    pub max_response_time_ms: f64,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
}

impl HealthCheckStats {
    pub fn success_rate(&self) -> f64 {
        if self.total_runs == 0 {
            1.0
        } else {
            self.successful_runs as f64 / self.total_runs as f64
        }
    }

    pub fn record(&self, check_name: &str, category: &str, priority: &str) {
        let rate = self.success_rate();
        macro_rules! labeled_gauge {
            ($metric:expr, $value:expr) => {
                metrics::gauge!(
                    $metric,
                    "check_name" => check_name.to_string(),
                    "category" => category.to_string(),
                    "priority" => priority.to_string(),
                )
                .set($value)
            };
        }
        labeled_gauge!("health_check_success_rate", rate);
        labeled_gauge!("health_check_total_runs", self.total_runs as f64);
        labeled_gauge!("health_check_successful_runs", self.successful_runs as f64);
        labeled_gauge!("health_check_failed_runs", self.failed_runs as f64);
        labeled_gauge!("health_check_average_response_time_ms", self.average_response_time_ms);
        labeled_gauge!("health_check_min_response_time_ms", self.min_response_time_ms);
        labeled_gauge!("health_check_max_response_time_ms", self.max_response_time_ms);
        labeled_gauge!("health_check_consecutive_failures", self.consecutive_failures as f64);
        labeled_gauge!("health_check_consecutive_successes", self.consecutive_successes as f64);
    }
}

/// Records a recovery strategy's outcome, labeled by `strategy`/`status` per
/// the same convention as the cache/health series above.
pub fn record_recovery_attempt(strategy: &str, status: &str) {
    metrics::counter!("recovery_attempts_total", "strategy" => strategy.to_string(), "status" => status.to_string())
        .increment(1);
}

pub fn record_overall_success_rate(rate: f64) {
    metrics::gauge!("health_check_overall_success_rate").set(rate);
}

/// Alert severity thresholds: warning at 3 consecutive failures, 5s duration,
/// or a success rate below 0.8; critical at 5 failures, 10s, or a success
/// rate below 0.5.
pub fn alert_level(result: &HealthResult, stats: &HealthCheckStats) -> AlertLevel {
    let success_rate = stats.success_rate();
    if stats.consecutive_failures >= 5 || result.duration_ms > 10_000 || success_rate < 0.5 {
        AlertLevel::Critical
    } else if stats.consecutive_failures >= 3 || result.duration_ms > 5_000 || success_rate < 0.8 {
        AlertLevel::Warning
    } else {
        AlertLevel::None
    }
}
