//! Health probe contract and the five built-in probe variants.
//!
//! Grounded on `original_source/infrastructure/health/advanced_health_check.py`'s
//! `BaseHealthCheck` ABC and its `DatabaseHealthCheck` / `RedisHealthCheck` /
//! `ExternalAPICheck` / `SystemResourceCheck` / `CustomHealthCheck`
//! subclasses, reworked per Design Note "plugin-style registries:
//! tagged-variant + name registry over inheritance" as a trait plus a
//! handful of concrete structs rather than a class hierarchy.

pub mod registry;
pub mod scheduler;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::error::CachingResult;
use crate::kv_backend::KvBackend;
use crate::ring_buffer::RingBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResult {
    pub probe: String,
    pub status: HealthStatus,
    pub message: String,
    pub details: HashMap<String, String>,
    pub duration_ms: u64,
    pub timestamp: f64,
}

#[async_trait]
pub trait HealthProbeCheck: Send + Sync {
    fn name(&self) -> &str;
    async fn check(&self) -> HealthResult;
}

/// Running aggregates updated on every [`ProbeHistory::record`], grounded on
/// `health_metrics.py`'s `HealthCheckMetrics` incremental counters.
struct RunningStats {
    total_runs: u64,
    successful_runs: u64,
    failed_runs: u64,
    total_duration_ms: u64,
    min_duration_ms: f64,
    max_duration_ms: f64,
    consecutive_failures: u32,
    consecutive_successes: u32,
}

impl Default for RunningStats {
    fn default() -> Self {
        Self {
            total_runs: 0,
            successful_runs: 0,
            failed_runs: 0,
            total_duration_ms: 0,
            min_duration_ms: f64::MAX,
            max_duration_ms: 0.0,
            consecutive_failures: 0,
            consecutive_successes: 0,
        }
    }
}

/// Bounded per-probe history with a `success_rate(window)` query, shared by
/// every probe variant below.
pub struct ProbeHistory {
    results: parking_lot::Mutex<RingBuffer<HealthResult>>,
    stats: parking_lot::Mutex<RunningStats>,
}

impl Default for ProbeHistory {
    fn default() -> Self {
        Self {
            results: parking_lot::Mutex::new(RingBuffer::new(100)),
            stats: parking_lot::Mutex::new(RunningStats::default()),
        }
    }
}

impl ProbeHistory {
    pub fn record(&self, result: HealthResult) {
        {
            let mut stats = self.stats.lock();
            stats.total_runs += 1;
            stats.total_duration_ms += result.duration_ms;
            let duration = result.duration_ms as f64;
            stats.min_duration_ms = stats.min_duration_ms.min(duration);
            stats.max_duration_ms = stats.max_duration_ms.max(duration);
            if result.status == HealthStatus::Healthy {
                stats.successful_runs += 1;
                stats.consecutive_successes += 1;
                stats.consecutive_failures = 0;
            } else {
                stats.failed_runs += 1;
                stats.consecutive_failures += 1;
                stats.consecutive_successes = 0;
            }
        }
        self.results.lock().push(result);
    }

    /// Snapshot suitable for `metrics::HealthCheckStats::record`/`alert_level`.
    pub fn stats(&self) -> crate::metrics::HealthCheckStats {
        let stats = self.stats.lock();
        let average_response_time_ms = if stats.total_runs == 0 {
            0.0
        } else {
            stats.total_duration_ms as f64 / stats.total_runs as f64
        };
        crate::metrics::HealthCheckStats {
            total_runs: stats.total_runs,
            successful_runs: stats.successful_runs,
            failed_runs: stats.failed_runs,
            average_response_time_ms,
            min_response_time_ms: if stats.total_runs == 0 { 0.0 } else { stats.min_duration_ms },
            max_response_time_ms: stats.max_duration_ms,
            consecutive_failures: stats.consecutive_failures,
            consecutive_successes: stats.consecutive_successes,
        }
    }

    pub fn success_rate(&self, window_seconds: f64, now: f64) -> f64 {
        let history = self.results.lock();
        let in_window: Vec<&HealthResult> = history
            .iter()
            .filter(|r| now - r.timestamp <= window_seconds)
            .collect();
        if in_window.is_empty() {
            return 1.0;
        }
        let healthy = in_window
            .iter()
            .filter(|r| r.status == HealthStatus::Healthy)
            .count();
        healthy as f64 / in_window.len() as f64
    }

    pub fn latest(&self) -> Option<HealthResult> {
        self.results.lock().iter().next_back().cloned()
    }
}

fn now_unix() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Round-trips `SET`/`GET`/`DEL` on a probe key with a short TTL.
pub struct KvBackendProbe {
    name: String,
    backend: Arc<dyn KvBackend>,
}

impl KvBackendProbe {
    pub fn new(name: impl Into<String>, backend: Arc<dyn KvBackend>) -> Self {
        Self {
            name: name.into(),
            backend,
        }
    }
}

#[async_trait]
impl HealthProbeCheck for KvBackendProbe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self) -> HealthResult {
        let start = Instant::now();
        let probe_key = format!("__health_probe__:{}", uuid::Uuid::new_v4());
        let outcome: CachingResult<()> = async {
            self.backend.setex(&probe_key, 5, b"ok".to_vec()).await?;
            let value = self.backend.get(&probe_key).await?;
            self.backend.del(&probe_key).await?;
            if value.as_deref() == Some(b"ok") {
                Ok(())
            } else {
                Err(crate::error::CachingError::BackendProtocol {
                    operation: "GET".to_string(),
                    message: "round-trip value mismatch".to_string(),
                })
            }
        }
        .await;

        let duration_ms = start.elapsed().as_millis() as u64;
        match outcome {
            Ok(()) => HealthResult {
                probe: self.name.clone(),
                status: HealthStatus::Healthy,
                message: "round-trip succeeded".to_string(),
                details: HashMap::new(),
                duration_ms,
                timestamp: now_unix(),
            },
            Err(e) => HealthResult {
                probe: self.name.clone(),
                status: HealthStatus::Unhealthy,
                message: e.to_string(),
                details: HashMap::new(),
                duration_ms,
                timestamp: now_unix(),
            },
        }
    }
}

/// Executes `SELECT 1`; healthy iff a single row comes back.
pub struct SqlProbe {
    name: String,
    pool: sqlx::SqlitePool,
}

impl SqlProbe {
    pub fn new(name: impl Into<String>, pool: sqlx::SqlitePool) -> Self {
        Self {
            name: name.into(),
            pool,
        }
    }
}

#[async_trait]
impl HealthProbeCheck for SqlProbe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self) -> HealthResult {
        let start = Instant::now();
        let outcome = sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(1) => HealthResult {
                probe: self.name.clone(),
                status: HealthStatus::Healthy,
                message: "SELECT 1 returned a single row".to_string(),
                details: HashMap::new(),
                duration_ms,
                timestamp: now_unix(),
            },
            Ok(other) => HealthResult {
                probe: self.name.clone(),
                status: HealthStatus::Unhealthy,
                message: format!("unexpected value {other}"),
                details: HashMap::new(),
                duration_ms,
                timestamp: now_unix(),
            },
            Err(e) => HealthResult {
                probe: self.name.clone(),
                status: HealthStatus::Unhealthy,
                message: e.to_string(),
                details: HashMap::new(),
                duration_ms,
                timestamp: now_unix(),
            },
        }
    }
}

/// `GET url` with a timeout; healthy iff `status == expected_status`,
/// degraded on other 2xx/3xx, unhealthy otherwise.
pub struct HttpProbe {
    name: String,
    url: String,
    expected_status: u16,
    client: reqwest::Client,
    timeout: std::time::Duration,
}

impl HttpProbe {
    pub fn new(name: impl Into<String>, url: impl Into<String>, expected_status: u16, timeout: std::time::Duration) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            expected_status,
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

#[async_trait]
impl HealthProbeCheck for HttpProbe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self) -> HealthResult {
        let start = Instant::now();
        let outcome = self.client.get(&self.url).timeout(self.timeout).send().await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let (status, message) = match outcome {
            Ok(response) => {
                let code = response.status().as_u16();
                if code == self.expected_status {
                    (HealthStatus::Healthy, format!("status {code}"))
                } else if (200..400).contains(&code) {
                    (HealthStatus::Degraded, format!("unexpected status {code}"))
                } else {
                    (HealthStatus::Unhealthy, format!("status {code}"))
                }
            }
            Err(e) => (HealthStatus::Unhealthy, e.to_string()),
        };

        HealthResult {
            probe: self.name.clone(),
            status,
            message,
            details: HashMap::new(),
            duration_ms,
            timestamp: now_unix(),
        }
    }
}

/// Samples CPU/memory/disk; degraded above 90%, unhealthy above 95%.
pub struct SystemResourceProbe {
    name: String,
    system: parking_lot::Mutex<sysinfo::System>,
}

impl SystemResourceProbe {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            system: parking_lot::Mutex::new(sysinfo::System::new_all()),
        }
    }
}

#[async_trait]
impl HealthProbeCheck for SystemResourceProbe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self) -> HealthResult {
        let start = Instant::now();

        let (cpu_pct, mem_pct) = {
            let mut system = self.system.lock();
            system.refresh_cpu();
            system.refresh_memory();

            let cpu = system.global_cpu_info().cpu_usage() as f64;
            let mem = if system.total_memory() > 0 {
                system.used_memory() as f64 / system.total_memory() as f64 * 100.0
            } else {
                0.0
            };
            (cpu, mem)
        };

        let disk_pct = sysinfo::Disks::new_with_refreshed_list()
            .list()
            .first()
            .map(|d| {
                let total = d.total_space();
                if total == 0 {
                    0.0
                } else {
                    (total - d.available_space()) as f64 / total as f64 * 100.0
                }
            })
            .unwrap_or(0.0);

        let max_pct = cpu_pct.max(mem_pct).max(disk_pct);
        let status = if max_pct > 95.0 {
            HealthStatus::Unhealthy
        } else if max_pct > 90.0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        let mut details = HashMap::new();
        details.insert("cpu_pct".to_string(), format!("{cpu_pct:.1}"));
        details.insert("memory_pct".to_string(), format!("{mem_pct:.1}"));
        details.insert("disk_pct".to_string(), format!("{disk_pct:.1}"));

        HealthResult {
            probe: self.name.clone(),
            status,
            message: format!("cpu={cpu_pct:.1}% mem={mem_pct:.1}% disk={disk_pct:.1}%"),
            details,
            duration_ms: start.elapsed().as_millis() as u64,
            timestamp: now_unix(),
        }
    }
}

/// Wraps a caller-supplied function returning a `HealthResult`.
pub struct CustomProbe {
    name: String,
    check_fn: Arc<dyn Fn() -> futures::future::BoxFuture<'static, HealthResult> + Send + Sync>,
}

impl CustomProbe {
    pub fn new(
        name: impl Into<String>,
        check_fn: Arc<dyn Fn() -> futures::future::BoxFuture<'static, HealthResult> + Send + Sync>,
    ) -> Self {
        Self {
            name: name.into(),
            check_fn,
        }
    }
}

#[async_trait]
impl HealthProbeCheck for CustomProbe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self) -> HealthResult {
        (self.check_fn)().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv_backend::MemoryKvBackend;

    #[tokio::test]
    async fn kv_probe_is_healthy_against_memory_backend() {
        let probe = KvBackendProbe::new("kv", Arc::new(MemoryKvBackend::new()));
        let result = probe.check().await;
        assert_eq!(result.status, HealthStatus::Healthy);
    }

    #[test]
    fn success_rate_is_bounded() {
        let history = ProbeHistory::default();
        history.record(HealthResult {
            probe: "p".to_string(),
            status: HealthStatus::Healthy,
            message: String::new(),
            details: HashMap::new(),
            duration_ms: 5,
            timestamp: 100.0,
        });
        let rate = history.success_rate(3600.0, 100.0);
        assert!((0.0..=1.0).contains(&rate));
    }
}
