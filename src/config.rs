//! Configuration loading, validation, and environment-based overrides.

use crate::error::{CachingError, CachingResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Loads and validates an [`AppConfig`] from a TOML file, a literal string,
/// or environment-variable overrides on top of defaults.
pub struct ConfigLoader;

impl ConfigLoader {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> CachingResult<AppConfig> {
        let content = std::fs::read_to_string(path).map_err(|e| CachingError::ConfigInvalid {
            message: format!("failed to read config file: {e}"),
        })?;
        Self::load_from_str(&content)
    }

    pub fn load_from_str(content: &str) -> CachingResult<AppConfig> {
        let config: AppConfig = toml::from_str(content).map_err(|e| CachingError::ConfigInvalid {
            message: format!("failed to parse config: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by recognized `ADAPTIVE_CACHE_*` environment variables.
    pub fn load_from_env() -> CachingResult<AppConfig> {
        let mut config = AppConfig::default();

        if let Ok(val) = std::env::var("ADAPTIVE_CACHE_LOG_LEVEL") {
            config.logging.level = val;
        }
        if let Ok(val) = std::env::var("ADAPTIVE_CACHE_MAX_TTL_SECONDS") {
            if let Ok(parsed) = val.parse() {
                config.cache.max_ttl_seconds = parsed;
            }
        }
        if let Ok(val) = std::env::var("ADAPTIVE_CACHE_REDIS_URL") {
            config.redis_url = Some(val);
        }

        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub cache: CacheConfig,
    pub invalidation: InvalidationConfig,
    pub warming: WarmingConfig,
    pub scheduler: SchedulerConfig,
    pub recovery: RecoveryConfig,
    /// Redis connection string; `None` selects the in-memory backend.
    pub redis_url: Option<String>,
}

impl AppConfig {
    pub fn validate(&self) -> CachingResult<()> {
        self.logging.validate()?;
        self.cache.validate()?;
        self.invalidation.validate()?;
        self.warming.validate()?;
        self.scheduler.validate()?;
        self.recovery.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl LoggingConfig {
    pub fn validate(&self) -> CachingResult<()> {
        let valid = ["trace", "debug", "info", "warn", "error"];
        if !valid.contains(&self.level.as_str()) {
            return Err(CachingError::ConfigInvalid {
                message: format!("invalid log level: {}", self.level),
            });
        }
        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub min_ttl_seconds: u64,
    pub max_ttl_seconds: u64,
    pub default_ttl_seconds: u64,
    pub max_cache_size: usize,
    /// Tuning constant for `volatility_score = min(stddev / divisor, 1.0)`.
    pub volatility_divisor: f64,
}

impl CacheConfig {
    pub fn validate(&self) -> CachingResult<()> {
        if self.min_ttl_seconds > self.max_ttl_seconds {
            return Err(CachingError::ConfigInvalid {
                message: "cache.min_ttl_seconds must not exceed cache.max_ttl_seconds".into(),
            });
        }
        if self.volatility_divisor <= 0.0 {
            return Err(CachingError::ConfigInvalid {
                message: "cache.volatility_divisor must be positive".into(),
            });
        }
        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            min_ttl_seconds: 300,
            max_ttl_seconds: 7200,
            default_ttl_seconds: 3600,
            max_cache_size: 10_000,
            volatility_divisor: 1000.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InvalidationConfig {
    pub max_cascade_depth: usize,
    pub batch_size: usize,
    pub delay_seconds: f64,
    pub event_retention_seconds: u64,
}

impl InvalidationConfig {
    pub fn validate(&self) -> CachingResult<()> {
        if self.batch_size == 0 {
            return Err(CachingError::ConfigInvalid {
                message: "invalidation.batch_size must be positive".into(),
            });
        }
        Ok(())
    }
}

impl Default for InvalidationConfig {
    fn default() -> Self {
        Self {
            max_cascade_depth: 3,
            batch_size: 100,
            delay_seconds: 1.0,
            event_retention_seconds: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WarmingConfig {
    pub max_concurrent_jobs: usize,
    pub warming_interval_seconds: u64,
    pub min_frequency_threshold: f64,
    pub max_warming_keys: usize,
}

impl WarmingConfig {
    pub fn validate(&self) -> CachingResult<()> {
        if self.max_concurrent_jobs == 0 {
            return Err(CachingError::ConfigInvalid {
                message: "warming.max_concurrent_jobs must be positive".into(),
            });
        }
        Ok(())
    }
}

impl Default for WarmingConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 5,
            warming_interval_seconds: 300,
            min_frequency_threshold: 0.1,
            max_warming_keys: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub check_interval_seconds: u64,
    pub max_concurrent_checks: usize,
    pub priority_execution: bool,
    pub retry_failed_checks: bool,
    pub retry_delay_seconds: u64,
    pub max_retry_attempts: u32,
    pub shutdown_timeout_seconds: u64,
}

impl SchedulerConfig {
    pub fn validate(&self) -> CachingResult<()> {
        if self.max_concurrent_checks == 0 {
            return Err(CachingError::ConfigInvalid {
                message: "scheduler.max_concurrent_checks must be positive".into(),
            });
        }
        Ok(())
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval_seconds: 60,
            max_concurrent_checks: 10,
            priority_execution: true,
            retry_failed_checks: true,
            retry_delay_seconds: 30,
            max_retry_attempts: 3,
            shutdown_timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub max_concurrent_recoveries: usize,
    pub cooldown_seconds: u64,
    /// Policy knob for Open Question #5: what `degraded` maps to.
    pub degraded_maps_to: String,
}

impl RecoveryConfig {
    pub fn validate(&self) -> CachingResult<()> {
        if self.max_concurrent_recoveries == 0 {
            return Err(CachingError::ConfigInvalid {
                message: "recovery.max_concurrent_recoveries must be positive".into(),
            });
        }
        Ok(())
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_concurrent_recoveries: 5,
            cooldown_seconds: 60,
            degraded_maps_to: "timeout".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_inverted_ttl_bounds() {
        let mut config = AppConfig::default();
        config.cache.min_ttl_seconds = 9000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn loads_partial_toml_over_defaults() {
        let config = ConfigLoader::load_from_str("[cache]\nmax_ttl_seconds = 3600\n").unwrap();
        assert_eq!(config.cache.max_ttl_seconds, 3600);
        assert_eq!(config.cache.min_ttl_seconds, 300);
    }
}
