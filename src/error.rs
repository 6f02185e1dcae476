//! Error types for the caching subsystem.
//!
//! # Error Hierarchy
//!
//! ```text
//! CachingError (top-level)
//! ├── BackendUnavailable / BackendProtocol   (KVBackend trouble)
//! ├── EnvelopeMalformed                      (deserialization)
//! ├── ProbeTimeout / ProbeInternal            (health checks)
//! ├── StrategyFailure                        (recovery)
//! └── ConfigInvalid                          (startup / reload)
//! ```

use thiserror::Error;

/// Result type used throughout the subsystem.
pub type CachingResult<T> = Result<T, CachingError>;

/// Error kinds for the adaptive caching and reliability subsystem.
///
/// Reads never surface these to callers (see module docs on propagation
/// policy); they exist so internal plumbing can log and classify failures.
#[derive(Error, Debug)]
pub enum CachingError {
    /// The remote key-value backend could not be reached.
    #[error("backend unavailable: {backend} - {message}")]
    BackendUnavailable {
        backend: String,
        message: String,
    },

    /// The backend responded but with a malformed or unexpected payload.
    #[error("backend protocol error on {operation}: {message}")]
    BackendProtocol {
        operation: String,
        message: String,
    },

    /// A cache envelope could not be deserialized.
    #[error("envelope malformed for key {key}: {message}")]
    EnvelopeMalformed { key: String, message: String },

    /// A health probe exceeded its configured timeout.
    #[error("probe {probe} timed out after {elapsed_ms}ms (budget {timeout_ms}ms)")]
    ProbeTimeout {
        probe: String,
        elapsed_ms: u64,
        timeout_ms: u64,
    },

    /// A health probe raised an internal exception.
    #[error("probe {probe} failed: {message}")]
    ProbeInternal { probe: String, message: String },

    /// A recovery strategy failed to execute.
    #[error("recovery strategy {strategy} failed: {message}")]
    StrategyFailure { strategy: String, message: String },

    /// Configuration failed validation.
    #[error("invalid configuration: {message}")]
    ConfigInvalid { message: String },
}

impl CachingError {
    /// Whether retrying the same operation has any chance of succeeding.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::BackendUnavailable { .. } | Self::ProbeTimeout { .. } | Self::StrategyFailure { .. }
        )
    }
}
