//! Error types for accel-health crate.
//!
//! Defines health monitoring, metric collection, alert delivery and recovery
//! errors.

use accel_registry::RegistryError;
use accel_types::DeviceId;
use thiserror::Error;

/// Errors that can occur during health monitoring and recovery.
#[derive(Debug, Error)]
pub enum HealthError {
    /// Device is not registered.
    #[error("device not found: {0}")]
    DeviceNotFound(DeviceId),

    /// Metric snapshot failed validation.
    #[error("invalid metrics for {device_id}: {reason}")]
    InvalidMetrics { device_id: DeviceId, reason: String },

    /// Metrics could not be read.
    #[error(transparent)]
    Metrics(#[from] MetricsError),

    /// A recovery strategy could not run.
    #[error("recovery failed for {device_id}: {reason}")]
    RecoveryFailed { device_id: DeviceId, reason: String },

    /// A recovery cascade is already running for the device.
    #[error("recovery already in progress for {0}")]
    RecoveryInProgress(DeviceId),

    /// Monitor loop is already running.
    #[error("health monitor already running")]
    AlreadyRunning,

    /// Registry or allocator rejected an operation.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for health operations.
pub type HealthResult<T> = Result<T, HealthError>;

/// Errors reported by a metrics source for a single device.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetricsError {
    /// The device did not answer the metrics query.
    #[error("device unreachable: {0}")]
    Unreachable(String),

    /// The metrics query timed out.
    #[error("metrics query timed out after {0}ms")]
    Timeout(u64),

    /// The source returned no reading for the device.
    #[error("no metrics reported")]
    Missing,
}

/// Errors returned by alert subscribers.
#[derive(Debug, Clone, Error)]
pub enum AlertError {
    /// Subscriber could not deliver the alert to its sink.
    #[error("alert delivery failed: {0}")]
    Delivery(String),

    /// Subscriber refused the alert.
    #[error("alert rejected: {0}")]
    Rejected(String),
}
