//! Device health types
//!
//! Health status, alert kinds, thresholds and the per-device health record
//! maintained by the monitor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::device::DeviceMetrics;
use crate::ids::DeviceId;

/// Health status of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HealthStatus {
    /// All metrics within thresholds
    Healthy,

    /// One or more thresholds crossed, device still usable
    Warning,

    /// Device reported a memory error; recovery required
    Critical,

    /// Device is erroring or could not be checked; recovery required
    Failed,

    /// Device is not present or not reachable
    Unavailable,
}

impl HealthStatus {
    /// Whether this status sends the device into the recovery cascade.
    pub fn needs_recovery(&self) -> bool {
        matches!(self, HealthStatus::Critical | HealthStatus::Failed)
    }

    /// Whether new work may be placed on a device in this status.
    pub fn accepts_work(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Warning)
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Warning => write!(f, "warning"),
            HealthStatus::Critical => write!(f, "critical"),
            HealthStatus::Failed => write!(f, "failed"),
            HealthStatus::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// Kind of alert raised against a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AlertType {
    HighMemoryUsage,
    HighComputeUsage,
    DeviceError,
    PerformanceDegradation,
    TemperatureHigh,
    DriverError,
    MemoryError,
}

impl AlertType {
    /// Alerts reported by the hardware rather than derived from thresholds.
    pub fn is_hardware_fault(&self) -> bool {
        matches!(self, AlertType::DriverError | AlertType::MemoryError)
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertType::HighMemoryUsage => write!(f, "high_memory_usage"),
            AlertType::HighComputeUsage => write!(f, "high_compute_usage"),
            AlertType::DeviceError => write!(f, "device_error"),
            AlertType::PerformanceDegradation => write!(f, "performance_degradation"),
            AlertType::TemperatureHigh => write!(f, "temperature_high"),
            AlertType::DriverError => write!(f, "driver_error"),
            AlertType::MemoryError => write!(f, "memory_error"),
        }
    }
}

/// Thresholds a device's metrics are checked against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceThreshold {
    /// Memory utilization above which `HighMemoryUsage` is raised (0.0-1.0)
    pub memory_threshold: f64,

    /// Compute utilization above which `HighComputeUsage` is raised (0.0-1.0)
    pub compute_threshold: f64,

    /// Temperature in °C above which `TemperatureHigh` is raised
    pub temperature_threshold: f64,

    /// Response time in ms above which `PerformanceDegradation` is raised
    pub response_time_threshold: f64,

    /// Error rate above which `DeviceError` is raised (0.0-1.0)
    pub error_rate_threshold: f64,
}

impl Default for PerformanceThreshold {
    fn default() -> Self {
        Self {
            memory_threshold: 0.85,
            compute_threshold: 0.95,
            temperature_threshold: 85.0,
            response_time_threshold: 1000.0,
            error_rate_threshold: 0.05,
        }
    }
}

/// Running health record for one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceHealthInfo {
    pub device_id: DeviceId,
    pub status: HealthStatus,

    /// When the device was last checked; `None` until the first check
    pub last_check_time: Option<DateTime<Utc>>,

    /// Latest metric snapshot, if one was ever read
    pub metrics: Option<DeviceMetrics>,

    pub active_alerts: BTreeSet<AlertType>,

    /// Total number of failed checks over the device's lifetime
    pub error_count: u64,

    /// Number of `Failed` checks in a row
    pub consecutive_failures: u32,

    pub last_error_time: Option<DateTime<Utc>>,

    /// Message of the last refresh or evaluation failure
    pub last_error: Option<String>,
}

impl DeviceHealthInfo {
    pub fn new(device_id: DeviceId) -> Self {
        Self {
            device_id,
            status: HealthStatus::Healthy,
            last_check_time: None,
            metrics: None,
            active_alerts: BTreeSet::new(),
            error_count: 0,
            consecutive_failures: 0,
            last_error_time: None,
            last_error: None,
        }
    }

    /// Record a completed evaluation.
    ///
    /// Returns the alerts that were not active before this check.
    pub fn record_check(
        &mut self,
        status: HealthStatus,
        metrics: DeviceMetrics,
        alerts: BTreeSet<AlertType>,
    ) -> Vec<AlertType> {
        let new_alerts = alerts.difference(&self.active_alerts).copied().collect();

        self.status = status;
        self.last_check_time = Some(Utc::now());
        self.metrics = Some(metrics);
        self.active_alerts = alerts;

        if status == HealthStatus::Failed {
            self.note_failure();
        } else {
            self.consecutive_failures = 0;
        }

        new_alerts
    }

    /// Record a check that could not be completed. The device is marked failed.
    pub fn record_error(&mut self, error: impl Into<String>) {
        self.status = HealthStatus::Failed;
        self.last_check_time = Some(Utc::now());
        self.last_error = Some(error.into());
        self.note_failure();
    }

    /// Record that the device is not reachable.
    pub fn record_unavailable(&mut self, metrics: DeviceMetrics) {
        self.status = HealthStatus::Unavailable;
        self.last_check_time = Some(Utc::now());
        self.metrics = Some(metrics);
        self.active_alerts.clear();
        self.consecutive_failures = 0;
    }

    fn note_failure(&mut self) {
        let now = Utc::now();
        self.error_count += 1;
        self.consecutive_failures += 1;
        self.last_error_time = Some(now);
    }
}
