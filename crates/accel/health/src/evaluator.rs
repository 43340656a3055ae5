//! Health evaluation.
//!
//! Converts a raw metric snapshot into a set of alerts and a health status.
//! Everything here is pure: the same metrics and thresholds always give the
//! same result.

use std::collections::BTreeSet;

use accel_types::{AlertType, DeviceId, DeviceMetrics, HealthStatus, PerformanceThreshold};
use serde::{Deserialize, Serialize};

use crate::error::{HealthError, HealthResult};

/// Outcome of evaluating one snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    pub alerts: BTreeSet<AlertType>,
    pub status: HealthStatus,
}

/// Derive alerts from metrics. Each rule is independent.
pub fn derive_alerts(metrics: &DeviceMetrics, thresholds: &PerformanceThreshold) -> BTreeSet<AlertType> {
    let mut alerts = BTreeSet::new();

    if metrics.memory_utilization > thresholds.memory_threshold {
        alerts.insert(AlertType::HighMemoryUsage);
    }
    if metrics.compute_utilization > thresholds.compute_threshold {
        alerts.insert(AlertType::HighComputeUsage);
    }
    if metrics.temperature > thresholds.temperature_threshold {
        alerts.insert(AlertType::TemperatureHigh);
    }
    if metrics.response_time > thresholds.response_time_threshold {
        alerts.insert(AlertType::PerformanceDegradation);
    }
    if metrics.error_rate > thresholds.error_rate_threshold {
        alerts.insert(AlertType::DeviceError);
    }
    if metrics.driver_fault {
        alerts.insert(AlertType::DriverError);
    }
    if metrics.memory_fault {
        alerts.insert(AlertType::MemoryError);
    }

    alerts
}

/// Map an alert set to a status. First matching rule wins.
pub fn classify(alerts: &BTreeSet<AlertType>) -> HealthStatus {
    if alerts.contains(&AlertType::DeviceError) || alerts.contains(&AlertType::DriverError) {
        HealthStatus::Failed
    } else if alerts.contains(&AlertType::MemoryError) {
        HealthStatus::Critical
    } else if alerts.len() >= 2 || alerts.contains(&AlertType::TemperatureHigh) {
        HealthStatus::Warning
    } else if !alerts.is_empty() {
        HealthStatus::Warning
    } else {
        HealthStatus::Healthy
    }
}

/// Evaluate a snapshot against thresholds.
pub fn evaluate(metrics: &DeviceMetrics, thresholds: &PerformanceThreshold) -> Evaluation {
    let alerts = derive_alerts(metrics, thresholds);
    let status = classify(&alerts);
    Evaluation { alerts, status }
}

/// Reject snapshots that cannot be evaluated meaningfully.
pub fn validate(device_id: DeviceId, metrics: &DeviceMetrics) -> HealthResult<()> {
    let fields = [
        ("memory_utilization", metrics.memory_utilization),
        ("compute_utilization", metrics.compute_utilization),
        ("temperature", metrics.temperature),
        ("power_usage", metrics.power_usage),
        ("response_time", metrics.response_time),
        ("error_rate", metrics.error_rate),
    ];
    if let Some((name, value)) = fields.iter().find(|(_, value)| !value.is_finite()) {
        return Err(HealthError::InvalidMetrics {
            device_id,
            reason: format!("{} is not finite ({})", name, value),
        });
    }

    let fractions = [
        ("memory_utilization", metrics.memory_utilization),
        ("compute_utilization", metrics.compute_utilization),
        ("error_rate", metrics.error_rate),
    ];
    if let Some((name, value)) = fractions
        .iter()
        .find(|(_, value)| !(0.0..=1.0).contains(value))
    {
        return Err(HealthError::InvalidMetrics {
            device_id,
            reason: format!("{} out of range [0, 1] ({})", name, value),
        });
    }

    Ok(())
}
