//! Device records
//!
//! A device has static attributes fixed at discovery ([`DeviceSpec`]) and a
//! dynamic metric snapshot refreshed by the health monitor ([`DeviceMetrics`]).
//! [`Device`] is the combined view handed out to callers.

use serde::{Deserialize, Serialize};

use crate::ids::DeviceId;

/// Static attributes of a device, known at discovery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSpec {
    /// Device ordinal
    pub id: DeviceId,

    /// Human-readable name (e.g. product name)
    pub name: String,

    /// Total device memory in bytes
    pub total_memory: u64,

    /// Number of compute streams the device can run concurrently
    pub compute_streams: u32,
}

impl DeviceSpec {
    pub fn new(id: impl Into<DeviceId>, total_memory: u64, compute_streams: u32) -> Self {
        let id = id.into();
        Self {
            id,
            name: format!("accelerator-{}", id.ordinal()),
            total_memory,
            compute_streams,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Raw metric snapshot for one device, as reported by the metrics source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceMetrics {
    /// Fraction of device memory in use (0.0-1.0)
    pub memory_utilization: f64,

    /// Fraction of compute capacity in use (0.0-1.0)
    pub compute_utilization: f64,

    /// Temperature in degrees Celsius
    pub temperature: f64,

    /// Power draw in watts
    pub power_usage: f64,

    /// Response time of the last health kernel in milliseconds
    pub response_time: f64,

    /// Fraction of failed operations over the sampling window (0.0-1.0)
    pub error_rate: f64,

    /// Whether the device is present and reachable
    pub is_available: bool,

    /// Driver reported a fault (reset, lost context, ...)
    #[serde(default)]
    pub driver_fault: bool,

    /// Device reported an uncorrectable memory error
    #[serde(default)]
    pub memory_fault: bool,
}

impl DeviceMetrics {
    /// An idle, available device with no faults.
    pub fn idle() -> Self {
        Self {
            memory_utilization: 0.0,
            compute_utilization: 0.0,
            temperature: 40.0,
            power_usage: 0.0,
            response_time: 1.0,
            error_rate: 0.0,
            is_available: true,
            driver_fault: false,
            memory_fault: false,
        }
    }

    /// Snapshot for a device that dropped off the bus.
    pub fn unavailable() -> Self {
        Self {
            is_available: false,
            ..Self::idle()
        }
    }

    pub fn with_memory_utilization(mut self, value: f64) -> Self {
        self.memory_utilization = value;
        self
    }

    pub fn with_compute_utilization(mut self, value: f64) -> Self {
        self.compute_utilization = value;
        self
    }

    pub fn with_temperature(mut self, value: f64) -> Self {
        self.temperature = value;
        self
    }

    pub fn with_response_time(mut self, value: f64) -> Self {
        self.response_time = value;
        self
    }

    pub fn with_error_rate(mut self, value: f64) -> Self {
        self.error_rate = value;
        self
    }

    pub fn with_driver_fault(mut self) -> Self {
        self.driver_fault = true;
        self
    }

    pub fn with_memory_fault(mut self) -> Self {
        self.memory_fault = true;
        self
    }
}

impl Default for DeviceMetrics {
    fn default() -> Self {
        Self::idle()
    }
}

/// Combined static and dynamic view of a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub total_memory: u64,
    pub compute_streams: u32,
    pub memory_utilization: f64,
    pub compute_utilization: f64,
    pub temperature: f64,
    pub power_usage: f64,
    pub response_time: f64,
    pub error_rate: f64,
    pub is_available: bool,
}

impl Device {
    /// Build a device from its spec, starting idle.
    pub fn from_spec(spec: &DeviceSpec) -> Self {
        let mut device = Self {
            id: spec.id,
            name: spec.name.clone(),
            total_memory: spec.total_memory,
            compute_streams: spec.compute_streams,
            memory_utilization: 0.0,
            compute_utilization: 0.0,
            temperature: 0.0,
            power_usage: 0.0,
            response_time: 0.0,
            error_rate: 0.0,
            is_available: true,
        };
        device.apply_metrics(&DeviceMetrics::idle());
        device
    }

    /// Overwrite the dynamic attributes from a metric snapshot.
    pub fn apply_metrics(&mut self, metrics: &DeviceMetrics) {
        self.memory_utilization = metrics.memory_utilization;
        self.compute_utilization = metrics.compute_utilization;
        self.temperature = metrics.temperature;
        self.power_usage = metrics.power_usage;
        self.response_time = metrics.response_time;
        self.error_rate = metrics.error_rate;
        self.is_available = metrics.is_available;
    }

    /// Current dynamic attributes as a snapshot (fault flags are not retained).
    pub fn metrics(&self) -> DeviceMetrics {
        DeviceMetrics {
            memory_utilization: self.memory_utilization,
            compute_utilization: self.compute_utilization,
            temperature: self.temperature,
            power_usage: self.power_usage,
            response_time: self.response_time,
            error_rate: self.error_rate,
            is_available: self.is_available,
            driver_fault: false,
            memory_fault: false,
        }
    }
}
