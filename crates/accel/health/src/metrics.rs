//! Device metrics sources.
//!
//! The monitor reads raw metrics through [`MetricsSource`]. How the numbers
//! are collected (driver library, exporter, sidecar) is up to the
//! implementation.

use std::collections::HashMap;

use accel_types::{DeviceId, DeviceMetrics};
use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::MetricsError;

/// One device's reading from a refresh.
pub type MetricsReading = Result<DeviceMetrics, MetricsError>;

/// Collaborator that reads raw device metrics.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Read metrics for every device the source knows about.
    ///
    /// A device missing from the returned map is treated as a failed read.
    async fn refresh_metrics(&self) -> HashMap<DeviceId, MetricsReading>;
}

/// In-memory metrics source whose readings are set by hand.
///
/// Used for bring-up and tests.
#[derive(Default)]
pub struct StaticMetricsSource {
    readings: RwLock<HashMap<DeviceId, MetricsReading>>,
}

impl StaticMetricsSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Source reporting idle metrics for the given devices.
    pub fn idle(devices: impl IntoIterator<Item = DeviceId>) -> Self {
        let source = Self::new();
        for device_id in devices {
            source.set_metrics(device_id, DeviceMetrics::idle());
        }
        source
    }

    pub fn set_metrics(&self, device_id: DeviceId, metrics: DeviceMetrics) {
        self.readings.write().insert(device_id, Ok(metrics));
    }

    pub fn set_error(&self, device_id: DeviceId, error: MetricsError) {
        self.readings.write().insert(device_id, Err(error));
    }

    /// Stop reporting a device entirely.
    pub fn remove(&self, device_id: DeviceId) {
        self.readings.write().remove(&device_id);
    }
}

#[async_trait]
impl MetricsSource for StaticMetricsSource {
    async fn refresh_metrics(&self) -> HashMap<DeviceId, MetricsReading> {
        self.readings.read().clone()
    }
}
