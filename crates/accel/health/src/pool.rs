//! Accelerator pool facade.
//!
//! Wires a registry, allocator, alert dispatcher, recovery cascade and
//! health monitor together behind one handle.

use std::collections::BTreeMap;
use std::sync::Arc;

use accel_registry::{DeviceRegistry, ResourceAllocator};
use accel_types::{
    AlertType, AllocationRequest, Device, DeviceHealthInfo, DeviceId, DeviceSpec, StrategyId,
};
use tokio::sync::broadcast;
use tracing::info;

use crate::alerts::{AlertDispatcher, AlertEvent, AlertSubscriber, SubscriberId};
use crate::config::PoolConfig;
use crate::error::HealthResult;
use crate::metrics::MetricsSource;
use crate::monitor::{CycleReport, DeviceHealthSummary, HealthMonitor, HealthStats};
use crate::recovery::{FailureResponse, RecoveryCascade};

/// A monitored pool of accelerator devices.
pub struct AcceleratorPool {
    allocator: Arc<ResourceAllocator>,
    dispatcher: Arc<AlertDispatcher>,
    monitor: Arc<HealthMonitor>,
}

impl AcceleratorPool {
    /// Build a pool over the given devices with the standard recovery cascade.
    pub fn new(
        devices: impl IntoIterator<Item = DeviceSpec>,
        source: Arc<dyn MetricsSource>,
        config: PoolConfig,
    ) -> HealthResult<Self> {
        let registry = Arc::new(DeviceRegistry::with_devices(devices)?);
        let allocator = Arc::new(ResourceAllocator::new(registry, config.allocator.clone()));
        let cascade = Arc::new(RecoveryCascade::new(
            allocator.clone(),
            &config.health.recovery,
        ));
        Ok(Self::from_parts(allocator, source, cascade, config))
    }

    /// Build a pool from existing parts, e.g. with a custom cascade.
    pub fn from_parts(
        allocator: Arc<ResourceAllocator>,
        source: Arc<dyn MetricsSource>,
        cascade: Arc<RecoveryCascade>,
        config: PoolConfig,
    ) -> Self {
        let dispatcher = Arc::new(AlertDispatcher::new(config.health.alert_channel_capacity));
        let monitor = Arc::new(HealthMonitor::new(
            config.health,
            allocator.clone(),
            source,
            dispatcher.clone(),
            cascade,
        ));
        info!(
            devices = allocator.registry().device_ids().len(),
            "Accelerator pool created"
        );
        Self {
            allocator,
            dispatcher,
            monitor,
        }
    }

    pub fn allocator(&self) -> &Arc<ResourceAllocator> {
        &self.allocator
    }

    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }

    /// Reserve device capacity for a strategy. `None` means run on CPU.
    pub fn allocate(&self, request: &AllocationRequest) -> Option<DeviceId> {
        self.allocator.allocate(request)
    }

    pub fn release(&self, strategy_id: &StrategyId) {
        self.allocator.release(strategy_id)
    }

    pub fn list_devices(&self) -> Vec<Device> {
        self.allocator.list_devices()
    }

    pub fn device_health(&self, device_id: DeviceId) -> HealthResult<DeviceHealthInfo> {
        Ok(self.allocator.device_health(device_id)?)
    }

    pub fn get_stats(&self) -> HealthStats {
        self.monitor.get_stats()
    }

    pub fn get_device_health_summary(&self) -> BTreeMap<DeviceId, DeviceHealthSummary> {
        self.monitor.get_device_health_summary()
    }

    pub fn raise_alert(
        &self,
        device_id: DeviceId,
        alert_type: AlertType,
        message: impl Into<String>,
    ) -> HealthResult<()> {
        self.monitor.raise_alert(device_id, alert_type, message)
    }

    pub fn add_subscriber(&self, subscriber: Arc<dyn AlertSubscriber>) -> SubscriberId {
        self.dispatcher.add_subscriber(subscriber)
    }

    pub fn remove_subscriber(&self, id: SubscriberId) -> bool {
        self.dispatcher.remove_subscriber(id)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<AlertEvent> {
        self.dispatcher.subscribe_events()
    }

    pub async fn check_all(&self) -> CycleReport {
        self.monitor.check_all().await
    }

    pub async fn recover_device(&self, device_id: DeviceId) -> HealthResult<FailureResponse> {
        self.monitor.recover_device(device_id).await
    }

    pub fn start(&self) -> HealthResult<()> {
        self.monitor.start()
    }

    /// Stop monitoring, then wait for pending recoveries and alert deliveries.
    pub async fn stop(&self) {
        self.monitor.stop().await;
        self.dispatcher.flush().await;
    }
}
