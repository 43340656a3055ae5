//! Device registry
//!
//! Holds every discovered device together with its capacity bookkeeping and
//! the allocation contexts bound to it. All of that lives behind a single
//! registry-wide lock so allocation, release, metric refresh and recovery are
//! linearizable. Per-device health records live beside it in a concurrent map.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use accel_types::{
    AllocationContext, Device, DeviceHealthInfo, DeviceId, DeviceMetrics, DeviceSpec, StrategyId,
};
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{RegistryError, Result};

/// Capacity bookkeeping for a single device.
#[derive(Debug, Clone)]
pub(crate) struct DeviceSlot {
    pub(crate) device: Device,
    pub(crate) reserved_memory: u64,
    pub(crate) reserved_streams: u32,

    /// Streams held back as backup by the recovery cascade.
    pub(crate) backup_streams: u32,

    /// Set by the health monitor while the device is critical or failed.
    pub(crate) quarantined: bool,

    /// Set while a recovery cascade is running against the device.
    pub(crate) recovering: bool,
}

impl DeviceSlot {
    fn new(spec: &DeviceSpec) -> Self {
        Self {
            device: Device::from_spec(spec),
            reserved_memory: 0,
            reserved_streams: 0,
            backup_streams: 0,
            quarantined: false,
            recovering: false,
        }
    }

    pub(crate) fn free_memory(&self) -> u64 {
        self.device.total_memory.saturating_sub(self.reserved_memory)
    }

    pub(crate) fn free_streams(&self) -> u32 {
        self.device
            .compute_streams
            .saturating_sub(self.reserved_streams)
            .saturating_sub(self.backup_streams)
    }

    /// Whether new work may be placed on the device at all.
    pub(crate) fn is_eligible(&self) -> bool {
        self.device.is_available && !self.quarantined && !self.recovering
    }

    fn capacity(&self) -> DeviceCapacity {
        DeviceCapacity {
            device_id: self.device.id,
            total_memory: self.device.total_memory,
            reserved_memory: self.reserved_memory,
            free_memory: self.free_memory(),
            total_streams: self.device.compute_streams,
            reserved_streams: self.reserved_streams,
            backup_streams: self.backup_streams,
            free_streams: self.free_streams(),
            quarantined: self.quarantined,
            recovering: self.recovering,
        }
    }
}

/// Everything guarded by the registry lock.
#[derive(Debug, Default)]
pub(crate) struct PoolState {
    pub(crate) devices: BTreeMap<DeviceId, DeviceSlot>,
    pub(crate) contexts: HashMap<StrategyId, AllocationContext>,
    pub(crate) cpu_fallback: BTreeSet<StrategyId>,
}

impl PoolState {
    pub(crate) fn slot_mut(&mut self, device_id: DeviceId) -> Result<&mut DeviceSlot> {
        self.devices
            .get_mut(&device_id)
            .ok_or(RegistryError::DeviceNotFound(device_id))
    }

    /// Drop a strategy's context and return its reservation to the device.
    pub(crate) fn remove_context(&mut self, strategy_id: &StrategyId) -> Option<AllocationContext> {
        let context = self.contexts.remove(strategy_id)?;
        if let Some(slot) = self.devices.get_mut(&context.device_id) {
            slot.reserved_memory = slot.reserved_memory.saturating_sub(context.reserved_memory);
            slot.reserved_streams = slot
                .reserved_streams
                .saturating_sub(context.reserved_streams);
        }
        Some(context)
    }

    /// Put a previously removed context back together with its reservation.
    pub(crate) fn restore_context(&mut self, context: AllocationContext) {
        if let Some(slot) = self.devices.get_mut(&context.device_id) {
            slot.reserved_memory += context.reserved_memory;
            slot.reserved_streams += context.reserved_streams;
        }
        self.contexts.insert(context.strategy_id.clone(), context);
    }

    /// Strategies currently bound to a device, in a stable order.
    pub(crate) fn strategies_on(&self, device_id: DeviceId) -> Vec<StrategyId> {
        let mut strategies: Vec<StrategyId> = self
            .contexts
            .values()
            .filter(|ctx| ctx.device_id == device_id)
            .map(|ctx| ctx.strategy_id.clone())
            .collect();
        strategies.sort();
        strategies
    }
}

/// Point-in-time capacity view of a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCapacity {
    pub device_id: DeviceId,
    pub total_memory: u64,
    pub reserved_memory: u64,
    pub free_memory: u64,
    pub total_streams: u32,
    pub reserved_streams: u32,
    pub backup_streams: u32,
    pub free_streams: u32,
    pub quarantined: bool,
    pub recovering: bool,
}

/// Registry of all devices known to the process.
///
/// Devices are registered once at startup and never removed; a device that
/// disappears is marked unavailable by a metric refresh instead.
pub struct DeviceRegistry {
    state: Mutex<PoolState>,
    health: DashMap<DeviceId, DeviceHealthInfo>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PoolState::default()),
            health: DashMap::new(),
        }
    }

    /// Create a registry from discovered devices.
    pub fn with_devices(specs: impl IntoIterator<Item = DeviceSpec>) -> Result<Self> {
        let registry = Self::new();
        for spec in specs {
            registry.register_device(spec)?;
        }
        Ok(registry)
    }

    /// Register a discovered device.
    pub fn register_device(&self, spec: DeviceSpec) -> Result<()> {
        if spec.total_memory == 0 {
            return Err(RegistryError::InvalidSpec(format!(
                "{} reports zero memory",
                spec.id
            )));
        }
        if spec.compute_streams == 0 {
            return Err(RegistryError::InvalidSpec(format!(
                "{} reports zero compute streams",
                spec.id
            )));
        }

        let mut state = self.state.lock();
        if state.devices.contains_key(&spec.id) {
            return Err(RegistryError::DeviceAlreadyExists(spec.id));
        }

        info!(
            device_id = %spec.id,
            name = %spec.name,
            total_memory = spec.total_memory,
            compute_streams = spec.compute_streams,
            "Registered device"
        );
        state.devices.insert(spec.id, DeviceSlot::new(&spec));
        Ok(())
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock()
    }

    pub fn contains(&self, device_id: DeviceId) -> bool {
        self.state.lock().devices.contains_key(&device_id)
    }

    pub fn device_ids(&self) -> Vec<DeviceId> {
        self.state.lock().devices.keys().copied().collect()
    }

    pub fn device(&self, device_id: DeviceId) -> Option<Device> {
        self.state
            .lock()
            .devices
            .get(&device_id)
            .map(|slot| slot.device.clone())
    }

    pub fn list_devices(&self) -> Vec<Device> {
        self.state
            .lock()
            .devices
            .values()
            .map(|slot| slot.device.clone())
            .collect()
    }

    pub fn capacity(&self, device_id: DeviceId) -> Option<DeviceCapacity> {
        self.state
            .lock()
            .devices
            .get(&device_id)
            .map(DeviceSlot::capacity)
    }

    /// Overwrite a device's dynamic attributes from a fresh metric snapshot.
    pub fn apply_metrics(&self, device_id: DeviceId, metrics: &DeviceMetrics) -> Result<()> {
        let mut state = self.state.lock();
        let slot = state.slot_mut(device_id)?;
        if slot.device.is_available != metrics.is_available {
            info!(
                device_id = %device_id,
                available = metrics.is_available,
                "Device availability changed"
            );
        }
        slot.device.apply_metrics(metrics);
        Ok(())
    }

    /// Take a device out of (or back into) the allocation pool.
    ///
    /// Lifting the quarantine also returns any backup stream to the device.
    pub fn set_quarantined(&self, device_id: DeviceId, quarantined: bool) -> Result<()> {
        let mut state = self.state.lock();
        let slot = state.slot_mut(device_id)?;
        if slot.quarantined == quarantined {
            return Ok(());
        }
        slot.quarantined = quarantined;
        if !quarantined {
            slot.backup_streams = 0;
        }
        debug!(device_id = %device_id, quarantined, "Device quarantine updated");
        Ok(())
    }

    pub fn is_quarantined(&self, device_id: DeviceId) -> bool {
        self.state
            .lock()
            .devices
            .get(&device_id)
            .map(|slot| slot.quarantined)
            .unwrap_or(false)
    }

    /// Mark a recovery as started on a device.
    ///
    /// Returns `false` if a recovery is already running for it.
    pub fn begin_recovery(&self, device_id: DeviceId) -> Result<bool> {
        let mut state = self.state.lock();
        let slot = state.slot_mut(device_id)?;
        if slot.recovering {
            return Ok(false);
        }
        slot.recovering = true;
        Ok(true)
    }

    /// Mark a recovery as finished on a device.
    pub fn end_recovery(&self, device_id: DeviceId) {
        if let Some(slot) = self.state.lock().devices.get_mut(&device_id) {
            slot.recovering = false;
        }
    }

    pub fn is_recovering(&self, device_id: DeviceId) -> bool {
        self.state
            .lock()
            .devices
            .get(&device_id)
            .map(|slot| slot.recovering)
            .unwrap_or(false)
    }

    /// Current health record of a device, if it has been checked.
    pub fn health_info(&self, device_id: DeviceId) -> Option<DeviceHealthInfo> {
        self.health.get(&device_id).map(|info| info.clone())
    }

    /// All health records, ordered by device.
    pub fn all_health(&self) -> Vec<DeviceHealthInfo> {
        let mut infos: Vec<DeviceHealthInfo> =
            self.health.iter().map(|r| r.value().clone()).collect();
        infos.sort_by_key(|info| info.device_id);
        infos
    }

    /// Mutate a device's health record, creating it on first use.
    pub fn update_health<R>(
        &self,
        device_id: DeviceId,
        update: impl FnOnce(&mut DeviceHealthInfo) -> R,
    ) -> R {
        let mut entry = self
            .health
            .entry(device_id)
            .or_insert_with(|| DeviceHealthInfo::new(device_id));
        update(entry.value_mut())
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
