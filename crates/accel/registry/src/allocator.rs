//! Resource allocator
//!
//! Grants and revokes per-strategy allocation contexts against the
//! [`DeviceRegistry`]. Every operation runs as one critical section under the
//! registry lock and never suspends.
//!
//! Selection policy: a device qualifies when it is available, not quarantined
//! or under recovery, and has enough free memory and streams. Qualifying
//! devices are ranked by ascending compute utilization, then by descending
//! free memory, then by device ordinal. `Low`/`Medium` requests cannot dip
//! into the configured per-device headroom.

use std::cmp::Ordering;
use std::sync::Arc;

use accel_types::{
    AllocationContext, AllocationPriority, AllocationRequest, Device, DeviceHealthInfo, DeviceId,
    StrategyId,
};
use tracing::{debug, info, instrument, warn};

use crate::config::AllocatorConfig;
use crate::error::{RegistryError, Result};
use crate::registry::{DeviceRegistry, DeviceSlot, PoolState};

/// Capacity a placement has to fit.
#[derive(Debug, Clone, Copy)]
struct Demand {
    memory: u64,
    streams: u32,
    priority: AllocationPriority,
}

/// Result of moving a failed device's strategies elsewhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub from: DeviceId,
    pub to: DeviceId,
    pub strategies: Vec<StrategyId>,
}

/// Grants device capacity to strategies.
pub struct ResourceAllocator {
    registry: Arc<DeviceRegistry>,
    config: AllocatorConfig,
}

impl ResourceAllocator {
    pub fn new(registry: Arc<DeviceRegistry>, config: AllocatorConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    /// Reserve capacity for a strategy.
    ///
    /// Returns `None` when no device can take the request; callers are
    /// expected to fall back to CPU execution. A strategy that already holds
    /// a context gives it up only when the new request is granted; its old
    /// reservation counts as free while the new device is chosen.
    #[instrument(skip(self, request), fields(strategy_id = %request.strategy_id, priority = %request.priority))]
    pub fn allocate(&self, request: &AllocationRequest) -> Option<DeviceId> {
        let mut state = self.registry.lock();
        let previous = state.remove_context(&request.strategy_id);

        let demand = Demand {
            memory: request.required_memory,
            streams: request.required_compute_streams,
            priority: request.priority,
        };

        let Some(device_id) = select_device(&state, &self.config, demand, None) else {
            info!(
                required_memory = request.required_memory,
                required_streams = request.required_compute_streams,
                "No device can satisfy allocation request"
            );
            if let Some(previous) = previous {
                debug!(device_id = %previous.device_id, "Keeping previous allocation");
                state.restore_context(previous);
            }
            return None;
        };

        if let Some(previous) = &previous {
            debug!(from = %previous.device_id, to = %device_id, "Replacing previous allocation");
        }
        if let Some(slot) = state.devices.get_mut(&device_id) {
            slot.reserved_memory += request.required_memory;
            slot.reserved_streams += request.required_compute_streams;
        }
        state.cpu_fallback.remove(&request.strategy_id);
        state.contexts.insert(
            request.strategy_id.clone(),
            AllocationContext::from_request(request, device_id),
        );

        debug!(device_id = %device_id, "Allocation granted");
        Some(device_id)
    }

    /// Release a strategy's allocation. Unknown strategies are ignored.
    pub fn release(&self, strategy_id: &StrategyId) {
        let mut state = self.registry.lock();
        state.cpu_fallback.remove(strategy_id);
        if let Some(context) = state.remove_context(strategy_id) {
            debug!(
                strategy_id = %strategy_id,
                device_id = %context.device_id,
                "Allocation released"
            );
        }
    }

    pub fn list_devices(&self) -> Vec<Device> {
        self.registry.list_devices()
    }

    /// Health record for a device. A device that has not been checked yet
    /// reports a fresh record with no check time.
    pub fn device_health(&self, device_id: DeviceId) -> Result<DeviceHealthInfo> {
        if !self.registry.contains(device_id) {
            return Err(RegistryError::DeviceNotFound(device_id));
        }
        Ok(self
            .registry
            .health_info(device_id)
            .unwrap_or_else(|| DeviceHealthInfo::new(device_id)))
    }

    pub fn context(&self, strategy_id: &StrategyId) -> Option<AllocationContext> {
        self.registry.lock().contexts.get(strategy_id).cloned()
    }

    pub fn active_contexts(&self) -> Vec<AllocationContext> {
        let mut contexts: Vec<AllocationContext> =
            self.registry.lock().contexts.values().cloned().collect();
        contexts.sort_by(|a, b| a.strategy_id.cmp(&b.strategy_id));
        contexts
    }

    /// Strategies currently bound to a device.
    pub fn strategies_on(&self, device_id: DeviceId) -> Vec<StrategyId> {
        self.registry.lock().strategies_on(device_id)
    }

    /// Strategies that were moved to CPU execution by recovery.
    pub fn cpu_fallback_strategies(&self) -> Vec<StrategyId> {
        self.registry.lock().cpu_fallback.iter().cloned().collect()
    }

    pub fn is_on_cpu(&self, strategy_id: &StrategyId) -> bool {
        self.registry.lock().cpu_fallback.contains(strategy_id)
    }

    /// Hold one spare stream on a device as the backup for its active stream.
    ///
    /// Fails if the device is unreachable, has no spare stream, or already
    /// holds a backup stream from an earlier recovery.
    pub fn reserve_backup_stream(&self, device_id: DeviceId) -> Result<Vec<StrategyId>> {
        let mut state = self.registry.lock();
        let strategies = state.strategies_on(device_id);
        let slot = state.slot_mut(device_id)?;

        if !slot.device.is_available {
            return Err(RegistryError::DeviceUnavailable(device_id));
        }
        if slot.backup_streams > 0 {
            return Err(RegistryError::BackupStreamInUse(device_id));
        }
        if slot.free_streams() == 0 {
            return Err(RegistryError::NoSpareStream(device_id));
        }

        slot.backup_streams += 1;
        debug!(device_id = %device_id, "Backup stream reserved");
        Ok(strategies)
    }

    /// Move every strategy bound to `from` onto a single other device.
    ///
    /// The target is chosen with the normal selection policy for the combined
    /// demand, using the highest priority among the moved contexts. Either all
    /// strategies move or none do. Returns `None` when no device can take them.
    pub fn migrate_device(&self, from: DeviceId) -> Result<Option<Migration>> {
        let mut state = self.registry.lock();
        if !state.devices.contains_key(&from) {
            return Err(RegistryError::DeviceNotFound(from));
        }

        let strategies = state.strategies_on(from);
        let demand = strategies
            .iter()
            .filter_map(|id| state.contexts.get(id))
            .fold(
                Demand {
                    memory: 0,
                    streams: 0,
                    priority: AllocationPriority::Low,
                },
                |acc, ctx| Demand {
                    memory: acc.memory + ctx.reserved_memory,
                    streams: acc.streams + ctx.reserved_streams,
                    priority: acc.priority.max(ctx.priority),
                },
            );

        let Some(to) = select_device(&state, &self.config, demand, Some(from)) else {
            warn!(
                device_id = %from,
                strategies = strategies.len(),
                "No backup device can take the failed device's strategies"
            );
            return Ok(None);
        };

        for strategy_id in &strategies {
            if let Some(ctx) = state.contexts.get_mut(strategy_id) {
                ctx.device_id = to;
                ctx.migrated_from = Some(from);
            }
        }
        if let Some(source) = state.devices.get_mut(&from) {
            source.reserved_memory = source.reserved_memory.saturating_sub(demand.memory);
            source.reserved_streams = source.reserved_streams.saturating_sub(demand.streams);
        }
        if let Some(target) = state.devices.get_mut(&to) {
            target.reserved_memory += demand.memory;
            target.reserved_streams += demand.streams;
        }

        info!(
            from = %from,
            to = %to,
            strategies = strategies.len(),
            "Migrated strategies to backup device"
        );
        Ok(Some(Migration {
            from,
            to,
            strategies,
        }))
    }

    /// Release every context on a device and mark the strategies as running
    /// without acceleration.
    pub fn fallback_to_cpu(&self, device_id: DeviceId) -> Result<Vec<StrategyId>> {
        let mut state = self.registry.lock();
        if !state.devices.contains_key(&device_id) {
            return Err(RegistryError::DeviceNotFound(device_id));
        }

        let strategies = state.strategies_on(device_id);
        for strategy_id in &strategies {
            state.remove_context(strategy_id);
            state.cpu_fallback.insert(strategy_id.clone());
        }

        info!(
            device_id = %device_id,
            strategies = strategies.len(),
            "Strategies moved to CPU execution"
        );
        Ok(strategies)
    }
}

/// Memory a request at `priority` may use on a device.
fn usable_memory(slot: &DeviceSlot, config: &AllocatorConfig, priority: AllocationPriority) -> u64 {
    let free = slot.free_memory();
    if priority.may_use_headroom() {
        free
    } else {
        free.saturating_sub(config.headroom_for(slot.device.total_memory))
    }
}

/// Pick the best device for a demand, or `None` if nothing qualifies.
fn select_device(
    state: &PoolState,
    config: &AllocatorConfig,
    demand: Demand,
    exclude: Option<DeviceId>,
) -> Option<DeviceId> {
    state
        .devices
        .values()
        .filter(|slot| Some(slot.device.id) != exclude)
        .filter(|slot| slot.is_eligible())
        .filter(|slot| usable_memory(slot, config, demand.priority) >= demand.memory)
        .filter(|slot| slot.free_streams() >= demand.streams)
        .min_by(|a, b| rank(a, b))
        .map(|slot| slot.device.id)
}

fn rank(a: &DeviceSlot, b: &DeviceSlot) -> Ordering {
    a.device
        .compute_utilization
        .total_cmp(&b.device.compute_utilization)
        .then_with(|| b.free_memory().cmp(&a.free_memory()))
        .then_with(|| a.device.id.cmp(&b.device.id))
}
