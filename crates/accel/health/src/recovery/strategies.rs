//! Built-in recovery strategies.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use accel_registry::ResourceAllocator;
use accel_types::{AlertType, DeviceId, HealthStatus};
use async_trait::async_trait;
use tracing::debug;

use super::response::FailureResponse;
use crate::error::HealthResult;

/// The device a cascade is trying to recover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryTarget {
    pub device_id: DeviceId,
    pub status: HealthStatus,
    pub alerts: BTreeSet<AlertType>,
}

impl RecoveryTarget {
    pub fn new(device_id: DeviceId, status: HealthStatus) -> Self {
        Self {
            device_id,
            status,
            alerts: BTreeSet::new(),
        }
    }

    pub fn with_alerts(mut self, alerts: BTreeSet<AlertType>) -> Self {
        self.alerts = alerts;
        self
    }
}

/// One step of the recovery cascade.
///
/// Returning `Ok` with `success == false` and returning `Err` both mean the
/// cascade moves on to the next strategy.
#[async_trait]
pub trait RecoveryStrategy: Send + Sync {
    /// Name used in logs and in [`FailureResponse::strategy`].
    fn name(&self) -> &str;

    /// How long the strategy is expected to take. Overruns are logged.
    fn expected_latency(&self) -> Duration;

    /// Try to recover the target device.
    async fn attempt(&self, target: &RecoveryTarget) -> HealthResult<FailureResponse>;
}

fn disabled(name: &str) -> FailureResponse {
    FailureResponse::failure(format!("{} skipped", name), format!("{} is disabled", name))
}

/// Moves the device's active stream onto a spare stream on the same device.
pub struct BackupStreamStrategy {
    allocator: Arc<ResourceAllocator>,
    enabled: bool,
}

impl BackupStreamStrategy {
    pub const NAME: &'static str = "backup_stream";

    pub fn new(allocator: Arc<ResourceAllocator>, enabled: bool) -> Self {
        Self { allocator, enabled }
    }
}

#[async_trait]
impl RecoveryStrategy for BackupStreamStrategy {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn expected_latency(&self) -> Duration {
        Duration::from_millis(10)
    }

    async fn attempt(&self, target: &RecoveryTarget) -> HealthResult<FailureResponse> {
        if !self.enabled {
            return Ok(disabled(Self::NAME));
        }
        // A failed device cannot be trusted with any of its streams
        if target.status == HealthStatus::Failed {
            return Ok(FailureResponse::failure(
                "Backup stream not attempted",
                format!("{} has failed", target.device_id),
            ));
        }

        let strategies = self.allocator.reserve_backup_stream(target.device_id)?;
        debug!(device_id = %target.device_id, "Switched to backup stream");
        Ok(FailureResponse::success(format!(
            "Switched {} to backup stream",
            target.device_id
        ))
        .with_affected(strategies))
    }
}

/// Moves every strategy on the device to one other device.
pub struct DeviceMigrationStrategy {
    allocator: Arc<ResourceAllocator>,
    enabled: bool,
}

impl DeviceMigrationStrategy {
    pub const NAME: &'static str = "device_migration";

    pub fn new(allocator: Arc<ResourceAllocator>, enabled: bool) -> Self {
        Self { allocator, enabled }
    }
}

#[async_trait]
impl RecoveryStrategy for DeviceMigrationStrategy {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn expected_latency(&self) -> Duration {
        Duration::from_millis(50)
    }

    async fn attempt(&self, target: &RecoveryTarget) -> HealthResult<FailureResponse> {
        if !self.enabled {
            return Ok(disabled(Self::NAME));
        }

        match self.allocator.migrate_device(target.device_id)? {
            Some(migration) => Ok(FailureResponse::success(format!(
                "Migrated {} strategies from {} to {}",
                migration.strategies.len(),
                migration.from,
                migration.to
            ))
            .with_fallback_device(migration.to)
            .with_affected(migration.strategies)),
            None => Ok(FailureResponse::failure(
                "Device migration not possible",
                "No backup device available",
            )),
        }
    }
}

/// Moves every strategy on the device to CPU execution.
pub struct CpuFallbackStrategy {
    allocator: Arc<ResourceAllocator>,
    enabled: bool,
}

impl CpuFallbackStrategy {
    pub const NAME: &'static str = "cpu_fallback";

    pub fn new(allocator: Arc<ResourceAllocator>, enabled: bool) -> Self {
        Self { allocator, enabled }
    }
}

#[async_trait]
impl RecoveryStrategy for CpuFallbackStrategy {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn expected_latency(&self) -> Duration {
        Duration::from_millis(100)
    }

    async fn attempt(&self, target: &RecoveryTarget) -> HealthResult<FailureResponse> {
        if !self.enabled {
            return Ok(disabled(Self::NAME));
        }

        let strategies = self.allocator.fallback_to_cpu(target.device_id)?;
        Ok(FailureResponse::success(format!(
            "Moved {} strategies from {} to CPU",
            strategies.len(),
            target.device_id
        ))
        .with_affected(strategies))
    }
}
