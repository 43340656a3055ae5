//! Health monitoring configuration.
//!
//! Thresholds, tick interval and recovery switches are supplied at
//! construction time and never change afterwards.

use std::time::Duration;

use accel_registry::AllocatorConfig;
use accel_types::PerformanceThreshold;
use serde::{Deserialize, Serialize};

/// Configuration for health monitoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Interval between monitoring cycles.
    pub check_interval: Duration,

    /// Thresholds for alert derivation.
    pub thresholds: PerformanceThreshold,

    /// Recovery cascade configuration.
    pub recovery: RecoveryConfig,

    /// Capacity of the alert broadcast channel.
    pub alert_channel_capacity: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(5),
            thresholds: PerformanceThreshold::default(),
            recovery: RecoveryConfig::default(),
            alert_channel_capacity: 1024,
        }
    }
}

impl HealthConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    pub fn with_thresholds(mut self, thresholds: PerformanceThreshold) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_recovery(mut self, recovery: RecoveryConfig) -> Self {
        self.recovery = recovery;
        self
    }
}

/// Switches for the individual recovery strategies.
///
/// A disabled strategy stays in the cascade and reports failure, so the
/// cascade moves on to the next one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Enable switching to a backup stream on the same device.
    pub backup_stream: bool,

    /// Enable migrating strategies to another device.
    pub device_migration: bool,

    /// Enable moving strategies to CPU execution.
    pub cpu_fallback: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            backup_stream: true,
            device_migration: true,
            cpu_fallback: true,
        }
    }
}

/// Configuration for a whole accelerator pool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Allocator policy.
    pub allocator: AllocatorConfig,

    /// Health monitoring.
    pub health: HealthConfig,
}
