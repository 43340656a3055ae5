//! Recovery for degraded and failed devices.
//!
//! When a device turns critical or fails, the monitor runs a
//! [`RecoveryCascade`]: an ordered list of [`RecoveryStrategy`]s tried one by
//! one until the first success.
//!
//! 1. [`BackupStreamStrategy`]: switch to a spare stream on the same device
//! 2. [`DeviceMigrationStrategy`]: move every bound strategy to another device
//! 3. [`CpuFallbackStrategy`]: run the strategies without acceleration

mod cascade;
mod response;
mod strategies;

pub use cascade::{RecoveryCascade, ALL_STRATEGIES_FAILED};
pub use response::FailureResponse;
pub use strategies::{
    BackupStreamStrategy, CpuFallbackStrategy, DeviceMigrationStrategy, RecoveryStrategy,
    RecoveryTarget,
};
