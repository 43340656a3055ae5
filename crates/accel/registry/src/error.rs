//! Registry error types

use accel_types::DeviceId;
use thiserror::Error;

/// Registry errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Device not found: {0}")]
    DeviceNotFound(DeviceId),

    #[error("Device already registered: {0}")]
    DeviceAlreadyExists(DeviceId),

    #[error("Device unavailable: {0}")]
    DeviceUnavailable(DeviceId),

    #[error("No spare compute stream on {0}")]
    NoSpareStream(DeviceId),

    #[error("Backup stream already in use on {0}")]
    BackupStreamInUse(DeviceId),

    #[error("Invalid device spec: {0}")]
    InvalidSpec(String),
}

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;
