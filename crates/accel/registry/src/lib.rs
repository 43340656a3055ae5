//! Accel Registry - Device registry and resource allocator
//!
//! This crate owns the mutable state of the accelerator pool:
//!
//! - **DeviceRegistry**: every discovered device, its capacity bookkeeping,
//!   active allocation contexts and per-device health records
//! - **ResourceAllocator**: grants and revokes per-strategy contexts under a
//!   priority policy, and performs the capacity moves the recovery cascade
//!   asks for (backup stream, migration, CPU fallback)
//!
//! ## Consistency
//!
//! Devices and contexts sit behind one registry-wide lock. Allocation never
//! suspends, so the critical sections stay short, and a device cannot be
//! allocated into while a recovery is tearing it down.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod allocator;
pub mod config;
pub mod error;
pub mod registry;

// Re-exports
pub use allocator::{Migration, ResourceAllocator};
pub use config::AllocatorConfig;
pub use error::{RegistryError, Result};
pub use registry::{DeviceCapacity, DeviceRegistry};
