//! Accel Types - Core types for the accelerator pool
//!
//! The accelerator pool arbitrates a shared set of compute devices among
//! concurrently running strategies, watches device health, and recovers
//! strategies when a device degrades.
//!
//! ## Architectural Boundaries
//!
//! - **accel-types** owns: identifiers, device records, allocation records,
//!   health records and thresholds
//! - **accel-registry** owns: device bookkeeping and allocation policy
//! - **accel-health** owns: health evaluation, the monitor loop, alert
//!   delivery and the recovery cascade
//!
//! ## Key Concepts
//!
//! - **Device**: a unit of acceleration hardware with finite memory and
//!   compute-stream capacity
//! - **Strategy**: a logical consumer that requests device capacity
//! - **AllocationContext**: binds a strategy to a device and its reserved capacity
//! - **DeviceHealthInfo**: the monitor's running view of one device

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod allocation;
pub mod device;
pub mod health;
pub mod ids;

// Re-export main types
pub use allocation::{AllocationContext, AllocationPriority, AllocationRequest, PerformanceProfile};
pub use device::{Device, DeviceMetrics, DeviceSpec};
pub use health::{AlertType, DeviceHealthInfo, HealthStatus, PerformanceThreshold};
pub use ids::{DeviceId, StrategyId};
