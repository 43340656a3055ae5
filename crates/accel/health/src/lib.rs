//! Accel Health - Health monitoring, alerting and recovery
//!
//! This crate keeps an accelerator pool healthy:
//!
//! - **Evaluator**: pure mapping from a metric snapshot to alerts and a status
//! - **HealthMonitor**: periodic loop that refreshes metrics, evaluates every
//!   device, dispatches new alerts and starts recovery
//! - **RecoveryCascade**: backup stream, then device migration, then CPU
//!   fallback, stopping at the first success
//! - **AlertDispatcher**: best-effort delivery to subscribers
//! - **AcceleratorPool**: facade wiring all of the above to the allocator
//!
//! ## Failure handling
//!
//! Nothing here is fatal to the host. A device whose metrics cannot be read
//! is marked failed and the cycle moves on; a failing recovery strategy hands
//! over to the next one; a failing subscriber is logged and skipped.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod alerts;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod metrics;
pub mod monitor;
pub mod pool;
pub mod recovery;

// Re-exports
pub use alerts::{
    AlertDispatcher, AlertEvent, AlertOrigin, AlertSeverity, AlertSubscriber, FnSubscriber,
    RecordingSubscriber, SubscriberId,
};
pub use config::{HealthConfig, PoolConfig, RecoveryConfig};
pub use error::{AlertError, HealthError, HealthResult, MetricsError};
pub use evaluator::{classify, derive_alerts, evaluate, Evaluation};
pub use metrics::{MetricsReading, MetricsSource, StaticMetricsSource};
pub use monitor::{CycleReport, DeviceHealthSummary, HealthMonitor, HealthStats};
pub use pool::AcceleratorPool;
pub use recovery::{
    BackupStreamStrategy, CpuFallbackStrategy, DeviceMigrationStrategy, FailureResponse,
    RecoveryCascade, RecoveryStrategy, RecoveryTarget, ALL_STRATEGIES_FAILED,
};
