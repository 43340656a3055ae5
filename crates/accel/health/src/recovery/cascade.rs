//! Ordered recovery cascade.

use std::sync::Arc;
use std::time::Instant;

use accel_registry::ResourceAllocator;
use tracing::{info, instrument, warn};

use super::response::FailureResponse;
use super::strategies::{
    BackupStreamStrategy, CpuFallbackStrategy, DeviceMigrationStrategy, RecoveryStrategy,
    RecoveryTarget,
};
use crate::config::RecoveryConfig;

/// Action reported when every strategy failed.
pub const ALL_STRATEGIES_FAILED: &str = "All recovery strategies failed";

/// Tries recovery strategies in order until one succeeds.
pub struct RecoveryCascade {
    strategies: Vec<Arc<dyn RecoveryStrategy>>,
}

impl RecoveryCascade {
    /// Standard cascade: backup stream, then device migration, then CPU.
    pub fn new(allocator: Arc<ResourceAllocator>, config: &RecoveryConfig) -> Self {
        Self::with_strategies(vec![
            Arc::new(BackupStreamStrategy::new(
                allocator.clone(),
                config.backup_stream,
            )),
            Arc::new(DeviceMigrationStrategy::new(
                allocator.clone(),
                config.device_migration,
            )),
            Arc::new(CpuFallbackStrategy::new(allocator, config.cpu_fallback)),
        ])
    }

    pub fn with_strategies(strategies: Vec<Arc<dyn RecoveryStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Run the cascade against a device.
    ///
    /// Returns the first successful response, or a failed response listing
    /// every strategy's error when none succeeded.
    #[instrument(skip(self, target), fields(device_id = %target.device_id, status = %target.status))]
    pub async fn run(&self, target: RecoveryTarget) -> FailureResponse {
        let started = Instant::now();
        let mut errors = Vec::with_capacity(self.strategies.len());

        for strategy in &self.strategies {
            let attempt_started = Instant::now();
            let mut response = match strategy.attempt(&target).await {
                Ok(response) => response,
                Err(e) => FailureResponse::failure(format!("{} failed", strategy.name()), e.to_string()),
            };
            let elapsed = attempt_started.elapsed();
            response.recovery_time_ms = elapsed.as_secs_f64() * 1000.0;
            response.strategy = Some(strategy.name().to_string());

            if elapsed > strategy.expected_latency() {
                warn!(
                    strategy = strategy.name(),
                    elapsed_ms = response.recovery_time_ms,
                    expected_ms = strategy.expected_latency().as_millis() as u64,
                    "Recovery strategy overran its expected latency"
                );
            }

            if response.success {
                info!(
                    strategy = strategy.name(),
                    action = %response.action_taken,
                    "Recovery succeeded"
                );
                return response;
            }

            let details = response
                .error_details
                .unwrap_or_else(|| response.action_taken.clone());
            warn!(strategy = strategy.name(), error = %details, "Recovery strategy failed");
            errors.push(format!("{}: {}", strategy.name(), details));
        }

        let mut response = FailureResponse::failure(ALL_STRATEGIES_FAILED, errors.join("; "));
        response.recovery_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        response
    }
}
