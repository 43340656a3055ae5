//! Shared fixtures for the accelerator pool integration tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use accel_health::{
    AcceleratorPool, FailureResponse, HealthResult, MetricsReading, MetricsSource, PoolConfig,
    RecordingSubscriber, RecoveryStrategy, RecoveryTarget, StaticMetricsSource,
};
use accel_registry::AllocatorConfig;
use accel_types::{DeviceId, DeviceSpec};
use async_trait::async_trait;
use parking_lot::Mutex;

/// Install a test-friendly tracing subscriber. Controlled by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A pool with a settable metrics source and a recording alert subscriber.
pub struct Harness {
    pub pool: AcceleratorPool,
    pub source: Arc<StaticMetricsSource>,
    pub alerts: Arc<RecordingSubscriber>,
}

impl Harness {
    pub fn new(devices: Vec<DeviceSpec>, config: PoolConfig) -> HealthResult<Self> {
        init_tracing();
        let source = Arc::new(StaticMetricsSource::idle(devices.iter().map(|d| d.id)));
        let pool = AcceleratorPool::new(devices, source.clone(), config)?;
        let alerts = Arc::new(RecordingSubscriber::new());
        pool.add_subscriber(alerts.clone());
        Ok(Self {
            pool,
            source,
            alerts,
        })
    }

    /// Two devices: `{mem: 8, streams: 8}` and `{mem: 16, streams: 4}`, no headroom.
    pub fn two_devices() -> HealthResult<Self> {
        Self::new(
            vec![DeviceSpec::new(1, 8, 8), DeviceSpec::new(2, 16, 4)],
            no_headroom(),
        )
    }
}

pub fn no_headroom() -> PoolConfig {
    PoolConfig {
        allocator: AllocatorConfig::without_headroom(),
        ..PoolConfig::default()
    }
}

/// Shared call log for [`ScriptedStrategy`].
pub type CallLog = Arc<Mutex<Vec<String>>>;

/// Metrics source whose refresh never completes.
pub struct StalledMetricsSource;

#[async_trait]
impl MetricsSource for StalledMetricsSource {
    async fn refresh_metrics(&self) -> HashMap<DeviceId, MetricsReading> {
        std::future::pending().await
    }
}

/// Recovery strategy with a fixed outcome that logs every call.
pub struct ScriptedStrategy {
    name: String,
    succeed: bool,
    delay: Option<Duration>,
    calls: CallLog,
}

impl ScriptedStrategy {
    pub fn new(name: impl Into<String>, succeed: bool, calls: CallLog) -> Self {
        Self {
            name: name.into(),
            succeed,
            delay: None,
            calls,
        }
    }

    /// Sleep for `delay` before reporting the outcome.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl RecoveryStrategy for ScriptedStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn expected_latency(&self) -> Duration {
        Duration::from_millis(10)
    }

    async fn attempt(&self, target: &RecoveryTarget) -> HealthResult<FailureResponse> {
        self.calls.lock().push(self.name.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.succeed {
            Ok(FailureResponse::success(format!("{} on {}", self.name, target.device_id)))
        } else {
            Ok(FailureResponse::failure(&self.name, "scripted failure"))
        }
    }
}

/// Build scripted strategies named `step1`, `step2`, ... with the given outcomes.
pub fn scripted(outcomes: &[bool]) -> (Vec<Arc<dyn RecoveryStrategy>>, CallLog) {
    let calls: CallLog = Arc::new(Mutex::new(Vec::new()));
    let strategies = outcomes
        .iter()
        .enumerate()
        .map(|(i, &succeed)| {
            Arc::new(ScriptedStrategy::new(format!("step{}", i + 1), succeed, calls.clone()))
                as Arc<dyn RecoveryStrategy>
        })
        .collect();
    (strategies, calls)
}

pub fn device(id: u32) -> DeviceId {
    DeviceId::new(id)
}
