//! Property tests: health evaluation is a pure function of metrics and thresholds.

use accel_health::{classify, evaluate};
use accel_types::{AlertType, DeviceMetrics, HealthStatus, PerformanceThreshold};
use proptest::prelude::*;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn arb_metrics() -> impl Strategy<Value = DeviceMetrics> {
    (
        0.0f64..=1.0,
        0.0f64..=1.0,
        20.0f64..110.0,
        0.0f64..2_000.0,
        0.0f64..=0.2,
        any::<bool>(),
        any::<bool>(),
    )
        .prop_map(
            |(memory, compute, temperature, response_time, error_rate, driver, memory_fault)| {
                let mut metrics = DeviceMetrics::idle()
                    .with_memory_utilization(memory)
                    .with_compute_utilization(compute)
                    .with_temperature(temperature)
                    .with_response_time(response_time)
                    .with_error_rate(error_rate);
                metrics.driver_fault = driver;
                metrics.memory_fault = memory_fault;
                metrics
            },
        )
}

fn arb_thresholds() -> impl Strategy<Value = PerformanceThreshold> {
    (0.5f64..1.0, 0.5f64..1.0, 60.0f64..100.0, 100.0f64..1_500.0, 0.01f64..0.1).prop_map(
        |(memory, compute, temperature, response_time, error_rate)| PerformanceThreshold {
            memory_threshold: memory,
            compute_threshold: compute,
            temperature_threshold: temperature,
            response_time_threshold: response_time,
            error_rate_threshold: error_rate,
        },
    )
}

/// Independent statement of the status precedence.
fn expected_status(metrics: &DeviceMetrics, t: &PerformanceThreshold) -> HealthStatus {
    if metrics.error_rate > t.error_rate_threshold || metrics.driver_fault {
        return HealthStatus::Failed;
    }
    if metrics.memory_fault {
        return HealthStatus::Critical;
    }
    let any_threshold = metrics.memory_utilization > t.memory_threshold
        || metrics.compute_utilization > t.compute_threshold
        || metrics.temperature > t.temperature_threshold
        || metrics.response_time > t.response_time_threshold;
    if any_threshold {
        HealthStatus::Warning
    } else {
        HealthStatus::Healthy
    }
}

// ---------------------------------------------------------------------------
// Property Tests
// ---------------------------------------------------------------------------

proptest! {
    /// Evaluating the same snapshot twice gives the same result.
    #[test]
    fn evaluation_is_deterministic(metrics in arb_metrics(), thresholds in arb_thresholds()) {
        prop_assert_eq!(evaluate(&metrics, &thresholds), evaluate(&metrics, &thresholds));
    }

    /// Status follows the fixed precedence order.
    #[test]
    fn status_matches_precedence(metrics in arb_metrics(), thresholds in arb_thresholds()) {
        let evaluation = evaluate(&metrics, &thresholds);
        prop_assert_eq!(evaluation.status, expected_status(&metrics, &thresholds));
        prop_assert_eq!(evaluation.status, classify(&evaluation.alerts));
        prop_assert_eq!(evaluation.alerts.is_empty(), evaluation.status == HealthStatus::Healthy);
    }

    /// Any error rate above threshold fails the device, whatever else is going on.
    #[test]
    fn error_rate_above_threshold_fails(
        metrics in arb_metrics(),
        thresholds in arb_thresholds(),
        excess in 0.001f64..0.5,
    ) {
        let metrics = metrics.with_error_rate((thresholds.error_rate_threshold + excess).min(1.0));
        let evaluation = evaluate(&metrics, &thresholds);
        prop_assert!(evaluation.alerts.contains(&AlertType::DeviceError));
        prop_assert_eq!(evaluation.status, HealthStatus::Failed);
    }
}
