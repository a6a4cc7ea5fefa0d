//! # Metrics
//!
//! Prometheus metrics for monitoring reflections.
//!
//! ## Metrics Exposed
//!
//! - `reflector_reflections_reflected_total` - Reflections attempted, by action and outcome
//! - `reflector_reflections_reflection_latency` - Wall-clock duration of a full reconciliation fan-out
//! - `reflector_reflections_reflect_latency` - Duration of a single per-namespace reflection

use anyhow::Result;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use std::sync::LazyLock;

/// Metric namespace for everything the reflector produces
const NAMESPACE: &str = "reflector";

/// Subsystem for reflection metrics
const SUBSYSTEM: &str = "reflections";

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static REFLECTED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "reflected_total",
            "The number of total reflections since the start of the reflector",
        )
        .namespace(NAMESPACE)
        .subsystem(SUBSYSTEM),
        &["reflection_action", "secret", "success", "namespace"],
    )
    .expect("Failed to create REFLECTED_TOTAL metric - this should never happen")
});

static REFLECTION_LATENCY: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "reflection_latency",
            "The latency from when a reflection is detected, to when it is completely reflected",
        )
        .namespace(NAMESPACE)
        .subsystem(SUBSYSTEM),
        &["secret"],
    )
    .expect("Failed to create REFLECTION_LATENCY metric - this should never happen")
});

static REFLECT_LATENCY: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "reflect_latency",
            "The latency for the reflection of a single secret",
        )
        .namespace(NAMESPACE)
        .subsystem(SUBSYSTEM),
        &["secret", "namespace"],
    )
    .expect("Failed to create REFLECT_LATENCY metric - this should never happen")
});

/// Registers every reflector metric with the process registry.
///
/// Must be called once during startup, before the metrics server
/// starts serving scrapes.
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(REFLECTED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REFLECTION_LATENCY.clone()))?;
    REGISTRY.register(Box::new(REFLECT_LATENCY.clone()))?;
    Ok(())
}

/// Records one reflection attempt against a destination namespace
pub fn record_reflection(action: &str, secret: &str, success: bool, namespace: &str) {
    let success = if success { "true" } else { "false" };
    REFLECTED_TOTAL
        .with_label_values(&[action, secret, success, namespace])
        .inc();
}

/// Observes the duration of a full fan-out for one source secret
pub fn observe_reflection_latency(secret: &str, seconds: f64) {
    REFLECTION_LATENCY.with_label_values(&[secret]).observe(seconds);
}

/// Observes the duration of a single per-namespace reflection
pub fn observe_reflect_latency(secret: &str, namespace: &str, seconds: f64) {
    REFLECT_LATENCY
        .with_label_values(&[secret, namespace])
        .observe(seconds);
}
