//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! flags where applicable.

use std::time::Duration;

/// Default number of workers draining the work queue
pub const DEFAULT_WORKER_CONCURRENCY: usize = 10;

/// Default number of concurrent per-namespace reflections
pub const DEFAULT_REFLECT_CONCURRENCY: usize = 1;

/// Default number of times a failing key is requeued before it is dropped
pub const DEFAULT_RETRIES: u32 = 5;

/// Default address for the metrics server
pub const DEFAULT_METRICS_ADDR: &str = "localhost:8080";

/// Base delay for the per-item exponential backoff in the work queue
pub const BACKOFF_BASE: Duration = Duration::from_millis(5);

/// Cap for the per-item exponential backoff in the work queue
pub const BACKOFF_MAX: Duration = Duration::from_secs(1000);

/// Delay before restarting a worker that panicked
pub const WORKER_RESTART_DELAY: Duration = Duration::from_secs(1);
