//! Command-line surface for the reflector binary.

use clap::Parser;

use crate::constants::{
    DEFAULT_METRICS_ADDR, DEFAULT_REFLECT_CONCURRENCY, DEFAULT_RETRIES,
    DEFAULT_WORKER_CONCURRENCY,
};
use crate::reflector::ReflectorConfig;

/// A utility kubernetes server for syncing secrets from one namespace
/// to others.
#[derive(Parser, Debug)]
#[command(
    name = "reflector",
    about = "A kubernetes secret syncer",
    version = crate::version::long_version(),
)]
pub struct Cli {
    /// The namespace to sync secrets from
    #[arg(short, long, env = "POD_NAMESPACE")]
    pub namespace: String,

    /// The number of times to retry reflecting a secret on error
    #[arg(short, long, default_value_t = DEFAULT_RETRIES)]
    pub retries: u32,

    /// Enables Prometheus metrics for the reflector
    #[arg(short, long, default_value_t = true, action = clap::ArgAction::Set)]
    pub metrics: bool,

    /// The address to expose metrics on
    #[arg(long, default_value = DEFAULT_METRICS_ADDR)]
    pub metrics_addr: String,

    /// The number of workers who can pick work off the work queue
    /// concurrently
    #[arg(long, default_value_t = DEFAULT_WORKER_CONCURRENCY)]
    pub worker_concurrency: usize,

    /// The number of reflections that can happen concurrently to
    /// different namespaces
    #[arg(long, default_value_t = DEFAULT_REFLECT_CONCURRENCY)]
    pub reflect_concurrency: usize,

    /// If enabled, secrets that were reflected into other namespaces
    /// will be deleted when the original secret is deleted. Be
    /// absolutely certain this fits your use case before turning it on.
    #[arg(long, default_value_t = false)]
    pub cascade_delete: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Controller tunables carried by these flags
    pub fn reflector_config(&self) -> ReflectorConfig {
        ReflectorConfig {
            worker_concurrency: self.worker_concurrency,
            reflect_concurrency: self.reflect_concurrency,
            retries: self.retries,
            cascade_delete: self.cascade_delete,
        }
    }
}
