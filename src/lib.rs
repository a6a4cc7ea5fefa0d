//! # Reflector
//!
//! A Kubernetes controller that syncs opt-in Secrets from a source
//! namespace to other namespaces in the cluster.
//!
//! ## Overview
//!
//! A Secret opts into reflection with the
//! `reflector.havulv.io/reflect: "true"` annotation and names its
//! destinations with `reflector.havulv.io/namespaces` (a comma
//! separated list, or `*` for every namespace). The controller:
//!
//! 1. **Watches Secrets** in the source namespace and funnels every
//!    add, update, and delete into a rate-limited work queue
//! 2. **Reconciles each key** against the destination namespaces with
//!    a bounded fan-out
//! 3. **Stamps each replica** with provenance, ownership, and a
//!    content hash so updates are idempotent and foreign Secrets are
//!    never clobbered
//! 4. **Optionally cascades deletes** of the source Secret to the
//!    replicas it owns
//!
//! ## Ownership
//!
//! A replica carries `reflector.havulv.io/owner: reflector`. The
//! controller only ever writes destination Secrets that either do not
//! exist or carry that marker; anything else is logged and skipped.
//! Ownership is cooperative, not enforced by the cluster.

pub mod annotations;
pub mod cli;
pub mod client;
pub mod constants;
pub mod delete;
pub mod errors;
pub mod fanout;
pub mod keys;
pub mod metrics;
pub mod queue;
pub mod reflect;
pub mod reflector;
pub mod server;
pub mod version;
pub mod watch;

pub use errors::Error;
pub use reflector::{Reflector, ReflectorConfig};
