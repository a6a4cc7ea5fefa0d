//! Error types for the reflector.

use thiserror::Error;

/// Main error type for reflection operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Failed to fetch a secret from a destination namespace
    #[error("error while getting reflected secret: {0}")]
    GetSecret(#[source] kube::Error),

    /// Failed to create a replica in a destination namespace
    #[error("error while creating secret: {0}")]
    CreateSecret(#[source] kube::Error),

    /// Failed to update a replica in a destination namespace
    #[error("error while updating secret: {0}")]
    UpdateSecret(#[source] kube::Error),

    /// Failed to delete a replica from a destination namespace
    #[error("error while removing secret from namespace: {0}")]
    DeleteSecret(#[source] kube::Error),

    /// Failed to list the namespaces in the cluster
    #[error("unable to list namespaces: {0}")]
    ListNamespaces(#[source] kube::Error),

    /// A fan-out batch surfaced an error from one of its members
    #[error("received error in concurrency batch: {0}")]
    Batch(#[source] Box<Error>),

    /// The watch cache did not sync before the controller was stopped
    #[error("timed out waiting for caches to sync")]
    CacheSync,
}

/// Checks whether a Kubernetes API error is a NotFound response.
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 404)
}
