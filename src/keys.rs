//! Work queue key codec.
//!
//! Keys take the form `namespace/name` so a single string can identify
//! a Secret across the queue, the store, and log lines.

use k8s_openapi::api::core::v1::Secret;

/// Builds a queue key from a namespace and name.
///
/// Cluster scoped objects have no namespace and key to their bare name.
pub fn key_of(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        return name.to_string();
    }
    format!("{namespace}/{name}")
}

/// Builds a queue key from a Secret's metadata.
///
/// Returns `None` when the object has no name, which the API server
/// never produces for a persisted Secret.
pub fn key_for(secret: &Secret) -> Option<String> {
    let name = secret.metadata.name.as_deref()?;
    let namespace = secret.metadata.namespace.as_deref().unwrap_or_default();
    Some(key_of(namespace, name))
}

/// Splits a queue key into its namespace and name.
///
/// Splits on the first `/`; a key with no separator is a bare name
/// with an empty namespace.
pub fn split_key(key: &str) -> (&str, &str) {
    match key.split_once('/') {
        Some((namespace, name)) => (namespace, name),
        None => ("", key),
    }
}
