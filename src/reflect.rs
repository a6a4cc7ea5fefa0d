//! # Reflection
//!
//! The per-namespace replicate operation: fingerprint the source,
//! check the ownership and hash gates on whatever already exists in
//! the destination, and create or update the replica.

use std::collections::BTreeMap;
use std::time::Instant;

use chrono::Utc;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::annotations::{
    can_operate, NAMESPACE_ANNOTATION, REFLECTED_AT_ANNOTATION, REFLECTED_FROM_ANNOTATION,
    REFLECTION_HASH_ANNOTATION, REFLECTION_OWNED, REFLECTION_OWNER_ANNOTATION,
    REFLECT_ANNOTATION,
};
use crate::client::ClusterClient;
use crate::errors::Error;
use crate::fanout::batch_over_namespaces;
use crate::metrics;

/// Stable view of a Secret used for fingerprinting.
///
/// Deliberately excludes anything the API server or this controller
/// mutates on every write (resource version, managed fields,
/// timestamps) so equivalent sources hash identically across
/// controller restarts. Reflection protocol annotations are filtered
/// out because replicas never carry them.
#[derive(Serialize)]
struct FingerprintView<'a> {
    name: &'a str,
    type_: Option<&'a String>,
    labels: Option<&'a BTreeMap<String, String>>,
    annotations: BTreeMap<&'a str, &'a str>,
    data: Option<&'a BTreeMap<String, ByteString>>,
    string_data: Option<&'a BTreeMap<String, String>>,
}

const PROTOCOL_ANNOTATIONS: [&str; 6] = [
    REFLECT_ANNOTATION,
    NAMESPACE_ANNOTATION,
    REFLECTED_FROM_ANNOTATION,
    REFLECTED_AT_ANNOTATION,
    REFLECTION_HASH_ANNOTATION,
    REFLECTION_OWNER_ANNOTATION,
];

/// Computes the content hash of a source Secret.
pub fn fingerprint(secret: &Secret) -> String {
    let annotations = secret
        .metadata
        .annotations
        .iter()
        .flatten()
        .filter(|(key, _)| !PROTOCOL_ANNOTATIONS.contains(&key.as_str()))
        .map(|(key, value)| (key.as_str(), value.as_str()))
        .collect();
    let view = FingerprintView {
        name: secret.metadata.name.as_deref().unwrap_or_default(),
        type_: secret.type_.as_ref(),
        labels: secret.metadata.labels.as_ref(),
        annotations,
        data: secret.data.as_ref(),
        string_data: secret.string_data.as_ref(),
    };
    // BTreeMap fields keep the serialization deterministic
    let serialized =
        serde_json::to_string(&view).expect("secret fingerprint view is always serializable");
    format!("{:x}", Sha256::digest(serialized.as_bytes()))
}

/// Decides whether an existing destination Secret should be written.
///
/// A secret without our hash annotation or without our ownership mark
/// is foreign and is left untouched; a secret whose hash matches the
/// current source needs nothing.
pub fn secret_needs_update(existing: &Secret, hash: &str) -> bool {
    let annotations = existing.metadata.annotations.clone().unwrap_or_default();

    let owned = annotations.contains_key(REFLECTION_HASH_ANNOTATION) && can_operate(&annotations);
    if !owned {
        info!(
            secret = existing.metadata.name.as_deref().unwrap_or_default(),
            "we don't own this secret: not updating"
        );
        return false;
    }

    if annotations.get(REFLECTION_HASH_ANNOTATION).map(String::as_str) == Some(hash) {
        debug!(hash, "no changes to secret, not updating");
        return false;
    }
    true
}

/// Builds the replica of a source Secret for a destination namespace.
///
/// The replica is a wholesale copy with the opt-in and destination
/// annotations stripped (so replicas never replicate transitively) and
/// the provenance, hash, and ownership annotations set.
pub fn build_replica(source: &Secret, hash: &str, namespace: &str) -> Secret {
    let mut annotations = source.metadata.annotations.clone().unwrap_or_default();
    annotations.remove(REFLECT_ANNOTATION);
    annotations.remove(NAMESPACE_ANNOTATION);
    annotations.insert(
        REFLECTED_FROM_ANNOTATION.to_string(),
        source.metadata.namespace.clone().unwrap_or_default(),
    );
    annotations.insert(
        REFLECTED_AT_ANNOTATION.to_string(),
        Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default()
            .to_string(),
    );
    annotations.insert(REFLECTION_HASH_ANNOTATION.to_string(), hash.to_string());
    annotations.insert(
        REFLECTION_OWNER_ANNOTATION.to_string(),
        REFLECTION_OWNED.to_string(),
    );

    Secret {
        metadata: ObjectMeta {
            name: source.metadata.name.clone(),
            namespace: Some(namespace.to_string()),
            labels: source.metadata.labels.clone(),
            annotations: Some(annotations),
            ..ObjectMeta::default()
        },
        data: source.data.clone(),
        string_data: source.string_data.clone(),
        type_: source.type_.clone(),
        immutable: source.immutable,
    }
}

/// Reflects a source Secret into every destination namespace with a
/// bounded fan-out, surfacing the first error.
pub async fn reflect_to_namespaces(
    client: &dyn ClusterClient,
    source: &Secret,
    namespaces: &[String],
    concurrency: usize,
) -> Result<(), Error> {
    if namespaces.is_empty() {
        info!("no namespaces in annotation, skipping");
        return Ok(());
    }

    let secret_name = source.metadata.name.clone().unwrap_or_default();
    let start = Instant::now();
    let hash = fingerprint(source);

    let result = batch_over_namespaces(concurrency, namespaces, |namespace| {
        let hash = hash.clone();
        async move { reflect_one(client, source, &hash, &namespace).await }
    })
    .await;

    metrics::observe_reflection_latency(&secret_name, start.elapsed().as_secs_f64());
    result
}

/// Reflects the source Secret into one destination namespace.
async fn reflect_one(
    client: &dyn ClusterClient,
    source: &Secret,
    hash: &str,
    namespace: &str,
) -> Result<(), Error> {
    let secret_name = source.metadata.name.clone().unwrap_or_default();
    let start = Instant::now();
    let result = reflect(client, source, hash, namespace).await;
    metrics::observe_reflect_latency(&secret_name, namespace, start.elapsed().as_secs_f64());
    result
}

async fn reflect(
    client: &dyn ClusterClient,
    source: &Secret,
    hash: &str,
    namespace: &str,
) -> Result<(), Error> {
    let name = source.metadata.name.as_deref().unwrap_or_default();

    let existing = client.get_secret(namespace, name).await?;
    let exists = existing.is_some();
    if let Some(existing) = existing {
        if !secret_needs_update(&existing, hash) {
            return Ok(());
        }
    }

    debug!(
        create = !exists,
        update = exists,
        secret = name,
        namespace,
        "performing action for reflected secret"
    );
    create_or_update(client, build_replica(source, hash, namespace), exists).await
}

/// Writes a replica, recording the attempt and its outcome.
async fn create_or_update(
    client: &dyn ClusterClient,
    replica: Secret,
    exists: bool,
) -> Result<(), Error> {
    let name = replica.metadata.name.clone().unwrap_or_default();
    let namespace = replica.metadata.namespace.clone().unwrap_or_default();
    let action = if exists { "update" } else { "create" };

    let result = if exists {
        client.update_secret(&namespace, &replica).await
    } else {
        client.create_secret(&namespace, &replica).await
    };

    metrics::record_reflection(action, &name, result.is_ok(), &namespace);
    result
}
