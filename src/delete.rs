//! # Cascade delete
//!
//! When a source Secret is deleted and cascade delete is enabled, the
//! replicas it left behind are removed. Only namespaces holding a
//! replica this controller owns are ever targeted.

use k8s_openapi::api::core::v1::Secret;
use tracing::{debug, info};

use crate::annotations::can_operate;
use crate::client::ClusterClient;
use crate::errors::Error;
use crate::fanout::batch_over_namespaces;

/// Deletes the named secret from every given namespace with a bounded
/// fan-out. A replica that is already gone counts as deleted.
pub async fn cascade_delete(
    client: &dyn ClusterClient,
    name: &str,
    namespaces: &[String],
    concurrency: usize,
) -> Result<(), Error> {
    if namespaces.is_empty() {
        info!("no namespaces, skipping");
        return Ok(());
    }

    batch_over_namespaces(concurrency, namespaces, |namespace| async move {
        debug!(secret = name, %namespace, "deleting reflected secret");
        client.delete_secret(&namespace, name).await
    })
    .await
}

/// Scans the cluster for namespaces holding an owned replica of the
/// named secret. Namespaces without the secret, and namespaces whose
/// copy is foreign, are excluded.
pub async fn find_existing_secret_namespaces(
    client: &dyn ClusterClient,
    name: &str,
) -> Result<Vec<String>, Error> {
    let mut namespaces = Vec::new();
    for namespace in client.list_namespaces().await? {
        let Some(found) = client.get_secret(&namespace, name).await? else {
            continue;
        };
        if owned(&found) {
            namespaces.push(namespace);
        }
    }
    Ok(namespaces)
}

fn owned(secret: &Secret) -> bool {
    secret
        .metadata
        .annotations
        .as_ref()
        .is_some_and(can_operate)
}
