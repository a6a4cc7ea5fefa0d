//! Kubernetes API access for the reflector.
//!
//! The reconciler talks to the cluster through the [`ClusterClient`]
//! trait so tests can substitute an in-memory cluster. The real
//! implementation wraps a [`kube::Client`] and maps NotFound responses
//! into the contract the reconciler expects.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::{Client, ResourceExt};

use crate::errors::{is_not_found, Error};

/// Cluster operations the reflector needs.
///
/// NotFound handling is part of the contract: `get_secret` reports a
/// missing secret as `Ok(None)` and `delete_secret` treats NotFound as
/// success. Every other API failure is wrapped in the matching
/// [`Error`] variant.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Fetch a secret, returning `None` when it does not exist
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error>;

    /// Create a secret in the namespace recorded in its metadata
    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<(), Error>;

    /// Replace an existing secret wholesale
    async fn update_secret(&self, namespace: &str, secret: &Secret) -> Result<(), Error>;

    /// Delete a secret; a secret that is already gone is a success
    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// List the names of every namespace in the cluster
    async fn list_namespaces(&self) -> Result<Vec<String>, Error>;
}

/// Real cluster client backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error> {
        match self.secrets(namespace).get(name).await {
            Ok(secret) => Ok(Some(secret)),
            Err(err) if is_not_found(&err) => Ok(None),
            Err(err) => Err(Error::GetSecret(err)),
        }
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<(), Error> {
        self.secrets(namespace)
            .create(&PostParams::default(), secret)
            .await
            .map(|_| ())
            .map_err(Error::CreateSecret)
    }

    async fn update_secret(&self, namespace: &str, secret: &Secret) -> Result<(), Error> {
        let name = secret.name_any();
        self.secrets(namespace)
            .replace(&name, &PostParams::default(), secret)
            .await
            .map(|_| ())
            .map_err(Error::UpdateSecret)
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), Error> {
        match self
            .secrets(namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if is_not_found(&err) => Ok(()),
            Err(err) => Err(Error::DeleteSecret(err)),
        }
    }

    async fn list_namespaces(&self) -> Result<Vec<String>, Error> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let list = namespaces
            .list(&ListParams::default())
            .await
            .map_err(Error::ListNamespaces)?;
        Ok(list.items.iter().map(ResourceExt::name_any).collect())
    }
}
