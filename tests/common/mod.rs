//! Common test utilities for reflector integration tests.
//!
//! Provides an in-memory cluster implementing [`ClusterClient`] plus
//! builders for Secrets, so reconciliation scenarios run without a
//! real API server.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use kube::error::ErrorResponse;

use reflector::client::ClusterClient;
use reflector::errors::Error;

/// A write observed by the fake cluster, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Create { namespace: String, name: String },
    Update { namespace: String, name: String },
    Delete { namespace: String, name: String },
}

/// In-memory cluster with injectable failures.
///
/// Any operation touching a namespace listed in `fail_namespaces`
/// returns a 500, mimicking a flaky API server.
#[derive(Default)]
pub struct FakeCluster {
    pub namespaces: Mutex<Vec<String>>,
    secrets: Mutex<HashMap<(String, String), Secret>>,
    fail_namespaces: Mutex<HashSet<String>>,
    fail_list: Mutex<bool>,
    ops: Mutex<Vec<Op>>,
}

impl FakeCluster {
    pub fn new(namespaces: &[&str]) -> Self {
        Self {
            namespaces: Mutex::new(namespaces.iter().map(|ns| ns.to_string()).collect()),
            ..Self::default()
        }
    }

    pub fn insert(&self, secret: Secret) {
        let namespace = secret.metadata.namespace.clone().unwrap_or_default();
        let name = secret.metadata.name.clone().unwrap_or_default();
        self.secrets
            .lock()
            .unwrap()
            .insert((namespace, name), secret);
    }

    pub fn get(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.secrets
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn fail_namespace(&self, namespace: &str) {
        self.fail_namespaces
            .lock()
            .unwrap()
            .insert(namespace.to_string());
    }

    pub fn fail_namespace_list(&self) {
        *self.fail_list.lock().unwrap() = true;
    }

    pub fn ops(&self) -> Vec<Op> {
        self.ops.lock().unwrap().clone()
    }

    pub fn writes_to(&self, namespace: &str) -> usize {
        self.ops()
            .iter()
            .filter(|op| match op {
                Op::Create { namespace: ns, .. }
                | Op::Update { namespace: ns, .. }
                | Op::Delete { namespace: ns, .. } => ns == namespace,
            })
            .count()
    }

    fn check_failure(&self, namespace: &str) -> Result<(), kube::Error> {
        if self.fail_namespaces.lock().unwrap().contains(namespace) {
            return Err(server_error());
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error> {
        self.check_failure(namespace).map_err(Error::GetSecret)?;
        Ok(self.get(namespace, name))
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<(), Error> {
        self.check_failure(namespace).map_err(Error::CreateSecret)?;
        let name = secret.metadata.name.clone().unwrap_or_default();
        self.ops.lock().unwrap().push(Op::Create {
            namespace: namespace.to_string(),
            name,
        });
        self.insert(secret.clone());
        Ok(())
    }

    async fn update_secret(&self, namespace: &str, secret: &Secret) -> Result<(), Error> {
        self.check_failure(namespace).map_err(Error::UpdateSecret)?;
        let name = secret.metadata.name.clone().unwrap_or_default();
        self.ops.lock().unwrap().push(Op::Update {
            namespace: namespace.to_string(),
            name,
        });
        self.insert(secret.clone());
        Ok(())
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), Error> {
        self.check_failure(namespace).map_err(Error::DeleteSecret)?;
        let removed = self
            .secrets
            .lock()
            .unwrap()
            .remove(&(namespace.to_string(), name.to_string()));
        // NotFound is success and is not recorded as a write
        if removed.is_some() {
            self.ops.lock().unwrap().push(Op::Delete {
                namespace: namespace.to_string(),
                name: name.to_string(),
            });
        }
        Ok(())
    }

    async fn list_namespaces(&self) -> Result<Vec<String>, Error> {
        if *self.fail_list.lock().unwrap() {
            return Err(Error::ListNamespaces(server_error()));
        }
        Ok(self.namespaces.lock().unwrap().clone())
    }
}

/// Event source that never produces events on its own; tests drive the
/// store and queue directly.
pub struct ManualSource;

impl reflector::watch::EventSource for ManualSource {
    fn spawn(&self, cancel: tokio_util::sync::CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { cancel.cancelled().await })
    }
}

fn server_error() -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".into(),
        message: "internal error".into(),
        reason: "InternalError".into(),
        code: 500,
    })
}

/// Builds a Secret with string annotations and a byte payload.
pub fn secret(
    namespace: &str,
    name: &str,
    annotations: &[(&str, &str)],
    data: &[(&str, &str)],
) -> Secret {
    let annotations: BTreeMap<String, String> = annotations
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let data: BTreeMap<String, ByteString> = data
        .iter()
        .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
        .collect();
    Secret {
        metadata: ObjectMeta {
            name: Some(name.into()),
            namespace: Some(namespace.into()),
            annotations: (!annotations.is_empty()).then_some(annotations),
            ..ObjectMeta::default()
        },
        data: (!data.is_empty()).then_some(data),
        type_: Some("Opaque".into()),
        ..Secret::default()
    }
}

/// Reads an annotation off a Secret.
pub fn annotation(secret: &Secret, key: &str) -> Option<String> {
    secret.metadata.annotations.as_ref()?.get(key).cloned()
}
