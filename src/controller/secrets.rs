//! Lookup of the Secrets and ServiceAccounts an ImageRepository references

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use kube::{api::Api, client::Client};

use crate::error::{Error, Result};

/// Read access to referenced core objects
///
/// A missing object is reported as [`Error::NotFound`].
#[async_trait]
pub trait ObjectSource: Send + Sync {
    async fn secret(&self, namespace: &str, name: &str) -> Result<Secret>;

    async fn service_account(&self, namespace: &str, name: &str) -> Result<ServiceAccount>;
}

/// [`ObjectSource`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeObjectSource {
    client: Client,
}

impl KubeObjectSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectSource for KubeObjectSource {
    async fn secret(&self, namespace: &str, name: &str) -> Result<Secret> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .map_err(|e| Error::from_kube(e, "Secret", namespace, name))
    }

    async fn service_account(&self, namespace: &str, name: &str) -> Result<ServiceAccount> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .map_err(|e| Error::from_kube(e, "ServiceAccount", namespace, name))
    }
}
