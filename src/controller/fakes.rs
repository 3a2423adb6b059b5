//! In-process stand-ins for the cluster and registry used by controller tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{LocalObjectReference, Secret, ServiceAccount};
use kube::api::ObjectMeta;
use parking_lot::Mutex;

use super::secrets::ObjectSource;
use crate::error::{Error, Result};
use crate::registry::{ImageReference, RegistryClient, ScanOptions};

#[derive(Default)]
pub struct FakeObjects {
    pub secrets: HashMap<String, Secret>,
    pub accounts: HashMap<String, ServiceAccount>,
    pub secret_fetches: AtomicUsize,
}

impl FakeObjects {
    pub fn with_secret(mut self, secret: Secret) -> Self {
        let name = secret.metadata.name.clone().unwrap_or_default();
        self.secrets.insert(name, secret);
        self
    }

    pub fn with_service_account(mut self, name: &str, pull_secrets: &[&str]) -> Self {
        let account = ServiceAccount {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("apps".to_string()),
                ..Default::default()
            },
            image_pull_secrets: Some(
                pull_secrets
                    .iter()
                    .map(|s| LocalObjectReference {
                        name: Some(s.to_string()),
                    })
                    .collect(),
            ),
            ..Default::default()
        };
        self.accounts.insert(name.to_string(), account);
        self
    }

    pub fn fetches(&self) -> usize {
        self.secret_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectSource for FakeObjects {
    async fn secret(&self, namespace: &str, name: &str) -> Result<Secret> {
        self.secret_fetches.fetch_add(1, Ordering::SeqCst);
        self.secrets.get(name).cloned().ok_or_else(|| Error::NotFound {
            kind: "Secret",
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }

    async fn service_account(&self, namespace: &str, name: &str) -> Result<ServiceAccount> {
        self.accounts.get(name).cloned().ok_or_else(|| Error::NotFound {
            kind: "ServiceAccount",
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }
}

/// Registry answering from a fixed tag list, or with a fixed failure
pub struct FakeRegistry {
    pub tags: Vec<String>,
    pub fail_status: Option<u16>,
    pub delay: Option<Duration>,
    pub calls: AtomicUsize,
    pub last_options: Mutex<Option<ScanOptions>>,
}

impl FakeRegistry {
    pub fn with_tags(tags: &[&str]) -> Self {
        Self {
            tags: tags.iter().map(|t| t.to_string()).collect(),
            fail_status: None,
            delay: None,
            calls: AtomicUsize::new(0),
            last_options: Mutex::new(None),
        }
    }

    pub fn failing(status: u16) -> Self {
        Self {
            fail_status: Some(status),
            ..Self::with_tags(&[])
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::with_tags(&["v1"])
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RegistryClient for FakeRegistry {
    async fn list_tags(
        &self,
        reference: &ImageReference,
        options: &ScanOptions,
    ) -> Result<Vec<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_options.lock() = Some(options.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(status) = self.fail_status {
            return Err(Error::RegistryStatus {
                registry: reference.registry().to_string(),
                status,
                message: "unavailable".to_string(),
            });
        }
        Ok(self.tags.clone())
    }
}
