//! Cloud provider auto-login
//!
//! [`LoginManager`] recognises registries hosted by AWS (ECR), Google (GCR and
//! Artifact Registry) and Azure (ACR) and asks the matching
//! [`CredentialProvider`] for short-lived credentials. Each provider must be
//! enabled explicitly through [`ProviderOptions`].

mod gcp;

pub use gcp::GcpMetadataProvider;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use super::{Authenticator, ImageReference};
use crate::error::Result;

static ECR_HOST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(\d{12})\.dkr\.ecr(-fips)?\.([a-zA-Z0-9][a-zA-Z0-9-_]*)\.(amazonaws\.com(\.cn)?|sc2s\.sgov\.gov|c2s\.ic\.gov)$",
    )
    .expect("static ECR host pattern")
});

const ACR_SUFFIXES: [&str; 4] = [".azurecr.io", ".azurecr.cn", ".azurecr.de", ".azurecr.us"];

/// Cloud that hosts a registry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Aws,
    Gcp,
    Azure,
}

impl ProviderKind {
    /// Provider hosting `registry`, if any
    pub fn detect(registry: &str) -> Option<Self> {
        let host = registry.split(':').next().unwrap_or(registry);
        if ECR_HOST.is_match(host) {
            Some(ProviderKind::Aws)
        } else if host == "gcr.io"
            || host.ends_with(".gcr.io")
            || host.ends_with("-docker.pkg.dev")
        {
            Some(ProviderKind::Gcp)
        } else if ACR_SUFFIXES.iter().any(|suffix| host.ends_with(suffix)) {
            Some(ProviderKind::Azure)
        } else {
            None
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProviderKind::Aws => "aws",
            ProviderKind::Gcp => "gcp",
            ProviderKind::Azure => "azure",
        })
    }
}

/// Which providers may be used for auto-login
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProviderOptions {
    pub aws_auto_login: bool,
    pub gcp_auto_login: bool,
    pub azure_auto_login: bool,
}

impl ProviderOptions {
    fn enabled(&self, kind: ProviderKind) -> bool {
        match kind {
            ProviderKind::Aws => self.aws_auto_login,
            ProviderKind::Gcp => self.gcp_auto_login,
            ProviderKind::Azure => self.azure_auto_login,
        }
    }
}

/// Obtains registry credentials from a cloud identity
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn login(&self, image: &str, reference: &ImageReference) -> Result<Authenticator>;
}

/// Dispatches auto-login to the provider hosting the registry
#[derive(Clone, Default)]
pub struct LoginManager {
    options: ProviderOptions,
    providers: HashMap<ProviderKind, Arc<dyn CredentialProvider>>,
}

impl fmt::Debug for LoginManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginManager")
            .field("options", &self.options)
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl LoginManager {
    pub fn new(options: ProviderOptions) -> Self {
        Self {
            options,
            providers: HashMap::new(),
        }
    }

    /// Register the provider used for `kind`
    pub fn with_provider(
        mut self,
        kind: ProviderKind,
        provider: Arc<dyn CredentialProvider>,
    ) -> Self {
        self.providers.insert(kind, provider);
        self
    }

    pub fn options(&self) -> ProviderOptions {
        self.options
    }

    /// Credentials for `reference`, or `None` to proceed anonymously
    pub async fn login(
        &self,
        image: &str,
        reference: &ImageReference,
    ) -> Result<Option<Authenticator>> {
        let Some(kind) = ProviderKind::detect(reference.registry()) else {
            return Ok(None);
        };
        if !self.options.enabled(kind) {
            debug!(
                provider = %kind,
                registry = reference.registry(),
                "Auto-login disabled for provider"
            );
            return Ok(None);
        }
        let Some(provider) = self.providers.get(&kind) else {
            warn!(
                provider = %kind,
                registry = reference.registry(),
                "Auto-login enabled but no provider is configured"
            );
            return Ok(None);
        };
        provider.login(image, reference).await.map(Some)
    }
}
