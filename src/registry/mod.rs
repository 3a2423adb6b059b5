//! Container registry access
//!
//! Reference parsing, credentials, TLS transport and tag listing. Cloud
//! auto-login lives in [`login`].

mod auth;
mod http;
pub mod login;
mod reference;
mod transport;

pub use auth::{
    auth_from_secret, get_url_host, parse_pull_secret, AuthConfig, Authenticator, Keychain,
    DOCKER_CFG_KEY, DOCKER_CFG_TYPE, DOCKER_CONFIG_JSON_KEY, DOCKER_CONFIG_JSON_TYPE,
};
pub use http::HttpRegistryClient;
pub use reference::{parse_image_reference, ImageReference, DEFAULT_REGISTRY};
pub use transport::{Transport, CA_CERT_KEY, CLIENT_CERT_KEY, CLIENT_KEY_KEY};

#[cfg(test)]
pub(crate) use auth::tests::pull_secret;

use async_trait::async_trait;

use crate::error::Result;

/// Everything needed to talk to one registry for one scan
#[derive(Clone, Debug, Default)]
pub struct ScanOptions {
    /// Single authenticator from a pull secret or cloud login
    pub auth: Option<Authenticator>,
    /// Service-account pull secrets; when set, it alone decides the credentials
    pub keychain: Option<Keychain>,
    pub transport: Option<Transport>,
}

impl ScanOptions {
    /// Credentials to present to `registry`
    pub fn credentials_for(&self, registry: &str) -> Option<&Authenticator> {
        match &self.keychain {
            Some(keychain) => keychain.resolve(registry),
            None => self.auth.as_ref(),
        }
    }
}

/// Tag listing capability
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// All tags of the repository, in the order the registry reports them
    async fn list_tags(
        &self,
        reference: &ImageReference,
        options: &ScanOptions,
    ) -> Result<Vec<String>>;
}
