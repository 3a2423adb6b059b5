//! Credential and transport resolution for a scan
//!
//! The sources are consulted in a fixed order and each one either applies,
//! does not apply, or fails the whole resolution:
//!
//! 1. `secretRef`: credentials from an explicit pull secret. When absent,
//!    cloud auto-login is tried for the registry instead.
//! 2. `certSecretRef`: client certificate and CA roots. The pull secret is
//!    reused when both references name the same Secret.
//! 3. `serviceAccountName`: the account's image pull secrets form a keychain
//!    that takes precedence over the single authenticator from step 1.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use tracing::debug;

use super::secrets::ObjectSource;
use crate::crd::ImageRepositorySpec;
use crate::error::Result;
use crate::registry::login::LoginManager;
use crate::registry::{
    auth_from_secret, Authenticator, ImageReference, Keychain, ScanOptions, Transport,
};

#[derive(Clone)]
pub struct CredentialResolver {
    objects: Arc<dyn ObjectSource>,
    login: LoginManager,
}

impl CredentialResolver {
    pub fn new(objects: Arc<dyn ObjectSource>, login: LoginManager) -> Self {
        Self { objects, login }
    }

    /// Scan options for `reference` in the repository's namespace
    pub async fn resolve(
        &self,
        namespace: &str,
        spec: &ImageRepositorySpec,
        reference: &ImageReference,
    ) -> Result<ScanOptions> {
        let (auth, pull_secret) = self.authenticator(namespace, spec, reference).await?;
        let transport = self.transport(namespace, spec, pull_secret.as_ref()).await?;
        let keychain = self.keychain(namespace, spec).await?;

        Ok(ScanOptions {
            auth,
            keychain,
            transport,
        })
    }

    async fn authenticator(
        &self,
        namespace: &str,
        spec: &ImageRepositorySpec,
        reference: &ImageReference,
    ) -> Result<(Option<Authenticator>, Option<Secret>)> {
        match &spec.secret_ref {
            Some(secret_ref) => {
                let secret = self.objects.secret(namespace, &secret_ref.name).await?;
                let auth = auth_from_secret(&secret, reference)?;
                Ok((auth, Some(secret)))
            }
            None => Ok((self.login.login(&spec.image, reference).await?, None)),
        }
    }

    async fn transport(
        &self,
        namespace: &str,
        spec: &ImageRepositorySpec,
        pull_secret: Option<&Secret>,
    ) -> Result<Option<Transport>> {
        let Some(cert_ref) = &spec.cert_secret_ref else {
            return Ok(None);
        };

        let transport = match pull_secret.filter(|s| s.name_any() == cert_ref.name) {
            Some(shared) => Transport::from_secret(shared)?,
            None => {
                let secret = self.objects.secret(namespace, &cert_ref.name).await?;
                Transport::from_secret(&secret)?
            }
        };
        debug!(
            secret = %cert_ref.name,
            client_identity = transport.has_client_identity(),
            extra_roots = transport.extra_roots(),
            "Resolved registry TLS transport"
        );
        Ok(Some(transport))
    }

    async fn keychain(
        &self,
        namespace: &str,
        spec: &ImageRepositorySpec,
    ) -> Result<Option<Keychain>> {
        let account_name = spec.service_account_name.as_deref();
        let Some(account_name) = account_name.filter(|n| !n.is_empty()) else {
            return Ok(None);
        };

        let account = self.objects.service_account(namespace, account_name).await?;
        let mut secrets = Vec::new();
        for reference in account.image_pull_secrets.unwrap_or_default() {
            let Some(name) = reference.name.filter(|n| !n.is_empty()) else {
                continue;
            };
            secrets.push(self.objects.secret(namespace, &name).await?);
        }

        if secrets.is_empty() {
            return Ok(None);
        }
        Ok(Some(Keychain::from_pull_secrets(&secrets)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::fakes::FakeObjects;
    use crate::crd::LocalObjectReference;
    use crate::error::Error;
    use crate::registry::{parse_image_reference, pull_secret, CA_CERT_KEY};
    use k8s_openapi::ByteString;

    fn spec(image: &str) -> ImageRepositorySpec {
        ImageRepositorySpec {
            image: image.to_string(),
            interval: "5m".to_string(),
            timeout: None,
            secret_ref: None,
            cert_secret_ref: None,
            service_account_name: None,
            exclusion_list: vec![],
            suspend: false,
        }
    }

    fn local(name: &str) -> Option<LocalObjectReference> {
        Some(LocalObjectReference {
            name: name.to_string(),
        })
    }

    fn resolver(objects: Arc<FakeObjects>) -> CredentialResolver {
        CredentialResolver::new(objects, LoginManager::default())
    }

    fn ca_pem() -> String {
        rcgen::generate_simple_self_signed(vec!["registry.local".to_string()])
            .unwrap()
            .cert
            .pem()
    }

    #[tokio::test]
    async fn test_no_references_is_anonymous() {
        let objects = Arc::new(FakeObjects::default());
        let spec = spec("ghcr.io/org/app");
        let reference = parse_image_reference(&spec.image).unwrap();

        let options = resolver(objects.clone()).resolve("apps", &spec, &reference).await.unwrap();
        assert!(options.auth.is_none());
        assert!(options.keychain.is_none());
        assert!(options.transport.is_none());
        assert_eq!(objects.fetches(), 0);
    }

    #[tokio::test]
    async fn test_pull_secret_credentials() {
        let objects = Arc::new(FakeObjects::default().with_secret(pull_secret(
            "creds",
            serde_json::json!({"ghcr.io": {"username": "bot", "password": "s3cret"}}),
        )));
        let mut spec = spec("ghcr.io/org/app");
        spec.secret_ref = local("creds");
        let reference = parse_image_reference(&spec.image).unwrap();

        let options = resolver(objects).resolve("apps", &spec, &reference).await.unwrap();
        assert_eq!(
            options.auth,
            Some(Authenticator::Basic {
                username: "bot".to_string(),
                password: "s3cret".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_pull_secret_without_registry_entry() {
        let objects = Arc::new(FakeObjects::default().with_secret(pull_secret(
            "creds",
            serde_json::json!({"quay.io": {"username": "bot", "password": "p"}}),
        )));
        let mut spec = spec("ghcr.io/org/app");
        spec.secret_ref = local("creds");
        let reference = parse_image_reference(&spec.image).unwrap();

        let err = resolver(objects).resolve("apps", &spec, &reference).await.unwrap_err();
        assert!(matches!(err, Error::CredentialsNotFound { .. }));
        assert!(!err.is_retriable());
    }

    #[tokio::test]
    async fn test_missing_secret_is_not_found() {
        let objects = Arc::new(FakeObjects::default());
        let mut spec = spec("ghcr.io/org/app");
        spec.secret_ref = local("missing");
        let reference = parse_image_reference(&spec.image).unwrap();

        let err = resolver(objects).resolve("apps", &spec, &reference).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "Secret", .. }));
    }

    #[tokio::test]
    async fn test_shared_secret_is_fetched_once() {
        let mut secret = pull_secret(
            "registry",
            serde_json::json!({"registry.local": {"username": "u", "password": "p"}}),
        );
        secret
            .data
            .as_mut()
            .unwrap()
            .insert(CA_CERT_KEY.to_string(), ByteString(ca_pem().into_bytes()));
        let objects = Arc::new(FakeObjects::default().with_secret(secret));

        let mut spec = spec("registry.local/team/app");
        spec.secret_ref = local("registry");
        spec.cert_secret_ref = local("registry");
        let reference = parse_image_reference(&spec.image).unwrap();

        let options = resolver(objects.clone()).resolve("apps", &spec, &reference).await.unwrap();
        assert!(options.auth.is_some());
        assert_eq!(options.transport.map(|t| t.extra_roots()), Some(1));
        assert_eq!(objects.fetches(), 1);
    }

    #[tokio::test]
    async fn test_separate_cert_secret() {
        let tls = Secret {
            metadata: kube::api::ObjectMeta {
                name: Some("tls".to_string()),
                namespace: Some("apps".to_string()),
                ..Default::default()
            },
            data: Some(std::collections::BTreeMap::from([(
                CA_CERT_KEY.to_string(),
                ByteString(ca_pem().into_bytes()),
            )])),
            ..Default::default()
        };
        let objects = Arc::new(FakeObjects::default().with_secret(tls));
        let mut spec = spec("registry.local/team/app");
        spec.cert_secret_ref = local("tls");
        let reference = parse_image_reference(&spec.image).unwrap();

        let options = resolver(objects.clone()).resolve("apps", &spec, &reference).await.unwrap();
        assert!(options.auth.is_none());
        assert!(options.transport.is_some());
        assert_eq!(objects.fetches(), 1);
    }

    #[tokio::test]
    async fn test_service_account_keychain() {
        let objects = Arc::new(
            FakeObjects::default()
                .with_secret(pull_secret(
                    "sa-pull",
                    serde_json::json!({"ghcr.io": {"username": "sa", "password": "p"}}),
                ))
                .with_secret(pull_secret(
                    "explicit",
                    serde_json::json!({"ghcr.io": {"username": "explicit", "password": "p"}}),
                ))
                .with_service_account("builder", &["sa-pull"]),
        );
        let mut spec = spec("ghcr.io/org/app");
        spec.secret_ref = local("explicit");
        spec.service_account_name = Some("builder".to_string());
        let reference = parse_image_reference(&spec.image).unwrap();

        let options = resolver(objects).resolve("apps", &spec, &reference).await.unwrap();
        assert!(options.keychain.is_some());
        assert!(matches!(
            options.credentials_for("ghcr.io"),
            Some(Authenticator::Basic { username, .. }) if username == "sa"
        ));
    }

    #[tokio::test]
    async fn test_service_account_without_pull_secrets() {
        let objects = Arc::new(FakeObjects::default().with_service_account("default", &[]));
        let mut spec = spec("ghcr.io/org/app");
        spec.service_account_name = Some("default".to_string());
        let reference = parse_image_reference(&spec.image).unwrap();

        let options = resolver(objects).resolve("apps", &spec, &reference).await.unwrap();
        assert!(options.keychain.is_none());
    }

    #[tokio::test]
    async fn test_missing_service_account() {
        let objects = Arc::new(FakeObjects::default());
        let mut spec = spec("ghcr.io/org/app");
        spec.service_account_name = Some("ghost".to_string());
        let reference = parse_image_reference(&spec.image).unwrap();

        let err = resolver(objects).resolve("apps", &spec, &reference).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "ServiceAccount", .. }));
    }
}
