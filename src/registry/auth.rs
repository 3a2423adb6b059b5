//! Registry credentials
//!
//! Pull secrets carry a Docker config document. Its keys are registry URLs in
//! whatever form users wrote them (`https://index.docker.io/v1/`,
//! `ghcr.io`, `10.0.0.1:5000`), so every key is reduced to `host[:port]`
//! before lookup.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use serde::Deserialize;

use super::reference::{ImageReference, DEFAULT_REGISTRY};
use crate::error::{Error, Result};

pub const DOCKER_CONFIG_JSON_TYPE: &str = "kubernetes.io/dockerconfigjson";
pub const DOCKER_CONFIG_JSON_KEY: &str = ".dockerconfigjson";
pub const DOCKER_CFG_TYPE: &str = "kubernetes.io/dockercfg";
pub const DOCKER_CFG_KEY: &str = ".dockercfg";

/// Hosts that all mean Docker Hub
const DOCKER_HUB_HOSTS: [&str; 3] = [DEFAULT_REGISTRY, "docker.io", "registry-1.docker.io"];

/// One entry of a Docker config `auths` map
#[derive(Clone, Default, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// base64 of `username:password`
    #[serde(default)]
    pub auth: String,
    #[serde(default, rename = "identitytoken")]
    pub identity_token: String,
    #[serde(default, rename = "registrytoken")]
    pub registry_token: String,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default, Deserialize)]
struct DockerConfig {
    #[serde(default)]
    auths: HashMap<String, AuthConfig>,
}

/// Credentials presented to a registry
#[derive(Clone, PartialEq, Eq)]
pub enum Authenticator {
    Basic { username: String, password: String },
    /// A ready-made registry token, sent as-is
    Bearer(String),
}

impl fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Authenticator::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .finish_non_exhaustive(),
            Authenticator::Bearer(_) => f.write_str("Bearer(..)"),
        }
    }
}

impl Authenticator {
    /// Credentials described by a config entry; `None` when the entry is empty
    ///
    /// An identity token is exchanged as the password of a basic login, which
    /// is what token services issuing them accept.
    pub fn from_config(config: &AuthConfig) -> Result<Option<Self>> {
        if !config.registry_token.is_empty() {
            return Ok(Some(Authenticator::Bearer(config.registry_token.clone())));
        }
        if !config.identity_token.is_empty() {
            let username = if config.username.is_empty() {
                "<token>".to_string()
            } else {
                config.username.clone()
            };
            return Ok(Some(Authenticator::Basic {
                username,
                password: config.identity_token.clone(),
            }));
        }
        if !config.username.is_empty() || !config.password.is_empty() {
            return Ok(Some(Authenticator::Basic {
                username: config.username.clone(),
                password: config.password.clone(),
            }));
        }
        if !config.auth.is_empty() {
            let decoded = BASE64
                .decode(config.auth.trim())
                .map_err(|e| Error::ConfigError(format!("auth field is not valid base64: {e}")))?;
            let decoded = String::from_utf8(decoded)
                .map_err(|_| Error::ConfigError("auth field is not valid UTF-8".to_string()))?;
            let (username, password) = decoded.split_once(':').ok_or_else(|| {
                Error::ConfigError("auth field must have the form username:password".to_string())
            })?;
            return Ok(Some(Authenticator::Basic {
                username: username.to_string(),
                password: password.to_string(),
            }));
        }
        Ok(None)
    }
}

/// Reduce a Docker config key to `host[:port]`
pub fn get_url_host(key: &str) -> Result<String> {
    if key == "http://" || key == "https://" {
        return Err(Error::InvalidRegistryKey {
            key: key.to_string(),
            message: "empty url".to_string(),
        });
    }

    let with_scheme = if key.starts_with("http://") || key.starts_with("https://") {
        key.to_string()
    } else {
        format!("https://{key}/")
    };

    let invalid = |message: String| Error::InvalidRegistryKey {
        key: key.to_string(),
        message,
    };
    let parsed = url::Url::parse(&with_scheme).map_err(|e| {
        invalid(format!(
            "{e}; expected an HTTPS URL (e.g. 'https://index.docker.io/v2/' or 'https://index.docker.io'), or the same without the 'https://'"
        ))
    })?;

    let host = parsed
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| invalid("the URL has no host".to_string()))?;

    Ok(match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

/// Candidate lookup keys for a registry, Docker Hub aliases included
fn lookup_hosts(registry: &str) -> Vec<&str> {
    if DOCKER_HUB_HOSTS.contains(&registry) {
        DOCKER_HUB_HOSTS.to_vec()
    } else {
        vec![registry]
    }
}

/// Secret name for error messages, never its content
fn secret_ident(secret: &Secret) -> (String, String) {
    (
        secret.namespace().unwrap_or_default(),
        secret.name_any(),
    )
}

fn invalid_secret(secret: &Secret, message: impl Into<String>) -> Error {
    let (namespace, name) = secret_ident(secret);
    Error::InvalidSecret {
        namespace,
        name,
        message: message.into(),
    }
}

/// Normalised `host -> credentials` map of a pull secret
pub fn parse_pull_secret(secret: &Secret) -> Result<BTreeMap<String, AuthConfig>> {
    let secret_type = secret.type_.as_deref().unwrap_or_default();
    let data = |key: &str| {
        secret
            .data
            .as_ref()
            .and_then(|d| d.get(key))
            .map(|b| b.0.as_slice())
            .ok_or_else(|| invalid_secret(secret, format!("missing key {key:?}")))
    };

    let auths = match secret_type {
        DOCKER_CONFIG_JSON_TYPE => {
            let config: DockerConfig = serde_json::from_slice(data(DOCKER_CONFIG_JSON_KEY)?)
                .map_err(|e| invalid_secret(secret, format!("malformed docker config: {e}")))?;
            config.auths
        }
        DOCKER_CFG_TYPE => serde_json::from_slice(data(DOCKER_CFG_KEY)?)
            .map_err(|e| invalid_secret(secret, format!("malformed docker config: {e}")))?,
        other => return Err(invalid_secret(secret, format!("unknown secret type {other:?}"))),
    };

    let mut normalised = BTreeMap::new();
    for (key, entry) in auths {
        normalised.insert(get_url_host(&key)?, entry);
    }
    Ok(normalised)
}

/// Credentials for `reference` from an explicit pull secret
///
/// A secret without an entry for the registry is an error naming both.
pub fn auth_from_secret(
    secret: &Secret,
    reference: &ImageReference,
) -> Result<Option<Authenticator>> {
    let auths = parse_pull_secret(secret)?;
    let entry = lookup_hosts(reference.registry())
        .into_iter()
        .find_map(|host| auths.get(host))
        .ok_or_else(|| {
            let (namespace, name) = secret_ident(secret);
            Error::CredentialsNotFound {
                registry: reference.registry().to_string(),
                namespace,
                name,
            }
        })?;
    Authenticator::from_config(entry)
}

/// Credentials gathered from several pull secrets, consulted per registry
///
/// Earlier secrets win when two carry an entry for the same host. A registry
/// with no entry is accessed anonymously.
#[derive(Clone, Debug, Default)]
pub struct Keychain {
    entries: BTreeMap<String, Authenticator>,
}

impl Keychain {
    pub fn from_pull_secrets(secrets: &[Secret]) -> Result<Self> {
        let mut entries = BTreeMap::new();
        for secret in secrets {
            for (host, config) in parse_pull_secret(secret)? {
                if entries.contains_key(&host) {
                    continue;
                }
                if let Some(auth) = Authenticator::from_config(&config)? {
                    entries.insert(host, auth);
                }
            }
        }
        Ok(Self { entries })
    }

    pub fn resolve(&self, registry: &str) -> Option<&Authenticator> {
        lookup_hosts(registry)
            .into_iter()
            .find_map(|host| self.entries.get(host))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
