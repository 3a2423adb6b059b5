//! Image repository references
//!
//! `spec.image` names a repository, never a tag or digest. Parsing follows the
//! Docker conventions: a leading component is a registry host when it contains
//! a `.` or `:` or is `localhost`; everything else lives on Docker Hub, where
//! single-component names gain the `library/` prefix.

use std::fmt;
use std::net::IpAddr;

use crate::error::{Error, Result};

/// Registry host used when the image names none
pub const DEFAULT_REGISTRY: &str = "index.docker.io";

const DOCKER_HUB_ALIAS: &str = "docker.io";

/// A parsed `registry/repository` pair
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ImageReference {
    registry: String,
    repository: String,
}

impl ImageReference {
    /// Registry host, including a port when one was given
    pub fn registry(&self) -> &str {
        &self.registry
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// The tag store key, `registry/repository`
    pub fn canonical_name(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }

    /// `http` for local registries, `https` otherwise
    pub fn scheme(&self) -> &'static str {
        if is_insecure_host(&self.registry) {
            "http"
        } else {
            "https"
        }
    }

    /// `scheme://registry`
    pub fn registry_url(&self) -> String {
        format!("{}://{}", self.scheme(), self.registry)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.registry, self.repository)
    }
}

fn invalid(image: &str, message: impl Into<String>) -> Error {
    Error::InvalidImageReference {
        image: image.to_string(),
        message: message.into(),
    }
}

/// Parse `spec.image` into a registry and repository
///
/// Rejects URL schemes, tags and digests with a message naming the offending
/// part, so the user knows what to remove.
pub fn parse_image_reference(image: &str) -> Result<ImageReference> {
    if let Some((scheme, _)) = image.split_once("://") {
        return Err(invalid(
            image,
            format!(".spec.image value should not start with URL scheme; remove '{scheme}://'"),
        ));
    }
    if let Some((_, digest)) = image.split_once('@') {
        return Err(invalid(
            image,
            format!(".spec.image value should not contain a digest; remove '@{digest}'"),
        ));
    }

    let (registry, remainder) = match image.split_once('/') {
        Some((first, rest)) if looks_like_registry(first) => (first.to_string(), rest),
        _ => (DEFAULT_REGISTRY.to_string(), image),
    };
    let registry = if registry == DOCKER_HUB_ALIAS {
        DEFAULT_REGISTRY.to_string()
    } else {
        registry
    };

    if let Some((_, tag)) = remainder.split_once(':') {
        return Err(invalid(
            image,
            format!(".spec.image value should not contain a tag; remove ':{tag}'"),
        ));
    }

    validate_repository(image, remainder)?;

    let repository = if registry == DEFAULT_REGISTRY && !remainder.contains('/') {
        format!("library/{remainder}")
    } else {
        remainder.to_string()
    };

    Ok(ImageReference {
        registry,
        repository,
    })
}

fn looks_like_registry(component: &str) -> bool {
    component.contains('.') || component.contains(':') || component == "localhost"
}

fn validate_repository(image: &str, repository: &str) -> Result<()> {
    if repository.is_empty() {
        return Err(invalid(image, "repository name must not be empty"));
    }
    for component in repository.split('/') {
        if component.is_empty() {
            return Err(invalid(image, "repository path has an empty component"));
        }
        let allowed = |c: &char| {
            c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-')
        };
        if let Some(c) = component.chars().find(|c| !allowed(c)) {
            return Err(invalid(
                image,
                format!("repository can only contain the characters `abcdefghijklmnopqrstuvwxyz0123456789_-./`, found {c:?}"),
            ));
        }
        let starts_ok = component.starts_with(|c: char| c.is_ascii_alphanumeric());
        let ends_ok = component.ends_with(|c: char| c.is_ascii_alphanumeric());
        if !starts_ok || !ends_ok {
            return Err(invalid(
                image,
                format!("repository component {component:?} must start and end with a letter or digit"),
            ));
        }
    }
    Ok(())
}

/// Strip a trailing `:port`, leaving bracketed IPv6 literals intact
fn host_without_port(registry: &str) -> &str {
    if let Some(rest) = registry.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match registry.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => registry,
    }
}

fn is_insecure_host(registry: &str) -> bool {
    let host = host_without_port(registry);
    if host == "localhost" || host.ends_with(".localhost") || host.ends_with(".local") {
        return true;
    }
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => ip.is_loopback() || ip.is_private(),
        Ok(IpAddr::V6(ip)) => ip.is_loopback(),
        Err(_) => false,
    }
}
