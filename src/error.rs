//! Error types for the image reflector
//!
//! Every component returns [`Error`]; only the reconcilers turn one into a
//! readiness condition and an event.

use std::time::Duration;

use kube::runtime::finalizer;
use thiserror::Error;

/// Reasons written into the `Ready` condition
pub mod reason {
    pub const SUCCEEDED: &str = "Succeeded";
    pub const RECONCILIATION_FAILED: &str = "ReconciliationFailed";
    pub const SUSPENDED: &str = "Suspended";
    pub const IMAGE_URL_INVALID: &str = "ImageURLInvalid";
    pub const DEPENDENCY_NOT_READY: &str = "DependencyNotReady";
    pub const NO_MATCHING_TAGS: &str = "NoMatchingTags";
}

/// How an error should be treated by the requeue policy
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad user input; wait for a spec change instead of retrying on a timer
    Configuration,
    /// Network, timeout or storage trouble; retry with backoff
    Transient,
    /// A referenced object is missing; retry with backoff since it may appear
    NotFound,
    /// No tag satisfied the policy; an expected steady state
    PolicyMismatch,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Transient => "transient",
            ErrorKind::NotFound => "not_found",
            ErrorKind::PolicyMismatch => "policy_mismatch",
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    KubeError(#[source] kube::Error),

    /// The object changed underneath a status write
    #[error("{kind} {namespace}/{name} was modified concurrently, retrying")]
    Conflict {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    /// A referenced Secret or ServiceAccount does not exist
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    /// Operator-level misconfiguration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// `.spec.image` could not be parsed
    #[error("invalid image reference {image:?}: {message}")]
    InvalidImageReference { image: String, message: String },

    /// A duration field could not be parsed
    #[error("invalid duration {value:?} in {field}: {message}")]
    InvalidDuration {
        field: &'static str,
        value: String,
        message: String,
    },

    /// An exclusion or filter pattern does not compile
    #[error("failed to compile regex {pattern}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// The policy itself is malformed (bad semver range, bad extract template)
    #[error("invalid policy: {0}")]
    InvalidPolicy(String),

    /// A Secret has the wrong type or content
    #[error("invalid secret {namespace}/{name}: {message}")]
    InvalidSecret {
        namespace: String,
        name: String,
        message: String,
    },

    /// A pull secret has no entry for the registry being scanned
    #[error("auth for {registry:?} not found in secret {namespace}/{name}")]
    CredentialsNotFound {
        registry: String,
        namespace: String,
        name: String,
    },

    /// A docker config auth key is not a usable registry address
    #[error("invalid registry auth key {key:?}: {message}")]
    InvalidRegistryKey { key: String, message: String },

    /// TLS material could not be turned into a transport
    #[error("TLS configuration error: {0}")]
    TlsError(String),

    /// Cloud provider auto-login failed
    #[error("{provider} login failed for {registry}: {message}")]
    LoginFailed {
        provider: &'static str,
        registry: String,
        message: String,
    },

    /// Transport-level failure talking to a registry
    #[error("request to registry {registry} failed: {source}")]
    RegistryRequest {
        registry: String,
        #[source]
        source: reqwest::Error,
    },

    /// A registry answered with a non-success status
    #[error("registry {registry} returned {status}: {message}")]
    RegistryStatus {
        registry: String,
        status: u16,
        message: String,
    },

    /// The scan did not finish within the configured timeout
    #[error("scan of {canonical_name} timed out after {timeout:?}")]
    Timeout {
        canonical_name: String,
        timeout: Duration,
    },

    /// Tag store read or write failure
    #[error("tag store error for {name:?}: {message}")]
    StoreError { name: String, message: String },

    /// No stored tag survived filtering and ordering
    #[error("no tag of {repository} matches the policy{detail}")]
    NoMatchingTags { repository: String, detail: String },

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// The kube finalizer helper failed outside of our own callbacks
    #[error("Finalizer error: {0}")]
    FinalizerError(#[source] Box<finalizer::Error<Error>>),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Classify the error according to how it should be retried
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ConfigError(_)
            | Error::InvalidImageReference { .. }
            | Error::InvalidDuration { .. }
            | Error::InvalidPattern { .. }
            | Error::InvalidPolicy(_)
            | Error::InvalidSecret { .. }
            | Error::CredentialsNotFound { .. }
            | Error::InvalidRegistryKey { .. }
            | Error::TlsError(_) => ErrorKind::Configuration,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::KubeError(kube::Error::Api(resp)) if resp.code == 404 => ErrorKind::NotFound,
            Error::NoMatchingTags { .. } => ErrorKind::PolicyMismatch,
            Error::KubeError(_)
            | Error::Conflict { .. }
            | Error::LoginFailed { .. }
            | Error::RegistryRequest { .. }
            | Error::RegistryStatus { .. }
            | Error::Timeout { .. }
            | Error::StoreError { .. }
            | Error::SerializationError(_)
            | Error::FinalizerError(_) => ErrorKind::Transient,
        }
    }

    /// Whether the error should be retried on the backoff schedule
    pub fn is_retriable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient | ErrorKind::NotFound)
    }

    /// Reason recorded on the `Ready` condition when this error ends a pass
    pub fn reason(&self) -> &'static str {
        match self {
            Error::InvalidImageReference { .. } => reason::IMAGE_URL_INVALID,
            Error::NoMatchingTags { .. } => reason::NO_MATCHING_TAGS,
            _ => reason::RECONCILIATION_FAILED,
        }
    }

    /// Wrap a kube API error, promoting 409s to [`Error::Conflict`]
    pub fn from_kube(err: kube::Error, kind: &'static str, namespace: &str, name: &str) -> Self {
        match err {
            kube::Error::Api(resp) if resp.code == 409 => Error::Conflict {
                kind,
                namespace: namespace.to_string(),
                name: name.to_string(),
            },
            kube::Error::Api(resp) if resp.code == 404 => Error::NotFound {
                kind,
                namespace: namespace.to_string(),
                name: name.to_string(),
            },
            other => Error::KubeError(other),
        }
    }
}

impl From<kube::Error> for Error {
    fn from(err: kube::Error) -> Self {
        Error::KubeError(err)
    }
}

impl From<finalizer::Error<Error>> for Error {
    fn from(err: finalizer::Error<Error>) -> Self {
        match err {
            finalizer::Error::ApplyFailed(inner) | finalizer::Error::CleanupFailed(inner) => inner,
            other => Error::FinalizerError(Box::new(other)),
        }
    }
}
