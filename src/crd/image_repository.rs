//! ImageRepository Custom Resource Definition
//!
//! An ImageRepository names a container image repository to scan on an
//! interval. Scan results are stored in the tag store and summarised in status.

use std::time::Duration;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, LocalObjectReference, ScanResult};
use crate::error::{Error, Result};

/// Annotation whose value changes to request an immediate scan
pub const RECONCILE_REQUEST_ANNOTATION: &str = "image.reflector.io/requestedAt";

/// Pattern excluding cosign signature objects (`<digest>.sig`)
pub const SIGNATURE_TAG_PATTERN: &str = r"^.*\.sig$";

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "image.reflector.io",
    version = "v1beta1",
    kind = "ImageRepository",
    namespaced,
    status = "ImageRepositoryStatus",
    shortname = "imgrepo",
    printcolumn = r#"{"name":"Last scan","type":"string","jsonPath":".status.lastScanResult.scanTime"}"#,
    printcolumn = r#"{"name":"Tags","type":"integer","jsonPath":".status.lastScanResult.tagCount"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].message"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ImageRepositorySpec {
    /// Image repository without scheme or tag, e.g. `ghcr.io/org/app`
    pub image: String,

    /// How often to scan, e.g. `5m`
    pub interval: String,

    /// Upper bound for one scan; defaults to the interval
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,

    /// Pull secret with credentials for the registry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<LocalObjectReference>,

    /// Secret holding `certFile`, `keyFile` and/or `caFile`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_secret_ref: Option<LocalObjectReference>,

    /// Service account whose image pull secrets are used as a keychain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,

    /// Regexes of tags to leave out of scan results
    #[serde(default)]
    pub exclusion_list: Vec<String>,

    #[serde(default)]
    pub suspend: bool,
}

impl ImageRepositorySpec {
    /// The scan interval
    pub fn interval(&self) -> Result<Duration> {
        parse_duration("spec.interval", &self.interval)
    }

    /// The scan timeout, falling back to the interval
    pub fn timeout(&self) -> Result<Duration> {
        match &self.timeout {
            Some(timeout) => parse_duration("spec.timeout", timeout),
            None => self.interval(),
        }
    }

    /// The exclusion list to apply; a copy, so defaulting never touches the stored spec
    pub fn effective_exclusion_list(&self) -> Vec<String> {
        if self.exclusion_list.is_empty() {
            vec![SIGNATURE_TAG_PATTERN.to_string()]
        } else {
            self.exclusion_list.clone()
        }
    }
}

fn parse_duration(field: &'static str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value.trim()).map_err(|e| Error::InvalidDuration {
        field,
        value: value.to_string(),
        message: e.to_string(),
    })
}

/// Status subresource of an ImageRepository
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImageRepositoryStatus {
    /// Normalised `registry/repository`, the tag store key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical_image_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_scan_result: Option<ScanResult>,

    /// Value of the reconcile request annotation last acted upon
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_handled_reconcile_at: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl ImageRepository {
    /// Pending manual-trigger token, if the annotation is present
    pub fn reconcile_request(&self) -> Option<&str> {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(RECONCILE_REQUEST_ANNOTATION))
            .map(String::as_str)
    }

    pub fn canonical_image_name(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.canonical_image_name.as_deref())
    }
}
