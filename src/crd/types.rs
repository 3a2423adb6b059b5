//! Shared types for image resource specifications
//!
//! These types are used across the CRD definitions and controller logic.
//!
//! # Type Hierarchy
//!
//! - [`Condition`] - Kubernetes-style status condition
//! - [`LocalObjectReference`] / [`NamespacedObjectReference`] - references to other objects
//! - [`ScanResult`] - outcome of the last successful registry scan
//! - [`ImagePolicyChoice`] - the ordering strategy of an image policy
//! - [`TagFilter`] - regex filter applied before ordering

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reference to an object in the same namespace
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LocalObjectReference {
    pub name: String,
}

/// Reference to an object that may live in another namespace
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NamespacedObjectReference {
    pub name: String,

    /// Defaults to the namespace of the referring object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Outcome of the last successful registry scan
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
    /// Number of tags stored after exclusion filtering
    pub tag_count: usize,
    /// When the scan completed
    pub scan_time: DateTime<Utc>,
}

/// Sort direction for alphabetical and numerical policies
///
/// `Asc` selects the tag that sorts last, `Desc` the one that sorts first.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Semantic version ordering with an optional range constraint
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SemVerPolicy {
    /// Range such as `>=1.0.0 <2.0.0`, `^1.2` or `1.x`; all releases when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<String>,
}

/// Lexical ordering
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AlphabeticalPolicy {
    #[serde(default)]
    pub order: SortOrder,
}

/// Integer ordering
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NumericalPolicy {
    #[serde(default)]
    pub order: SortOrder,
}

/// Exactly one ordering strategy used to pick the latest tag
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum ImagePolicyChoice {
    /// Highest semantic version inside the range
    Semver(SemVerPolicy),
    /// Lexically last (asc) or first (desc) tag
    Alphabetical(AlphabeticalPolicy),
    /// Numerically largest (asc) or smallest (desc) tag
    Numerical(NumericalPolicy),
}

impl ImagePolicyChoice {
    pub fn name(&self) -> &'static str {
        match self {
            ImagePolicyChoice::Semver(_) => "semver",
            ImagePolicyChoice::Alphabetical(_) => "alphabetical",
            ImagePolicyChoice::Numerical(_) => "numerical",
        }
    }
}

/// Regex filter applied to tags before ordering
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TagFilter {
    /// Tags not matching this pattern are ignored
    pub pattern: String,

    /// Replacement template such as `$version` used as the ordering key.
    /// When absent, the first named capture group is used if the pattern has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extract: Option<String>,
}

/// Kubernetes-style condition for status reporting
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (e.g., "Ready")
    #[serde(rename = "type")]
    pub type_: String,
    /// Status of the condition: "True", "False", or "Unknown"
    pub status: String,
    /// Last time the condition transitioned
    pub last_transition_time: String,
    /// Machine-readable reason for the condition
    pub reason: String,
    /// Human-readable message
    pub message: String,
    /// The .metadata.generation that the condition was set based upon
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    /// Create a new Ready condition
    pub fn ready(status: bool, reason: &str, message: &str) -> Self {
        Self {
            type_: "Ready".to_string(),
            status: if status { "True" } else { "False" }.to_string(),
            last_transition_time: Utc::now().to_rfc3339(),
            reason: reason.to_string(),
            message: message.to_string(),
            observed_generation: None,
        }
    }
}
