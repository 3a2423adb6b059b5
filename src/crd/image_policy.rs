//! ImagePolicy Custom Resource Definition
//!
//! An ImagePolicy picks the latest tag of an ImageRepository's scan results.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, ImagePolicyChoice, NamespacedObjectReference, TagFilter};

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "image.reflector.io",
    version = "v1beta1",
    kind = "ImagePolicy",
    namespaced,
    status = "ImagePolicyStatus",
    shortname = "imgpol",
    printcolumn = r#"{"name":"LatestImage","type":"string","jsonPath":".status.latestImage"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].message"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ImagePolicySpec {
    /// The ImageRepository whose tags are evaluated
    pub image_repository_ref: NamespacedObjectReference,

    pub policy: ImagePolicyChoice,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_tags: Option<TagFilter>,
}

/// Status subresource of an ImagePolicy
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImagePolicyStatus {
    /// `image:tag` selected by the policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_image: Option<String>,

    /// The previous `latestImage`, recorded when the selection changes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_previous_image: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl ImagePolicy {
    /// Namespace of the referenced ImageRepository
    pub fn repository_namespace(&self) -> Option<String> {
        self.spec
            .image_repository_ref
            .namespace
            .clone()
            .or_else(|| self.metadata.namespace.clone())
    }
}
