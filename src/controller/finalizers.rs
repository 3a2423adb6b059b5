//! Finalizer handling for ImageRepository cleanup
//!
//! The finalizer lets the reflector observe deletion of an ImageRepository.
//! Stored tags are left in place on deletion since other repositories may
//! share the same canonical name.

use kube::ResourceExt;

use crate::crd::ImageRepository;

/// Finalizer name used to protect ImageRepository resources
pub const IMAGE_REPOSITORY_FINALIZER: &str = "finalizers.image.reflector.io";

/// Check if the repository is being deleted
pub fn is_being_deleted(repo: &ImageRepository) -> bool {
    repo.metadata.deletion_timestamp.is_some()
}

/// Check if the repository has our finalizer
pub fn has_finalizer(repo: &ImageRepository) -> bool {
    repo.finalizers()
        .iter()
        .any(|f| f == IMAGE_REPOSITORY_FINALIZER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::ImageRepositorySpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use kube::api::ObjectMeta;

    fn repo(finalizers: Vec<String>, deleting: bool) -> ImageRepository {
        ImageRepository {
            metadata: ObjectMeta {
                name: Some("podinfo".to_string()),
                namespace: Some("apps".to_string()),
                finalizers: Some(finalizers),
                deletion_timestamp: deleting.then(|| Time(chrono::Utc::now())),
                ..Default::default()
            },
            spec: ImageRepositorySpec {
                image: "ghcr.io/stefanprodan/podinfo".to_string(),
                interval: "1m".to_string(),
                timeout: None,
                secret_ref: None,
                cert_secret_ref: None,
                service_account_name: None,
                exclusion_list: vec![],
                suspend: false,
            },
            status: None,
        }
    }

    #[test]
    fn test_finalizer_name() {
        assert_eq!(IMAGE_REPOSITORY_FINALIZER, "finalizers.image.reflector.io");
    }

    #[test]
    fn test_has_finalizer() {
        assert!(has_finalizer(&repo(
            vec![IMAGE_REPOSITORY_FINALIZER.to_string()],
            false
        )));
        assert!(!has_finalizer(&repo(vec![], false)));
    }

    #[test]
    fn test_is_being_deleted() {
        assert!(is_being_deleted(&repo(vec![], true)));
        assert!(!is_being_deleted(&repo(vec![], false)));
    }
}
