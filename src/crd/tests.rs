//! Unit tests for the CRD types
//!
//! Covers duration parsing, spec defaulting and the wire shape of policies.

#[cfg(test)]
mod image_repository_spec {
    use std::time::Duration;

    use crate::crd::{ImageRepositorySpec, SIGNATURE_TAG_PATTERN};
    use crate::error::Error;

    fn spec(interval: &str) -> ImageRepositorySpec {
        ImageRepositorySpec {
            image: "ghcr.io/stefanprodan/podinfo".to_string(),
            interval: interval.to_string(),
            timeout: None,
            secret_ref: None,
            cert_secret_ref: None,
            service_account_name: None,
            exclusion_list: vec![],
            suspend: false,
        }
    }

    #[test]
    fn test_interval_accepts_compound_durations() {
        assert_eq!(spec("5m").interval().unwrap(), Duration::from_secs(300));
        assert_eq!(spec("1m30s").interval().unwrap(), Duration::from_secs(90));
        assert_eq!(spec("1h").interval().unwrap(), Duration::from_secs(3600));
    }

    #[test]
    fn test_invalid_interval_is_a_configuration_error() {
        let err = spec("soon").interval().unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidDuration {
                field: "spec.interval",
                ..
            }
        ));
        assert!(!err.is_retriable());
    }

    #[test]
    fn test_timeout_defaults_to_interval() {
        let mut s = spec("2m");
        assert_eq!(s.timeout().unwrap(), Duration::from_secs(120));

        s.timeout = Some("30s".to_string());
        assert_eq!(s.timeout().unwrap(), Duration::from_secs(30));
    }

    #[test]
    fn test_empty_exclusion_list_defaults_on_a_copy() {
        let s = spec("1m");
        assert_eq!(
            s.effective_exclusion_list(),
            vec![SIGNATURE_TAG_PATTERN.to_string()]
        );
        assert!(s.exclusion_list.is_empty());
    }

    #[test]
    fn test_explicit_exclusion_list_is_used_as_is() {
        let mut s = spec("1m");
        s.exclusion_list = vec!["^dev-".to_string(), "-rc$".to_string()];
        assert_eq!(s.effective_exclusion_list(), s.exclusion_list);
    }
}

#[cfg(test)]
mod image_policy_spec {
    use crate::crd::{
        ImagePolicy, ImagePolicyChoice, ImagePolicySpec, NumericalPolicy, SemVerPolicy, SortOrder,
    };
    use kube::api::ObjectMeta;

    #[test]
    fn test_policy_choice_is_externally_tagged() {
        let json = serde_json::json!({
            "imageRepositoryRef": {"name": "podinfo"},
            "policy": {"semver": {"range": ">=5.0.0 <6.0.0"}},
            "filterTags": {"pattern": "^v(?P<version>.*)$", "extract": "$version"}
        });
        let spec: ImagePolicySpec = serde_json::from_value(json).unwrap();
        assert_eq!(
            spec.policy,
            ImagePolicyChoice::Semver(SemVerPolicy {
                range: Some(">=5.0.0 <6.0.0".to_string())
            })
        );
        assert_eq!(spec.filter_tags.unwrap().extract.as_deref(), Some("$version"));
    }

    #[test]
    fn test_order_defaults_to_ascending() {
        let json = serde_json::json!({
            "imageRepositoryRef": {"name": "app"},
            "policy": {"numerical": {}}
        });
        let spec: ImagePolicySpec = serde_json::from_value(json).unwrap();
        assert_eq!(
            spec.policy,
            ImagePolicyChoice::Numerical(NumericalPolicy {
                order: SortOrder::Asc
            })
        );
    }

    #[test]
    fn test_two_strategies_are_rejected() {
        let json = serde_json::json!({
            "imageRepositoryRef": {"name": "app"},
            "policy": {"numerical": {}, "alphabetical": {}}
        });
        assert!(serde_json::from_value::<ImagePolicySpec>(json).is_err());
    }

    #[test]
    fn test_repository_namespace_defaults_to_own() {
        let json = serde_json::json!({
            "imageRepositoryRef": {"name": "app"},
            "policy": {"alphabetical": {"order": "desc"}}
        });
        let spec: ImagePolicySpec = serde_json::from_value(json).unwrap();
        let mut policy = ImagePolicy {
            metadata: ObjectMeta {
                name: Some("app".to_string()),
                namespace: Some("apps".to_string()),
                ..Default::default()
            },
            spec,
            status: None,
        };
        assert_eq!(policy.repository_namespace().as_deref(), Some("apps"));

        policy.spec.image_repository_ref.namespace = Some("shared".to_string());
        assert_eq!(policy.repository_namespace().as_deref(), Some("shared"));
    }
}

#[cfg(test)]
mod crd_generation {
    use crate::crd::{ImagePolicy, ImageRepository};
    use kube::CustomResourceExt;

    #[test]
    fn test_crd_names() {
        let repo = ImageRepository::crd();
        assert_eq!(
            repo.metadata.name.as_deref(),
            Some("imagerepositories.image.reflector.io")
        );
        let policy = ImagePolicy::crd();
        assert_eq!(
            policy.metadata.name.as_deref(),
            Some("imagepolicies.image.reflector.io")
        );
    }
}
