//! Registry scanning
//!
//! One scan resolves credentials, lists the repository's tags, drops
//! excluded tags and replaces the stored tag list. The credential lookup and
//! the listing share the repository's timeout. The store is only written
//! after a complete listing.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use kube::ResourceExt;
use regex::Regex;
use tracing::{debug, instrument};

use super::credentials::CredentialResolver;
use crate::crd::ImageRepository;
use crate::database::{run_blocking, TagStore};
use crate::error::{Error, Result};
use crate::registry::{ImageReference, RegistryClient};

/// Compile an exclusion list; any bad pattern fails the whole list
pub fn compile_exclusions(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(pattern).map_err(|source| Error::InvalidPattern {
                pattern: pattern.clone(),
                source,
            })
        })
        .collect()
}

/// Tags matching none of the exclusions, first occurrence order, without duplicates
pub fn filter_tags(tags: Vec<String>, exclusions: &[Regex]) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::with_capacity(tags.len());
    tags.into_iter()
        .filter(|tag| !exclusions.iter().any(|re| re.is_match(tag)))
        .filter(|tag| seen.insert(tag.clone()))
        .collect()
}

#[derive(Clone)]
pub struct RegistryScanner {
    registry: Arc<dyn RegistryClient>,
    credentials: CredentialResolver,
    store: Arc<dyn TagStore>,
}

impl RegistryScanner {
    pub fn new(
        registry: Arc<dyn RegistryClient>,
        credentials: CredentialResolver,
        store: Arc<dyn TagStore>,
    ) -> Self {
        Self {
            registry,
            credentials,
            store,
        }
    }

    pub fn store(&self) -> Arc<dyn TagStore> {
        self.store.clone()
    }

    /// Scan `reference` on behalf of `repo`, returning the stored tags
    #[instrument(skip(self, repo), fields(name = %repo.name_any(), image = %reference))]
    pub async fn scan(
        &self,
        repo: &ImageRepository,
        reference: &ImageReference,
    ) -> Result<Vec<String>> {
        let timeout = repo.spec.timeout()?;
        let exclusions = compile_exclusions(&repo.spec.effective_exclusion_list())?;
        let canonical_name = reference.canonical_name();
        let namespace = repo.namespace().unwrap_or_default();

        let listing = async {
            let options = self.credentials.resolve(&namespace, &repo.spec, reference).await?;
            self.registry.list_tags(reference, &options).await
        };
        let tags = tokio::time::timeout(timeout, listing)
            .await
            .map_err(|_| timed_out(&canonical_name, timeout))??;

        let listed = tags.len();
        let tags = filter_tags(tags, &exclusions);
        debug!(listed, kept = tags.len(), "Listed registry tags");

        let store = self.store.clone();
        let name = canonical_name.clone();
        run_blocking(&canonical_name, move || store.set_tags(&name, &tags).map(|()| tags)).await
    }
}

fn timed_out(canonical_name: &str, timeout: Duration) -> Error {
    Error::Timeout {
        canonical_name: canonical_name.to_string(),
        timeout,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::fakes::{FakeObjects, FakeRegistry};
    use crate::crd::ImageRepositorySpec;
    use crate::database::MemoryTagStore;
    use crate::registry::login::LoginManager;
    use crate::registry::{parse_image_reference, Authenticator};

    fn repo(exclusion_list: &[&str], timeout: Option<&str>) -> ImageRepository {
        let mut repo = ImageRepository::new(
            "app",
            ImageRepositorySpec {
                image: "ghcr.io/org/app".to_string(),
                interval: "5m".to_string(),
                timeout: timeout.map(str::to_string),
                secret_ref: None,
                cert_secret_ref: None,
                service_account_name: None,
                exclusion_list: exclusion_list.iter().map(|p| p.to_string()).collect(),
                suspend: false,
            },
        );
        repo.metadata.namespace = Some("apps".to_string());
        repo
    }

    fn scanner(registry: Arc<FakeRegistry>, store: Arc<MemoryTagStore>) -> RegistryScanner {
        let objects = Arc::new(FakeObjects::default());
        let credentials = CredentialResolver::new(objects, LoginManager::default());
        RegistryScanner::new(registry, credentials, store)
    }

    fn strings(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_filter_tags_intersects_exclusions_and_dedupes() {
        let exclusions = compile_exclusions(&strings(&[r"\.sig$", "^latest$"])).unwrap();
        let kept = filter_tags(strings(&["v1", "v1.sig", "latest", "v2", "v1"]), &exclusions);
        assert_eq!(kept, strings(&["v1", "v2"]));
    }

    #[test]
    fn test_filter_tags_handles_large_registries() {
        let mut tags: Vec<String> = (0..60_000).map(|i| format!("v1.{i}.0")).collect();
        tags.push("v1.0.0".to_string());
        tags.push("v1.0.0.sig".to_string());
        let exclusions = compile_exclusions(&strings(&[r"\.sig$"])).unwrap();
        let started = std::time::Instant::now();

        let kept = filter_tags(tags, &exclusions);

        assert_eq!(kept.len(), 60_000);
        assert_eq!(kept.first().map(String::as_str), Some("v1.0.0"));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_bad_exclusion_pattern_is_an_error() {
        let err = compile_exclusions(&strings(&["ok", "(["])).unwrap_err();
        assert!(matches!(err, Error::InvalidPattern { ref pattern, .. } if pattern == "(["));
    }

    #[tokio::test]
    async fn test_default_exclusion_drops_signatures() {
        let registry = Arc::new(FakeRegistry::with_tags(&["v1.0.0", "v1.0.0.sig", "latest"]));
        let store = Arc::new(MemoryTagStore::new());
        let repo = repo(&[], None);
        let reference = parse_image_reference(&repo.spec.image).unwrap();

        let tags = scanner(registry, store.clone()).scan(&repo, &reference).await.unwrap();
        assert_eq!(tags, strings(&["v1.0.0", "latest"]));
        assert_eq!(store.tags("ghcr.io/org/app").unwrap(), strings(&["v1.0.0", "latest"]));
        assert!(repo.spec.exclusion_list.is_empty());
    }

    #[tokio::test]
    async fn test_explicit_exclusions_replace_default() {
        let registry = Arc::new(FakeRegistry::with_tags(&["v1.0.0", "v1.0.0.sig", "latest"]));
        let store = Arc::new(MemoryTagStore::new());
        let repo = repo(&["^latest$"], None);
        let reference = parse_image_reference(&repo.spec.image).unwrap();

        let tags = scanner(registry, store).scan(&repo, &reference).await.unwrap();
        assert_eq!(tags, strings(&["v1.0.0", "v1.0.0.sig"]));
    }

    #[tokio::test]
    async fn test_bad_pattern_skips_registry() {
        let registry = Arc::new(FakeRegistry::with_tags(&["v1"]));
        let store = Arc::new(MemoryTagStore::new());
        let repo = repo(&["(["], None);
        let reference = parse_image_reference(&repo.spec.image).unwrap();

        let err = scanner(registry.clone(), store).scan(&repo, &reference).await.unwrap_err();
        assert!(matches!(err, Error::InvalidPattern { .. }));
        assert_eq!(registry.calls(), 0);
    }

    #[tokio::test]
    async fn test_registry_failure_leaves_store_untouched() {
        let store = Arc::new(MemoryTagStore::new());
        store.set_tags("ghcr.io/org/app", &strings(&["old"])).unwrap();
        let repo = repo(&[], None);
        let reference = parse_image_reference(&repo.spec.image).unwrap();

        let err = scanner(Arc::new(FakeRegistry::failing(503)), store.clone())
            .scan(&repo, &reference)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RegistryStatus { status: 503, .. }));
        assert_eq!(store.tags("ghcr.io/org/app").unwrap(), strings(&["old"]));
    }

    #[tokio::test]
    async fn test_pull_secret_credentials_reach_registry() {
        let registry = Arc::new(FakeRegistry::with_tags(&["v1"]));
        let objects = FakeObjects::default().with_secret(crate::registry::pull_secret(
            "ghcr-pull",
            serde_json::json!({ "ghcr.io": { "username": "bot", "password": "s3cret" } }),
        ));
        let credentials = CredentialResolver::new(Arc::new(objects), LoginManager::default());
        let store = Arc::new(MemoryTagStore::new());
        let scanner = RegistryScanner::new(registry.clone(), credentials, store);

        let mut repo = repo(&[], None);
        repo.spec.secret_ref = Some(crate::crd::LocalObjectReference {
            name: "ghcr-pull".to_string(),
        });
        let reference = parse_image_reference(&repo.spec.image).unwrap();
        scanner.scan(&repo, &reference).await.unwrap();

        let options = registry.last_options.lock().clone().expect("registry was called");
        assert!(matches!(
            options.credentials_for("ghcr.io"),
            Some(Authenticator::Basic { username, .. }) if username == "bot"
        ));
        assert!(options.transport.is_none());
    }

    #[tokio::test]
    async fn test_scan_persists_to_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(crate::database::FileTagStore::open(dir.path()).unwrap());
        let registry = Arc::new(FakeRegistry::with_tags(&["v1.0.0", "v1.1.0"]));
        let objects = Arc::new(FakeObjects::default());
        let credentials = CredentialResolver::new(objects, LoginManager::default());
        let scanner = RegistryScanner::new(registry, credentials, store.clone());
        let repo = repo(&[], None);
        let reference = parse_image_reference(&repo.spec.image).unwrap();

        let tags = scanner.scan(&repo, &reference).await.unwrap();

        assert_eq!(tags, strings(&["v1.0.0", "v1.1.0"]));
        let reopened = crate::database::FileTagStore::open(dir.path()).unwrap();
        assert_eq!(reopened.tags("ghcr.io/org/app").unwrap(), tags);
    }

    #[tokio::test]
    async fn test_scan_times_out() {
        let store = Arc::new(MemoryTagStore::new());
        let repo = repo(&[], Some("100ms"));
        let reference = parse_image_reference(&repo.spec.image).unwrap();

        let err = scanner(Arc::new(FakeRegistry::slow(Duration::from_secs(10))), store.clone())
            .scan(&repo, &reference)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Timeout { timeout, .. } if timeout == Duration::from_millis(100)
        ));
        assert!(err.is_retriable());
        assert!(store.tags("ghcr.io/org/app").unwrap().is_empty());
    }
}
