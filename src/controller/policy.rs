//! ImagePolicy reconcile pass
//!
//! A policy is re-evaluated whenever it or its ImageRepository changes; there
//! is no timer. Missing inputs put the policy in `DependencyNotReady`.

use std::sync::Arc;

use kube::runtime::reflector::ObjectRef;
use kube::ResourceExt;
use tracing::{debug, info};

use super::conditions::mark_ready;
use super::repository::{Next, PendingEvent};
use crate::crd::{ImagePolicy, ImagePolicyStatus, ImageRepository};
use crate::database::TagStore;
use crate::error::{reason, Error, ErrorKind, Result};
use crate::policy::evaluate;

/// Outcome of one ImagePolicy pass
#[derive(Debug)]
pub struct PolicyPass {
    pub status: ImagePolicyStatus,
    pub next: Next,
    pub event: Option<PendingEvent>,
    pub error_kind: Option<ErrorKind>,
}

/// Run one pass given the lookup result for the referenced repository
pub fn evaluate_policy(
    policy: &ImagePolicy,
    repository: Result<ImageRepository>,
    store: &dyn TagStore,
) -> PolicyPass {
    let generation = policy.metadata.generation;
    let mut status = policy.status.clone().unwrap_or_default();
    status.observed_generation = generation;

    let repository = match repository {
        Ok(repository) => repository,
        Err(e) => {
            let message = format!("referenced ImageRepository is unavailable: {e}");
            let not_ready = reason::DEPENDENCY_NOT_READY;
            mark_ready(&mut status.conditions, false, not_ready, &message, generation);
            let error_kind = Some(e.kind());
            let next = if e.is_retriable() {
                Next::Retry(e)
            } else {
                Next::AwaitChange
            };
            return PolicyPass {
                status,
                next,
                event: Some(PendingEvent::warning(reason::DEPENDENCY_NOT_READY, message)),
                error_kind,
            };
        }
    };

    // Waits for the repository's first scan; its status change re-triggers this policy
    let Some(canonical_name) = repository.canonical_image_name().map(str::to_string) else {
        let message = format!(
            "ImageRepository {} has not been scanned yet",
            repository.name_any()
        );
        debug!(%message, "Policy dependency not ready");
        let not_ready = reason::DEPENDENCY_NOT_READY;
        mark_ready(&mut status.conditions, false, not_ready, &message, generation);
        return PolicyPass {
            status,
            next: Next::AwaitChange,
            event: None,
            error_kind: None,
        };
    };

    let tags = match store.tags(&canonical_name) {
        Ok(tags) => tags,
        Err(e) => return failed(status, e, generation),
    };

    let latest = match evaluate(&tags, policy.spec.filter_tags.as_ref(), &policy.spec.policy) {
        Ok(latest) => latest,
        Err(e) => return failed(status, e, generation),
    };

    let Some(tag) = latest else {
        let error = Error::NoMatchingTags {
            repository: canonical_name,
            detail: no_match_detail(policy, tags.len()),
        };
        record_selection(&mut status, None);
        return failed(status, error, generation);
    };

    let image = format!("{}:{}", repository.spec.image, tag);
    let changed = record_selection(&mut status, Some(image.clone()));
    let message = format!("Latest image tag for '{}' resolved to {}", repository.spec.image, tag);
    mark_ready(&mut status.conditions, true, reason::SUCCEEDED, &message, generation);

    let event = changed.then(|| {
        info!(%image, "Latest image changed");
        PendingEvent::normal(reason::SUCCEEDED, message)
    });
    PolicyPass {
        status,
        next: Next::AwaitChange,
        event,
        error_kind: None,
    }
}

/// Store the selection, remembering the prior image when it changes
fn record_selection(status: &mut ImagePolicyStatus, latest: Option<String>) -> bool {
    if status.latest_image == latest {
        return false;
    }
    if status.latest_image.is_some() {
        status.observed_previous_image = status.latest_image.take();
    }
    status.latest_image = latest;
    true
}

fn no_match_detail(policy: &ImagePolicy, candidates: usize) -> String {
    let mut detail = format!(" {} among {} tags", policy.spec.policy.name(), candidates);
    if let Some(filter) = &policy.spec.filter_tags {
        detail.push_str(&format!(" filtered by {:?}", filter.pattern));
    }
    detail
}

fn failed(mut status: ImagePolicyStatus, error: Error, generation: Option<i64>) -> PolicyPass {
    let message = error.to_string();
    let reason = error.reason();
    mark_ready(&mut status.conditions, false, reason, &message, generation);
    let error_kind = Some(error.kind());
    let next = if error.is_retriable() {
        Next::Retry(error)
    } else {
        Next::AwaitChange
    };
    PolicyPass {
        status,
        next,
        event: Some(PendingEvent::warning(reason, message)),
        error_kind,
    }
}

/// Policies referencing `repository`
pub fn policies_for_repository(
    policies: &[Arc<ImagePolicy>],
    repository: &ImageRepository,
) -> Vec<ObjectRef<ImagePolicy>> {
    let name = repository.name_any();
    let namespace = repository.namespace();
    policies
        .iter()
        .filter(|p| {
            p.spec.image_repository_ref.name == name && p.repository_namespace() == namespace
        })
        .map(|p| ObjectRef::from_obj(p.as_ref()))
        .collect()
}
