//! ImageRepository reconcile pass
//!
//! [`evaluate_repository`] computes the new status, the follow-up and the
//! event of one pass without touching the API server. Writing the status and
//! publishing the event is left to the reconciler.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::conditions::{mark_ready, set_condition, CONDITION_STATUS_UNKNOWN, CONDITION_TYPE_READY};
use super::events::EventType;
use super::scanner::RegistryScanner;
use super::scheduler::should_scan;
use crate::crd::{ImageRepository, ImageRepositoryStatus, ScanResult};
use crate::database::run_blocking;
use crate::error::{reason, Error, ErrorKind};
use crate::registry::parse_image_reference;

/// What the controller should do once the pass's status is written
#[derive(Debug)]
pub enum Next {
    /// Check again after the given delay
    Requeue(Duration),
    /// Nothing to do until the object changes
    AwaitChange,
    /// Fail the pass so the error policy retries with backoff
    Retry(Error),
}

/// Event produced by a pass
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingEvent {
    pub event_type: EventType,
    pub reason: String,
    pub message: String,
}

impl PendingEvent {
    pub fn normal(reason: &str, message: impl Into<String>) -> Self {
        Self {
            event_type: EventType::Normal,
            reason: reason.to_string(),
            message: message.into(),
        }
    }

    pub fn warning(reason: &str, message: impl Into<String>) -> Self {
        Self {
            event_type: EventType::Warning,
            reason: reason.to_string(),
            message: message.into(),
        }
    }
}

/// Outcome of one ImageRepository pass
#[derive(Debug)]
pub struct RepositoryPass {
    pub status: ImageRepositoryStatus,
    pub next: Next,
    pub event: Option<PendingEvent>,
    /// Whether a registry scan was attempted
    pub scanned: bool,
    /// Classification of the error that ended the pass, if any
    pub error_kind: Option<ErrorKind>,
}

/// Run one pass over a live (not deleting) repository
pub async fn evaluate_repository(
    repo: &ImageRepository,
    scanner: &RegistryScanner,
    now: DateTime<Utc>,
) -> RepositoryPass {
    let generation = repo.metadata.generation;
    let mut status = repo.status.clone().unwrap_or_default();

    if repo.spec.suspend {
        set_condition(
            &mut status.conditions,
            CONDITION_TYPE_READY,
            CONDITION_STATUS_UNKNOWN,
            reason::SUSPENDED,
            "reconciliation is suspended",
            generation,
        );
        status.observed_generation = generation;
        return RepositoryPass {
            status,
            next: Next::AwaitChange,
            event: None,
            scanned: false,
            error_kind: None,
        };
    }

    let reference = match parse_image_reference(&repo.spec.image) {
        Ok(reference) => reference,
        Err(e) => return failed(status, e, generation, false),
    };
    let canonical_name = reference.canonical_name();
    status.canonical_image_name = Some(canonical_name.clone());

    let decision = {
        let spec = repo.spec.clone();
        let current = status.clone();
        let request = repo.reconcile_request().map(str::to_string);
        let store = scanner.store();
        run_blocking(&canonical_name, move || {
            should_scan(&spec, &current, generation, request.as_deref(), store.as_ref(), now)
        })
        .await
    };
    let decision = match decision {
        Ok(decision) => decision,
        Err(e) => return failed(status, e, generation, false),
    };

    if !decision.due {
        debug!(next_scan = ?decision.wait, "Scan not due");
        return RepositoryPass {
            status,
            next: Next::Requeue(decision.wait),
            event: None,
            scanned: false,
            error_kind: None,
        };
    }

    if let Some(token) = repo.reconcile_request() {
        status.last_handled_reconcile_at = Some(token.to_string());
    }

    let interval = match repo.spec.interval() {
        Ok(interval) => interval,
        Err(e) => return failed(status, e, generation, true),
    };

    match scanner.scan(repo, &reference).await {
        Ok(tags) => {
            let message = format!("successful scan, found {} tags", tags.len());
            info!(image = %reference, tags = tags.len(), "Scan succeeded");
            status.last_scan_result = Some(ScanResult {
                tag_count: tags.len(),
                scan_time: now,
            });
            mark_ready(&mut status.conditions, true, reason::SUCCEEDED, &message, generation);
            status.observed_generation = generation;
            RepositoryPass {
                status,
                next: Next::Requeue(interval),
                event: Some(PendingEvent::normal(reason::SUCCEEDED, message)),
                scanned: true,
                error_kind: None,
            }
        }
        Err(e) => failed(status, e, generation, true),
    }
}

fn failed(
    mut status: ImageRepositoryStatus,
    error: Error,
    generation: Option<i64>,
    scanned: bool,
) -> RepositoryPass {
    let message = error.to_string();
    warn!(error = %message, kind = error.kind().as_str(), "Repository pass failed");
    mark_ready(&mut status.conditions, false, error.reason(), &message, generation);
    status.observed_generation = generation;

    let event = Some(PendingEvent::warning(error.reason(), message));
    let error_kind = Some(error.kind());
    let next = if error.is_retriable() {
        Next::Retry(error)
    } else {
        Next::AwaitChange
    };
    RepositoryPass {
        status,
        next,
        event,
        scanned,
        error_kind,
    }
}
