//! Controllers for ImageRepository and ImagePolicy resources
//!
//! Implements the controller pattern using kube-rs runtime. The reconcile
//! functions here are thin: they run a pass from [`super::repository`] or
//! [`super::policy`], write the resulting status and publish its event.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::StreamExt;
use kube::{
    api::{Api, ListParams, PostParams},
    client::Client,
    runtime::{
        controller::{self, Action, Controller},
        finalizer::{finalizer, Event as FinalizerEvent},
        reflector, watcher, WatchStreamExt,
    },
    Resource, ResourceExt,
};
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error, info, instrument, warn};

use super::events::EventSink;
use super::finalizers::{has_finalizer, is_being_deleted, IMAGE_REPOSITORY_FINALIZER};
use super::policy::{evaluate_policy, policies_for_repository};
use super::repository::{evaluate_repository, Next, PendingEvent};
use super::scanner::RegistryScanner;
use crate::crd::{ImagePolicy, ImageRepository};
use crate::database::{run_blocking, TagStore};
use crate::error::{Error, ErrorKind, Result};

/// Controller names used in logs and metrics
pub const REPOSITORY_CONTROLLER: &str = "imagerepository";
pub const POLICY_CONTROLLER: &str = "imagepolicy";

/// First retry delay after a failed pass
pub const BACKOFF_BASE_SECS: u64 = 5;
/// Upper bound for retry delays
pub const BACKOFF_MAX_SECS: u64 = 300;

/// How often a standby replica checks whether it became leader
const STANDBY_REQUEUE: Duration = Duration::from_secs(5);

/// Exponential backoff: `base * 2^attempt`, capped at `max`
///
/// The exponent stops growing after 6 attempts.
pub fn calculate_backoff(attempt: u32, base_delay_secs: u64, max_delay_secs: u64) -> Duration {
    let delay_secs = base_delay_secs.saturating_mul(2_u64.saturating_pow(attempt.min(6)));
    Duration::from_secs(delay_secs.min(max_delay_secs))
}

/// Consecutive failure counts per object, reset by a successful pass
#[derive(Debug, Default)]
pub struct FailureTracker {
    attempts: Mutex<HashMap<String, u32>>,
}

impl FailureTracker {
    /// Record a failure, returning how many failures preceded it
    pub fn record(&self, key: &str) -> u32 {
        let mut attempts = self.attempts.lock();
        let count = attempts.entry(key.to_string()).or_insert(0);
        let previous = *count;
        *count = count.saturating_add(1);
        previous
    }

    pub fn reset(&self, key: &str) {
        self.attempts.lock().remove(key);
    }

    pub fn attempts(&self, key: &str) -> u32 {
        self.attempts.lock().get(key).copied().unwrap_or(0)
    }
}

/// Key identifying an object in the failure tracker
pub fn failure_key<K: Resource<DynamicType = ()>>(obj: &K) -> String {
    format!(
        "{}/{}/{}",
        K::kind(&()),
        obj.meta().namespace.as_deref().unwrap_or_default(),
        obj.meta().name.as_deref().unwrap_or_default()
    )
}

/// Startup settings shared by both controllers
#[derive(Clone, Debug)]
pub struct ControllerOptions {
    /// Restrict watches to one namespace; all namespaces when `None`
    pub watch_namespace: Option<String>,
    /// Maximum number of objects reconciled in parallel per controller
    pub concurrency: u16,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            concurrency: 4,
        }
    }
}

/// Shared state for the controllers
pub struct ControllerState {
    pub client: Client,
    pub scanner: RegistryScanner,
    pub store: Arc<dyn TagStore>,
    pub events: Arc<dyn EventSink>,
    pub options: ControllerOptions,
    pub is_leader: Arc<AtomicBool>,
    pub failures: FailureTracker,
}

fn watched<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = kube::core::NamespaceResourceScope, DynamicType = ()>,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Fingerprint of the ImageRepository fields that start a pass
///
/// Status is left out, so the controller's own status writes do not trigger
/// another pass. Finalizers and the deletion timestamp are included because
/// the finalizer flow waits for those changes.
pub fn repository_trigger(repo: &ImageRepository) -> Option<u64> {
    let mut hasher = DefaultHasher::new();
    repo.metadata.generation.hash(&mut hasher);
    repo.reconcile_request().hash(&mut hasher);
    repo.metadata.finalizers.hash(&mut hasher);
    repo.metadata
        .deletion_timestamp
        .as_ref()
        .map(|t| t.0.timestamp())
        .hash(&mut hasher);
    Some(hasher.finish())
}

/// Main entry point: run both controllers until shutdown
pub async fn run_controllers(state: Arc<ControllerState>) -> Result<()> {
    let namespace = state.options.watch_namespace.clone();
    let repositories: Api<ImageRepository> = watched(&state.client, namespace.as_deref());
    let policies: Api<ImagePolicy> = watched(&state.client, namespace.as_deref());

    // Verify CRDs exist
    for (kind, check) in [
        ("ImageRepository", repositories.list(&ListParams::default().limit(1)).await.map(|_| ())),
        ("ImagePolicy", policies.list(&ListParams::default().limit(1)).await.map(|_| ())),
    ] {
        if let Err(e) = check {
            error!("{kind} CRD not found. Please install the CRDs first: {:?}", e);
            return Err(Error::ConfigError(format!("{kind} CRD not installed")));
        }
    }
    info!(namespace = ?namespace, concurrency = state.options.concurrency, "Starting controllers");

    let concurrency = state.options.concurrency;

    let (repository_reader, repository_writer) = reflector::store();
    let repository_triggers = reflector(
        repository_writer,
        watcher(repositories.clone(), watcher::Config::default()).default_backoff(),
    )
    .applied_objects()
    .predicate_filter(repository_trigger);

    let repository_controller = Controller::for_stream(repository_triggers, repository_reader)
        .with_config(controller::Config::default().concurrency(concurrency))
        .shutdown_on_signal()
        .run(reconcile_repository, repository_error_policy, state.clone())
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!("Reconciled: {}", obj),
                Err(e) => warn!("Reconcile error: {:?}", e),
            }
        });

    let policy_controller = Controller::new(policies, watcher::Config::default());
    let policy_store = policy_controller.store();
    let policy_controller = policy_controller
        .watches(repositories, watcher::Config::default(), move |repository| {
            policies_for_repository(&policy_store.state(), &repository)
        })
        .with_config(controller::Config::default().concurrency(concurrency))
        .shutdown_on_signal()
        .run(reconcile_policy, policy_error_policy, state)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!("Reconciled: {}", obj),
                Err(e) => warn!("Reconcile error: {:?}", e),
            }
        });

    futures::join!(repository_controller, policy_controller);
    info!("Controllers stopped");
    Ok(())
}

/// Reconcile an ImageRepository
///
/// Called on every change to the object and whenever its requeue timer expires.
#[instrument(skip(obj, ctx), fields(name = %obj.name_any(), namespace = obj.namespace()))]
async fn reconcile_repository(
    obj: Arc<ImageRepository>,
    ctx: Arc<ControllerState>,
) -> Result<Action> {
    if !ctx.is_leader.load(Ordering::Relaxed) {
        return Ok(Action::requeue(STANDBY_REQUEUE));
    }

    let started = Instant::now();
    let key = failure_key(obj.as_ref());
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<ImageRepository> = Api::namespaced(ctx.client.clone(), &namespace);

    if is_being_deleted(&obj) {
        info!("ImageRepository is being deleted");
    } else if !has_finalizer(&obj) {
        debug!("Adding finalizer {}", IMAGE_REPOSITORY_FINALIZER);
    }

    let result = finalizer(&api, IMAGE_REPOSITORY_FINALIZER, obj, |event| async {
        match event {
            FinalizerEvent::Apply(repo) => apply_repository(&ctx, &api, &repo).await,
            FinalizerEvent::Cleanup(repo) => cleanup_repository(&repo).await,
        }
    })
    .await
    .map_err(Error::from);

    finish(&ctx, REPOSITORY_CONTROLLER, &key, started, &result);
    result
}

async fn apply_repository(
    ctx: &ControllerState,
    api: &Api<ImageRepository>,
    repo: &ImageRepository,
) -> Result<Action> {
    let pass = evaluate_repository(repo, &ctx.scanner, Utc::now()).await;

    #[cfg(feature = "metrics")]
    {
        let namespace = repo.namespace().unwrap_or_default();
        let name = repo.name_any();
        let ready = super::conditions::is_condition_true(
            &pass.status.conditions,
            super::conditions::CONDITION_TYPE_READY,
        );
        super::metrics::set_resource_ready("ImageRepository", &namespace, &name, ready);
        let suspended = repo.spec.suspend;
        super::metrics::set_resource_suspended("ImageRepository", &namespace, &name, suspended);
        if let (true, Some(result)) = (pass.scanned && ready, &pass.status.last_scan_result) {
            super::metrics::set_scanned_tags(&namespace, &name, result.tag_count);
        }
    }
    count_config_error(REPOSITORY_CONTROLLER, pass.error_kind);

    if repo.status.as_ref() != Some(&pass.status) {
        let mut updated = repo.clone();
        updated.status = Some(pass.status);
        replace_status(api, "ImageRepository", &updated).await?;
        publish(ctx, repo, pass.event).await;
    }

    into_action(pass.next)
}

#[instrument(skip(repo), fields(name = %repo.name_any(), namespace = repo.namespace()))]
async fn cleanup_repository(repo: &ImageRepository) -> Result<Action> {
    info!(
        canonical_name = repo.canonical_image_name(),
        "ImageRepository deleted, keeping stored tags"
    );
    #[cfg(feature = "metrics")]
    super::metrics::forget_resource(
        "ImageRepository",
        &repo.namespace().unwrap_or_default(),
        &repo.name_any(),
    );
    Ok(Action::await_change())
}

/// Reconcile an ImagePolicy
///
/// Called on every change to the policy or to the ImageRepository it references.
#[instrument(skip(obj, ctx), fields(name = %obj.name_any(), namespace = obj.namespace()))]
async fn reconcile_policy(obj: Arc<ImagePolicy>, ctx: Arc<ControllerState>) -> Result<Action> {
    if !ctx.is_leader.load(Ordering::Relaxed) {
        return Ok(Action::requeue(STANDBY_REQUEUE));
    }

    let started = Instant::now();
    let key = failure_key(obj.as_ref());
    let result = apply_policy(&ctx, &obj).await;
    finish(&ctx, POLICY_CONTROLLER, &key, started, &result);
    result
}

async fn apply_policy(ctx: &ControllerState, policy: &ImagePolicy) -> Result<Action> {
    let namespace = policy.namespace().unwrap_or_else(|| "default".to_string());
    let repo_namespace = policy.repository_namespace().unwrap_or_else(|| namespace.clone());
    let repo_name = &policy.spec.image_repository_ref.name;

    let repositories: Api<ImageRepository> = Api::namespaced(ctx.client.clone(), &repo_namespace);
    let repository = repositories
        .get(repo_name)
        .await
        .map_err(|e| Error::from_kube(e, "ImageRepository", &repo_namespace, repo_name));

    let pass = {
        let owned = policy.clone();
        let store = ctx.store.clone();
        run_blocking(repo_name, move || Ok(evaluate_policy(&owned, repository, store.as_ref())))
            .await?
    };

    #[cfg(feature = "metrics")]
    super::metrics::set_resource_ready(
        "ImagePolicy",
        &namespace,
        &policy.name_any(),
        super::conditions::is_condition_true(
            &pass.status.conditions,
            super::conditions::CONDITION_TYPE_READY,
        ),
    );
    count_config_error(POLICY_CONTROLLER, pass.error_kind);

    if policy.status.as_ref() != Some(&pass.status) {
        let api: Api<ImagePolicy> = Api::namespaced(ctx.client.clone(), &namespace);
        let mut updated = policy.clone();
        updated.status = Some(pass.status);
        replace_status(&api, "ImagePolicy", &updated).await?;
        publish(ctx, policy, pass.event).await;
    }

    into_action(pass.next)
}

/// Write `obj`'s status, failing with [`Error::Conflict`] if it changed meanwhile
async fn replace_status<K>(api: &Api<K>, kind: &'static str, obj: &K) -> Result<()>
where
    K: Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned,
{
    let name = obj.name_any();
    let mut body = obj.clone();
    body.meta_mut().managed_fields = None;
    let data = serde_json::to_vec(&body)?;

    api.replace_status(&name, &PostParams::default(), data)
        .await
        .map_err(|e| {
            Error::from_kube(
                e,
                kind,
                obj.meta().namespace.as_deref().unwrap_or_default(),
                &name,
            )
        })?;
    Ok(())
}

async fn publish<K: Resource<DynamicType = ()>>(
    ctx: &ControllerState,
    obj: &K,
    event: Option<PendingEvent>,
) {
    if let Some(event) = event {
        ctx.events
            .publish(obj.object_ref(&()), event.event_type, &event.reason, &event.message)
            .await;
    }
}

fn into_action(next: Next) -> Result<Action> {
    match next {
        Next::Requeue(after) => Ok(Action::requeue(after)),
        Next::AwaitChange => Ok(Action::await_change()),
        Next::Retry(error) => Err(error),
    }
}

/// Errors that end a pass without failing it are counted here; the rest in the error policy
fn count_config_error(controller: &str, kind: Option<ErrorKind>) {
    if let Some(kind) = kind.filter(|k| !matches!(k, ErrorKind::Transient | ErrorKind::NotFound)) {
        debug!(controller, kind = kind.as_str(), "Pass ended without retry");
        #[cfg(feature = "metrics")]
        super::metrics::inc_reconcile_error(controller, kind.as_str());
    }
}

fn finish(
    ctx: &ControllerState,
    controller: &str,
    key: &str,
    started: Instant,
    result: &Result<Action>,
) {
    let elapsed = started.elapsed();
    if result.is_ok() {
        ctx.failures.reset(key);
    }
    debug!(
        controller,
        key,
        elapsed_ms = elapsed.as_millis() as u64,
        ok = result.is_ok(),
        "Pass finished"
    );
    #[cfg(feature = "metrics")]
    super::metrics::observe_reconcile_duration_seconds(controller, elapsed.as_secs_f64());
}

/// Requeue delay after a failed pass of the object identified by `key`
pub fn backoff_for(failures: &FailureTracker, key: &str, error: &Error) -> Duration {
    let attempt = failures.record(key);
    let delay = calculate_backoff(attempt, BACKOFF_BASE_SECS, BACKOFF_MAX_SECS);
    warn!(
        key,
        attempt,
        delay = ?delay,
        kind = error.kind().as_str(),
        "Reconciliation error: {}",
        error
    );
    delay
}

fn repository_error_policy(
    obj: Arc<ImageRepository>,
    error: &Error,
    ctx: Arc<ControllerState>,
) -> Action {
    #[cfg(feature = "metrics")]
    super::metrics::inc_reconcile_error(REPOSITORY_CONTROLLER, error.kind().as_str());
    Action::requeue(backoff_for(&ctx.failures, &failure_key(obj.as_ref()), error))
}

fn policy_error_policy(obj: Arc<ImagePolicy>, error: &Error, ctx: Arc<ControllerState>) -> Action {
    #[cfg(feature = "metrics")]
    super::metrics::inc_reconcile_error(POLICY_CONTROLLER, error.kind().as_str());
    Action::requeue(backoff_for(&ctx.failures, &failure_key(obj.as_ref()), error))
}
