//! Prometheus metrics for the image reflector
//!
//! # Exported metrics
//! The `/metrics` endpoint (when built with `--features metrics`) exports the following metrics:
//! - `image_reflector_reconcile_duration_seconds` (histogram): reconcile
//!   duration labeled by controller.
//! - `image_reflector_reconcile_errors_total` (counter): reconcile errors
//!   labeled by controller and kind.
//! - `image_reflector_resource_ready` (gauge): 1 when the resource's Ready condition is True.
//! - `image_reflector_resource_suspended` (gauge): 1 when the resource is suspended.
//! - `image_reflector_scanned_tags` (gauge): tags stored by the last successful scan.

use std::sync::atomic::{AtomicI64, AtomicU64};

use once_cell::sync::Lazy;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

/// Labels for operator reconcile metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReconcileLabels {
    /// Controller name, e.g. "imagerepository"
    pub controller: String,
}

/// Labels for operator error metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub controller: String,
    /// Error kind, e.g. "transient", "configuration"
    pub kind: String,
}

/// Labels identifying one custom resource
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ResourceLabels {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RepositoryLabels {
    pub namespace: String,
    pub name: String,
}

/// Histogram tracking reconcile duration (seconds)
pub static RECONCILE_DURATION_SECONDS: Lazy<Family<ReconcileLabels, Histogram>> = Lazy::new(|| {
    fn reconcile_histogram() -> Histogram {
        // 1ms .. ~32s across 16 buckets.
        Histogram::new(exponential_buckets(0.001, 2.0, 16))
    }

    Family::new_with_constructor(reconcile_histogram)
});

/// Counter tracking reconcile errors
pub static RECONCILE_ERRORS_TOTAL: Lazy<Family<ErrorLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static RESOURCE_READY: Lazy<Family<ResourceLabels, Gauge<i64, AtomicI64>>> =
    Lazy::new(Family::default);

pub static RESOURCE_SUSPENDED: Lazy<Family<ResourceLabels, Gauge<i64, AtomicI64>>> =
    Lazy::new(Family::default);

pub static SCANNED_TAGS: Lazy<Family<RepositoryLabels, Gauge<i64, AtomicI64>>> =
    Lazy::new(Family::default);

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::default();

    registry.register(
        "image_reflector_reconcile_duration_seconds",
        "Duration of reconcile loops in seconds",
        RECONCILE_DURATION_SECONDS.clone(),
    );
    registry.register(
        "image_reflector_reconcile_errors_total",
        "Total number of reconcile errors",
        RECONCILE_ERRORS_TOTAL.clone(),
    );
    registry.register(
        "image_reflector_resource_ready",
        "Whether the resource's Ready condition is True",
        RESOURCE_READY.clone(),
    );
    registry.register(
        "image_reflector_resource_suspended",
        "Whether reconciliation of the resource is suspended",
        RESOURCE_SUSPENDED.clone(),
    );
    registry.register(
        "image_reflector_scanned_tags",
        "Number of tags stored by the last successful scan",
        SCANNED_TAGS.clone(),
    );

    registry
});

/// Observe a reconcile duration in seconds.
pub fn observe_reconcile_duration_seconds(controller: &str, seconds: f64) {
    let labels = ReconcileLabels {
        controller: controller.to_string(),
    };
    RECONCILE_DURATION_SECONDS
        .get_or_create(&labels)
        .observe(seconds);
}

/// Increment the reconcile error counter.
pub fn inc_reconcile_error(controller: &str, kind: &str) {
    let labels = ErrorLabels {
        controller: controller.to_string(),
        kind: kind.to_string(),
    };
    RECONCILE_ERRORS_TOTAL.get_or_create(&labels).inc();
}

fn resource_labels(kind: &str, namespace: &str, name: &str) -> ResourceLabels {
    ResourceLabels {
        kind: kind.to_string(),
        namespace: namespace.to_string(),
        name: name.to_string(),
    }
}

pub fn set_resource_ready(kind: &str, namespace: &str, name: &str, ready: bool) {
    RESOURCE_READY
        .get_or_create(&resource_labels(kind, namespace, name))
        .set(i64::from(ready));
}

pub fn set_resource_suspended(kind: &str, namespace: &str, name: &str, suspended: bool) {
    RESOURCE_SUSPENDED
        .get_or_create(&resource_labels(kind, namespace, name))
        .set(i64::from(suspended));
}

pub fn set_scanned_tags(namespace: &str, name: &str, count: usize) {
    let labels = RepositoryLabels {
        namespace: namespace.to_string(),
        name: name.to_string(),
    };
    SCANNED_TAGS
        .get_or_create(&labels)
        .set(i64::try_from(count).unwrap_or(i64::MAX));
}

/// Drop every series of a deleted resource
pub fn forget_resource(kind: &str, namespace: &str, name: &str) {
    let labels = resource_labels(kind, namespace, name);
    RESOURCE_READY.remove(&labels);
    RESOURCE_SUSPENDED.remove(&labels);
    SCANNED_TAGS.remove(&RepositoryLabels {
        namespace: namespace.to_string(),
        name: name.to_string(),
    });
}
