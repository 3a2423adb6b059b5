//! Controller module for ImageRepository and ImagePolicy reconciliation
//!
//! This module contains the controller loops, the scan and policy passes
//! they run, and the pieces those passes are built from.

pub mod conditions;
mod credentials;
pub mod events;
#[cfg(test)]
mod fakes;
mod finalizers;
#[cfg(feature = "metrics")]
pub mod metrics;
mod policy;
mod reconciler;
mod repository;
mod scanner;
mod scheduler;
pub mod secrets;

pub use credentials::CredentialResolver;
pub use events::{EventSink, EventType, KubeEventSink};
pub use finalizers::IMAGE_REPOSITORY_FINALIZER;
pub use policy::{evaluate_policy, policies_for_repository, PolicyPass};
pub use reconciler::{
    calculate_backoff, run_controllers, ControllerOptions, ControllerState, FailureTracker,
    BACKOFF_BASE_SECS, BACKOFF_MAX_SECS,
};
pub use repository::{evaluate_repository, Next, PendingEvent, RepositoryPass};
pub use scanner::{compile_exclusions, filter_tags, RegistryScanner};
pub use scheduler::{should_scan, ScanDecision};
pub use secrets::{KubeObjectSource, ObjectSource};
