//! Scan throttling
//!
//! Decides whether an ImageRepository is due for a scan, given its `.spec`,
//! its recorded status and the current time. No side effects; the only I/O
//! is a tag store read.

use std::time::Duration;

use chrono::{DateTime, Utc};

use super::conditions::{is_condition_true, CONDITION_TYPE_READY};
use crate::crd::{ImageRepositorySpec, ImageRepositoryStatus};
use crate::database::TagStore;
use crate::error::Result;

/// Remainders below this are treated as due, avoiding sub-second requeues
const MIN_WAIT: Duration = Duration::from_secs(1);

/// Whether to scan now, and how long until the next check
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScanDecision {
    pub due: bool,
    pub wait: Duration,
}

impl ScanDecision {
    fn now(interval: Duration) -> Self {
        Self {
            due: true,
            wait: interval,
        }
    }
}

/// Evaluate the scan rules in order:
///
/// 1. never scanned
/// 2. a reconcile request token not yet handled
/// 3. the spec changed since the last pass (`generation` not yet observed)
/// 4. the last pass did not end Ready, i.e. it failed or was suspended
/// 5. the last scan found tags but the store has none (store reset)
/// 6. the interval has elapsed, give or take a second
///
/// Rule 4 only fires on passes the controller schedules itself (error
/// backoff) or that a spec change triggers; status-only updates never start
/// a pass.
///
/// A tag store error is returned, never treated as due.
pub fn should_scan(
    spec: &ImageRepositorySpec,
    status: &ImageRepositoryStatus,
    generation: Option<i64>,
    reconcile_request: Option<&str>,
    store: &dyn TagStore,
    now: DateTime<Utc>,
) -> Result<ScanDecision> {
    let interval = spec.interval()?;

    let Some(last_scan) = &status.last_scan_result else {
        return Ok(ScanDecision::now(interval));
    };

    if let Some(token) = reconcile_request {
        if status.last_handled_reconcile_at.as_deref() != Some(token) {
            return Ok(ScanDecision::now(interval));
        }
    }

    if status.observed_generation != generation
        || !is_condition_true(&status.conditions, CONDITION_TYPE_READY)
    {
        return Ok(ScanDecision::now(interval));
    }

    // A scan that legitimately found nothing must not make every pass due
    let canonical_name = status.canonical_image_name.as_deref().unwrap_or_default();
    if last_scan.tag_count > 0 && store.tags(canonical_name)?.is_empty() {
        return Ok(ScanDecision::now(interval));
    }

    let elapsed = (now - last_scan.scan_time).to_std().unwrap_or(Duration::ZERO);
    match interval.checked_sub(elapsed) {
        Some(remaining) if remaining >= MIN_WAIT => Ok(ScanDecision {
            due: false,
            wait: remaining,
        }),
        _ => Ok(ScanDecision::now(interval)),
    }
}
