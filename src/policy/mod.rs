//! Latest-tag selection
//!
//! [`evaluate`] narrows a stored tag list with an optional [`TagFilter`] and
//! then lets the policy's ordering strategy pick one tag.

mod filter;
mod ordering;

pub use filter::{unfiltered, Candidate, RegexFilter};
pub use ordering::{parse_version, Policer, VersionRange};

use crate::crd::{ImagePolicyChoice, TagFilter};
use crate::error::Result;

/// Select the latest tag, or `None` when no tag qualifies
///
/// Errors only for a malformed filter pattern or version range.
pub fn evaluate(
    tags: &[String],
    filter: Option<&TagFilter>,
    choice: &ImagePolicyChoice,
) -> Result<Option<String>> {
    let policer = Policer::from_choice(choice)?;
    let candidates = match filter {
        Some(filter) => RegexFilter::new(filter)?.apply(tags),
        None => unfiltered(tags),
    };

    let latest = policer.latest(candidates.iter().map(|c| c.key.as_str()));
    Ok(latest.and_then(|key| {
        candidates
            .iter()
            .find(|c| c.key == key)
            .map(|c| c.tag.clone())
    }))
}
