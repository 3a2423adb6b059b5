//! Tag storage
//!
//! Maps a canonical image name (`registry/repository`) to the tags found by
//! the last successful scan. Writes replace the whole list; a missing entry
//! reads as an empty list.

mod file;
mod memory;

pub use file::FileTagStore;
pub use memory::MemoryTagStore;

use crate::error::{Error, Result};

/// Durable mapping from canonical image name to its scanned tags
pub trait TagStore: Send + Sync {
    /// Replace the stored tags for `canonical_name`
    fn set_tags(&self, canonical_name: &str, tags: &[String]) -> Result<()>;

    /// Stored tags for `canonical_name`, empty if never scanned
    fn tags(&self, canonical_name: &str) -> Result<Vec<String>>;
}

/// Run a tag store operation on the blocking thread pool
///
/// File-backed stores do synchronous disk I/O that must not stall the
/// executor threads driving reconciles.
pub async fn run_blocking<T, F>(canonical_name: &str, op: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| Error::StoreError {
            name: canonical_name.to_string(),
            message: format!("store task did not complete: {e}"),
        })?
}
