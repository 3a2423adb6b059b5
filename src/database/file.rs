//! File-backed tag store.
//!
//! One JSON document per canonical name, named after the SHA-256 of the name.
//! Writes land in a temporary file in the same directory and are renamed into
//! place, so a reader sees either the previous or the new tag list.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::debug;

use super::TagStore;
use crate::error::{Error, Result};

#[derive(Debug, Serialize, Deserialize)]
struct TagRecord {
    name: String,
    tags: Vec<String>,
}

/// Tag store persisted under a directory
#[derive(Debug, Clone)]
pub struct FileTagStore {
    dir: PathBuf,
}

impl FileTagStore {
    /// Open (and create if needed) a store rooted at `dir`
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| Error::StoreError {
            name: dir.display().to_string(),
            message: format!("cannot create storage directory: {e}"),
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, canonical_name: &str) -> PathBuf {
        let digest = Sha256::digest(canonical_name.as_bytes());
        self.dir.join(format!("{}.json", hex::encode(digest)))
    }
}

fn store_error(name: &str, message: impl std::fmt::Display) -> Error {
    Error::StoreError {
        name: name.to_string(),
        message: message.to_string(),
    }
}

impl TagStore for FileTagStore {
    fn set_tags(&self, canonical_name: &str, tags: &[String]) -> Result<()> {
        let record = TagRecord {
            name: canonical_name.to_string(),
            tags: tags.to_vec(),
        };
        let body = serde_json::to_vec(&record)?;

        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(|e| store_error(canonical_name, e))?;
        tmp.write_all(&body)
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| store_error(canonical_name, e))?;

        let path = self.path_for(canonical_name);
        tmp.persist(&path)
            .map_err(|e| store_error(canonical_name, e.error))?;

        debug!(name = canonical_name, count = tags.len(), "Stored tags");
        Ok(())
    }

    fn tags(&self, canonical_name: &str) -> Result<Vec<String>> {
        let path = self.path_for(canonical_name);
        let body = match std::fs::read(&path) {
            Ok(body) => body,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(store_error(canonical_name, e)),
        };

        let record: TagRecord = serde_json::from_slice(&body)
            .map_err(|e| store_error(canonical_name, format!("corrupt record: {e}")))?;
        if record.name != canonical_name {
            return Err(store_error(
                canonical_name,
                format!("record at {} belongs to {}", path.display(), record.name),
            ));
        }
        Ok(record.tags)
    }
}
