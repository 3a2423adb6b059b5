use std::collections::HashMap;

use parking_lot::RwLock;

use super::TagStore;
use crate::error::Result;

/// Process-local tag store, used in tests and with `--storage-backend memory`
#[derive(Debug, Default)]
pub struct MemoryTagStore {
    entries: RwLock<HashMap<String, Vec<String>>>,
}

impl MemoryTagStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TagStore for MemoryTagStore {
    fn set_tags(&self, canonical_name: &str, tags: &[String]) -> Result<()> {
        self.entries
            .write()
            .insert(canonical_name.to_string(), tags.to_vec());
        Ok(())
    }

    fn tags(&self, canonical_name: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .read()
            .get(canonical_name)
            .cloned()
            .unwrap_or_default())
    }
}
