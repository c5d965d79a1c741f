use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use super::PartitionStore;
use crate::error::Result;
use crate::model::{PartitionSet, RegionId};

/// Process-local store, lost on exit.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<RegionId, PartitionSet>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn remove(&self, id: &RegionId) -> Option<PartitionSet> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).remove(id)
    }
}

impl PartitionStore for MemoryStore {
    fn get(&self, id: &RegionId) -> Result<Option<PartitionSet>> {
        Ok(self.entries.lock().unwrap_or_else(PoisonError::into_inner).get(id).cloned())
    }

    fn put_if_absent(&self, set: PartitionSet) -> Result<PartitionSet> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.entry(set.region_id.clone()).or_insert(set).clone())
    }
}
