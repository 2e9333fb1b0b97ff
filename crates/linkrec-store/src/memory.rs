//! In-memory delivery store.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use linkrec_core::{DeliveryRecord, DeliveryTag, LinkIdentifier};

use crate::{DeliveryStore, StoreError, check_transition};

type Records = HashMap<LinkIdentifier, BTreeMap<DeliveryTag, DeliveryRecord>>;

/// Process-local store. Records vanish with the process.
#[derive(Debug, Default)]
pub struct InMemoryDeliveryStore {
    records: Mutex<Records>,
}

impl InMemoryDeliveryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of termini with at least one record.
    pub fn terminus_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, Records> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DeliveryStore for InMemoryDeliveryStore {
    fn save(&self, terminus: &LinkIdentifier, record: &DeliveryRecord) -> Result<(), StoreError> {
        let mut records = self.lock();
        let entry = records.entry(terminus.clone()).or_default();
        check_transition(entry.get(&record.tag), record)?;
        entry.insert(record.tag.clone(), record.clone());
        Ok(())
    }

    fn retrieve(
        &self,
        terminus: &LinkIdentifier,
        tag: &DeliveryTag,
    ) -> Result<Option<DeliveryRecord>, StoreError> {
        Ok(self
            .lock()
            .get(terminus)
            .and_then(|records| records.get(tag))
            .cloned())
    }

    fn retrieve_all(
        &self,
        terminus: &LinkIdentifier,
    ) -> Result<BTreeMap<DeliveryTag, DeliveryRecord>, StoreError> {
        Ok(self.lock().get(terminus).cloned().unwrap_or_default())
    }

    fn remove(&self, terminus: &LinkIdentifier, tag: &DeliveryTag) -> Result<bool, StoreError> {
        let mut records = self.lock();
        let Some(entry) = records.get_mut(terminus) else {
            return Ok(false);
        };
        let removed = entry.remove(tag).is_some();
        if entry.is_empty() {
            records.remove(terminus);
        }
        Ok(removed)
    }

    fn remove_all(&self, terminus: &LinkIdentifier) -> Result<usize, StoreError> {
        Ok(self
            .lock()
            .remove(terminus)
            .map(|records| records.len())
            .unwrap_or(0))
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
