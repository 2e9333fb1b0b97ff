//! Delivery store contract and implementations.
//!
//! A store holds the unsettled [`DeliveryRecord`]s of every terminus, keyed
//! by `(terminus, tag)`. Termini own no deliveries themselves, so a store is
//! shared by the whole registry and must serialize access per tag.

pub mod error;
pub mod memory;
pub mod sqlite;

use std::collections::BTreeMap;

use linkrec_core::{DeliveryRecord, DeliveryTag, LinkIdentifier};

pub use error::StoreError;
pub use memory::InMemoryDeliveryStore;
pub use sqlite::SqliteDeliveryStore;

/// Key/value contract for unsettled deliveries.
///
/// Implementations reject saves that would move a record backwards (see
/// [`DeliveryState::can_advance_to`](linkrec_core::DeliveryState::can_advance_to)).
pub trait DeliveryStore: Send + Sync {
    /// Insert or update the record for `record.tag`.
    fn save(&self, terminus: &LinkIdentifier, record: &DeliveryRecord) -> Result<(), StoreError>;

    fn retrieve(
        &self,
        terminus: &LinkIdentifier,
        tag: &DeliveryTag,
    ) -> Result<Option<DeliveryRecord>, StoreError>;

    fn retrieve_all(
        &self,
        terminus: &LinkIdentifier,
    ) -> Result<BTreeMap<DeliveryTag, DeliveryRecord>, StoreError>;

    /// Remove one record. Returns whether it existed.
    fn remove(&self, terminus: &LinkIdentifier, tag: &DeliveryTag) -> Result<bool, StoreError>;

    /// Remove every record of a terminus. Returns how many were removed.
    fn remove_all(&self, terminus: &LinkIdentifier) -> Result<usize, StoreError>;
}

/// Reject `next` if it would move an existing record backwards.
pub(crate) fn check_transition(
    existing: Option<&DeliveryRecord>,
    next: &DeliveryRecord,
) -> Result<(), StoreError> {
    if let Some(existing) = existing {
        let mut probe = existing.clone();
        probe.advance(next.state)?;
    }
    Ok(())
}
