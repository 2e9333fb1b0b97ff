//! A recoverable link terminus.
//!
//! The terminus is the durable side of a link endpoint: its identifier, the
//! latest negotiated settings and a handle to the delivery store. It owns no
//! deliveries itself, so creating or replacing one is cheap.
//!
//! ```text
//! Active ──suspend──▶ Suspended ──expire──▶ Expired
//!    ▲                    │
//!    └─────associate──────┘
//! ```
//!
//! Each suspension bumps an epoch. A delayed expiry carries the epoch it was
//! scheduled under and is ignored once the terminus has moved on.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use linkrec_core::{
    DeliveryRecord, DeliveryState, DeliveryTag, LinkIdentifier, LinkRecoveryError, LinkSettings,
    UnsettledMap,
};
use linkrec_store::{DeliveryStore, StoreError};

use crate::events::TerminusEvent;
use crate::link::RecoverableLink;

/// Default capacity for a standalone terminus' event channel.
const STANDALONE_EVENT_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminusPhase {
    Active,
    Suspended,
    Expired,
}

struct TerminusState {
    link: Option<Arc<dyn RecoverableLink>>,
    phase: TerminusPhase,
    epoch: u64,
    suspended_at: Option<DateTime<Utc>>,
}

pub struct LinkTerminus {
    identifier: LinkIdentifier,
    settings: Mutex<LinkSettings>,
    store: Arc<dyn DeliveryStore>,
    state: Mutex<TerminusState>,
    events: broadcast::Sender<TerminusEvent>,
}

impl LinkTerminus {
    /// Standalone terminus with its own event channel.
    pub fn create(
        identifier: LinkIdentifier,
        settings: LinkSettings,
        store: Arc<dyn DeliveryStore>,
    ) -> Self {
        let (events, _) = broadcast::channel(STANDALONE_EVENT_CAPACITY);
        Self::with_events(identifier, settings, store, events)
    }

    /// Terminus publishing on a shared (registry) event channel.
    pub fn with_events(
        identifier: LinkIdentifier,
        settings: LinkSettings,
        store: Arc<dyn DeliveryStore>,
        events: broadcast::Sender<TerminusEvent>,
    ) -> Self {
        Self {
            identifier,
            settings: Mutex::new(settings),
            store,
            state: Mutex::new(TerminusState {
                link: None,
                phase: TerminusPhase::Active,
                epoch: 0,
                suspended_at: None,
            }),
            events,
        }
    }

    pub fn identifier(&self) -> &LinkIdentifier {
        &self.identifier
    }

    pub fn settings(&self) -> LinkSettings {
        self.settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Refresh settings from a newer attach.
    pub fn update_settings(&self, settings: LinkSettings) {
        *self.settings.lock().unwrap_or_else(PoisonError::into_inner) = settings;
    }

    pub fn store(&self) -> &Arc<dyn DeliveryStore> {
        &self.store
    }

    pub fn phase(&self) -> TerminusPhase {
        self.lock().phase
    }

    pub fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    pub fn suspended_at(&self) -> Option<DateTime<Utc>> {
        self.lock().suspended_at
    }

    pub fn current_link(&self) -> Option<Arc<dyn RecoverableLink>> {
        self.lock().link.clone()
    }

    /// Whether `link` is the link currently associated with this terminus.
    pub fn is_associated_with(&self, link: &Arc<dyn RecoverableLink>) -> bool {
        self.lock()
            .link
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, link))
    }

    /// Whether an open link is currently associated.
    pub fn has_live_link(&self) -> bool {
        self.lock().link.as_ref().is_some_and(|link| link.is_open())
    }

    // ─── Lifecycle ───────────────────────────────────────────────────

    /// Associate `link`, returning the link it displaces. Clears any
    /// pending suspension.
    ///
    /// The caller is responsible for stealing the displaced link.
    pub fn associate(
        &self,
        link: Arc<dyn RecoverableLink>,
    ) -> Result<Option<Arc<dyn RecoverableLink>>, LinkRecoveryError> {
        let displaced = {
            let mut state = self.lock();
            if state.phase == TerminusPhase::Expired {
                return Err(LinkRecoveryError::TerminusExpired {
                    identifier: self.identifier.to_string(),
                });
            }
            if state.phase == TerminusPhase::Suspended {
                // Invalidate the pending expiry.
                state.epoch += 1;
            }
            state.phase = TerminusPhase::Active;
            state.suspended_at = None;
            let previous = state.link.replace(Arc::clone(&link));
            previous.filter(|previous| !Arc::ptr_eq(previous, &link))
        };

        debug!("associated link with terminus {}", self.identifier);
        self.emit(TerminusEvent::Associated {
            identifier: self.identifier.clone(),
        });
        Ok(displaced)
    }

    /// Mark the terminus inactive, keeping its deliveries.
    ///
    /// Returns the new suspension epoch, or `None` when already suspended or
    /// expired.
    pub fn suspend(&self) -> Option<u64> {
        let epoch = {
            let mut state = self.lock();
            if state.phase != TerminusPhase::Active {
                return None;
            }
            state.epoch += 1;
            state.phase = TerminusPhase::Suspended;
            state.suspended_at = Some(Utc::now());
            state.link = None;
            state.epoch
        };

        debug!("suspended terminus {} (epoch {epoch})", self.identifier);
        self.emit(TerminusEvent::Suspended {
            identifier: self.identifier.clone(),
            epoch,
        });
        Some(epoch)
    }

    /// Expire the terminus if it is still suspended.
    pub fn expire(&self) -> bool {
        self.expire_matching(None)
    }

    /// Expire only if still suspended under `epoch`.
    pub fn expire_if(&self, epoch: u64) -> bool {
        self.expire_matching(Some(epoch))
    }

    fn expire_matching(&self, epoch: Option<u64>) -> bool {
        {
            let mut state = self.lock();
            if state.phase != TerminusPhase::Suspended {
                return false;
            }
            if epoch.is_some_and(|epoch| epoch != state.epoch) {
                return false;
            }
            state.phase = TerminusPhase::Expired;
        }

        debug!("expired terminus {}", self.identifier);
        self.emit(TerminusEvent::Expired {
            identifier: self.identifier.clone(),
        });
        true
    }

    fn emit(&self, event: TerminusEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn lock(&self) -> MutexGuard<'_, TerminusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ─── Deliveries ──────────────────────────────────────────────────

    /// Record `state` for `tag`, moving an existing record forward.
    pub fn record_delivery(
        &self,
        tag: DeliveryTag,
        state: DeliveryState,
    ) -> Result<(), StoreError> {
        let record = match self.store.retrieve(&self.identifier, &tag)? {
            Some(mut existing) => {
                existing.advance(state)?;
                existing
            }
            None => DeliveryRecord::new(tag, state),
        };
        self.store.save(&self.identifier, &record)
    }

    /// Drop the record for a delivery both sides have settled.
    pub fn settle(&self, tag: &DeliveryTag) -> Result<bool, StoreError> {
        self.store.remove(&self.identifier, tag)
    }

    pub fn deliveries(&self) -> Result<BTreeMap<DeliveryTag, DeliveryRecord>, StoreError> {
        self.store.retrieve_all(&self.identifier)
    }

    /// Unsettled map for an outgoing attach.
    pub fn unsettled_map(&self) -> Result<UnsettledMap, StoreError> {
        Ok(self
            .deliveries()?
            .into_iter()
            .map(|(tag, record)| (tag, record.state))
            .collect())
    }
}

impl std::fmt::Debug for LinkTerminus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("LinkTerminus")
            .field("identifier", &self.identifier)
            .field("phase", &state.phase)
            .field("epoch", &state.epoch)
            .field("linked", &state.link.is_some())
            .finish()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
