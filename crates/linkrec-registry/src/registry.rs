//! Process-wide table of recoverable link termini.
//!
//! One mutex guards the identifier table and the suspended set. Every
//! mutation (register, steal, suspend, expire) completes under that lock;
//! callbacks into link objects run after it is released, using what the
//! critical section captured.
//!
//! Lock order is registry table, then terminus state. Termini never call
//! back into the registry.
//!
//! Expiry timers are fire-and-forget tokio tasks holding a weak reference to
//! the registry. A timer carries the epoch of the suspension that scheduled
//! it and is a no-op once the terminus has been re-associated or suspended
//! again.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use linkrec_core::{
    ConnectionId, ExpirationPolicy, LifecycleEvent, LinkIdentifier, LinkRecoveryError, LinkScope,
    SessionId,
};
use linkrec_store::{DeliveryStore, StoreError};

use crate::config::RegistryConfig;
use crate::error::RegistryError;
use crate::events::TerminusEvent;
use crate::link::RecoverableLink;
use crate::terminus::{LinkTerminus, TerminusPhase};

// ─── Table ───────────────────────────────────────────────────────────

struct Entry {
    terminus: Arc<LinkTerminus>,
    /// Where the most recent link was attached; `None` for seeded termini.
    scope: Option<LinkScope>,
    policy: ExpirationPolicy,
    timeout: Duration,
}

#[derive(Default)]
struct RegistryTable {
    entries: HashMap<LinkIdentifier, Entry>,
    /// Suspended identifiers and the epoch their expiry was scheduled under.
    suspended: HashMap<LinkIdentifier, u64>,
    /// Expired identifiers whose store records could not be dropped yet.
    purging: HashSet<LinkIdentifier>,
}

/// Expiry work decided under the lock and carried out after it.
enum PendingExpiry {
    Now { identifier: LinkIdentifier, epoch: u64 },
    After { identifier: LinkIdentifier, epoch: u64, delay: Duration },
}

/// Result of [`TerminusRegistry::suspend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendOutcome {
    /// No terminus is registered for the link's identifier.
    Unknown,
    /// The link no longer owns its terminus (it was stolen).
    NotAssociated,
    /// The policy does not qualify for the event; the terminus stays active.
    Retained,
    /// The terminus was already suspended.
    AlreadySuspended,
    /// Suspended with an expiry timer pending.
    Suspended,
    /// Zero timeout: expired on the spot.
    Expired,
}

/// Serializable view of one registry entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TerminusSnapshot {
    pub identifier: LinkIdentifier,
    pub phase: TerminusPhase,
    pub policy: ExpirationPolicy,
    pub timeout_ms: u64,
    pub scope: Option<LinkScope>,
    pub live_link: bool,
    pub suspended_at: Option<DateTime<Utc>>,
    pub unsettled: usize,
}

// ─── Registry ────────────────────────────────────────────────────────

pub struct TerminusRegistry {
    config: RegistryConfig,
    store: Arc<dyn DeliveryStore>,
    table: Mutex<RegistryTable>,
    events: broadcast::Sender<TerminusEvent>,
    this: Weak<TerminusRegistry>,
}

impl TerminusRegistry {
    pub fn new(config: RegistryConfig, store: Arc<dyn DeliveryStore>) -> Arc<Self> {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Arc::new_cyclic(|this| Self {
            config,
            store,
            table: Mutex::new(RegistryTable::default()),
            events,
            this: this.clone(),
        })
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn DeliveryStore> {
        &self.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TerminusEvent> {
        self.events.subscribe()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn try_get(&self, identifier: &LinkIdentifier) -> Option<Arc<LinkTerminus>> {
        self.lock()
            .entries
            .get(identifier)
            .map(|entry| Arc::clone(&entry.terminus))
    }

    pub fn is_suspended(&self, identifier: &LinkIdentifier) -> bool {
        self.lock().suspended.contains_key(identifier)
    }

    fn lock(&self) -> MutexGuard<'_, RegistryTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ─── Registration ────────────────────────────────────────────────

    /// Associate `link` with its terminus, creating the terminus if absent.
    ///
    /// A live link already associated with the identifier is stolen: it is
    /// closed with a link-stealing error and the new link takes over.
    pub fn register(
        &self,
        link: Arc<dyn RecoverableLink>,
    ) -> Result<Arc<LinkTerminus>, RegistryError> {
        self.register_inner(link, true)
    }

    /// Like [`register`](Self::register), but fails with `DuplicateTerminus`
    /// instead of stealing a live link.
    pub fn register_exclusive(
        &self,
        link: Arc<dyn RecoverableLink>,
    ) -> Result<Arc<LinkTerminus>, RegistryError> {
        self.register_inner(link, false)
    }

    fn register_inner(
        &self,
        link: Arc<dyn RecoverableLink>,
        allow_steal: bool,
    ) -> Result<Arc<LinkTerminus>, RegistryError> {
        let identifier = link.identifier().clone();
        let settings = link.settings();
        let (policy, timeout) = self.config.resolve(&settings);

        let (terminus, displaced) = {
            let mut table = self.lock();
            if !table.entries.contains_key(&identifier) {
                self.finish_purge(&mut table, &identifier)?;
            }

            let occupied = table.entries.get(&identifier).is_some_and(|entry| {
                entry.terminus.has_live_link() && !entry.terminus.is_associated_with(&link)
            });
            if occupied && !allow_steal {
                return Err(LinkRecoveryError::DuplicateTerminus {
                    identifier: identifier.to_string(),
                }
                .into());
            }

            let entry = table.entries.entry(identifier.clone()).or_insert_with(|| Entry {
                terminus: Arc::new(LinkTerminus::with_events(
                    identifier.clone(),
                    settings.clone(),
                    Arc::clone(&self.store),
                    self.events.clone(),
                )),
                scope: None,
                policy,
                timeout,
            });
            entry.scope = Some(link.scope());
            entry.policy = policy;
            entry.timeout = timeout;
            entry.terminus.update_settings(settings);

            let terminus = Arc::clone(&entry.terminus);
            let displaced = terminus.associate(Arc::clone(&link))?;
            table.suspended.remove(&identifier);
            (terminus, displaced)
        };

        if let Some(previous) = displaced {
            self.steal(&identifier, previous);
        }
        debug!("registered link {identifier} (policy {policy}, timeout {timeout:?})");
        Ok(terminus)
    }

    /// Close a displaced link. Failures are logged and swallowed.
    fn steal(&self, identifier: &LinkIdentifier, previous: Arc<dyn RecoverableLink>) {
        if !previous.is_open() {
            return;
        }
        info!("link {identifier} stolen by a newer attach");
        let error = LinkRecoveryError::LinkStolen {
            identifier: previous.identifier().to_string(),
        };
        if let Err(e) = previous.on_stolen(error) {
            warn!("closing stolen link {identifier} failed: {e}");
        }
        let _ = self.events.send(TerminusEvent::Stolen {
            identifier: identifier.clone(),
        });
    }

    // ─── Suspension ──────────────────────────────────────────────────

    /// Called when `link` detaches, or its session or connection ends.
    ///
    /// Only the link currently associated with the terminus can suspend it;
    /// a stolen link detaching late is ignored.
    pub fn suspend(
        &self,
        link: &Arc<dyn RecoverableLink>,
        event: LifecycleEvent,
    ) -> SuspendOutcome {
        let identifier = link.identifier();
        let pending = {
            let mut table = self.lock();
            let Some(entry) = table.entries.get(identifier) else {
                return SuspendOutcome::Unknown;
            };
            if !entry.terminus.is_associated_with(link) {
                return SuspendOutcome::NotAssociated;
            }
            if !entry.policy.qualifies(event) {
                debug!(
                    "terminus {identifier} retained: policy {} outlives {event}",
                    entry.policy
                );
                return SuspendOutcome::Retained;
            }
            match Self::suspend_entry(&mut table, identifier) {
                Some(pending) => pending,
                None => return SuspendOutcome::AlreadySuspended,
            }
        };

        if self.run_pending(pending) {
            SuspendOutcome::Expired
        } else {
            SuspendOutcome::Suspended
        }
    }

    /// Suspend every terminus attached on `session` whose policy qualifies
    /// for a session end. Returns how many were suspended.
    pub fn expire_for_session(&self, session: SessionId) -> usize {
        self.suspend_matching(LifecycleEvent::SessionEnd, |scope| scope.session == session)
    }

    /// Suspend every terminus attached on `connection` whose policy
    /// qualifies for a connection close. Returns how many were suspended.
    pub fn expire_for_connection(&self, connection: ConnectionId) -> usize {
        self.suspend_matching(LifecycleEvent::ConnectionClose, |scope| {
            scope.connection() == connection
        })
    }

    fn suspend_matching(
        &self,
        event: LifecycleEvent,
        in_scope: impl Fn(&LinkScope) -> bool,
    ) -> usize {
        let batch: Vec<PendingExpiry> = {
            let mut table = self.lock();
            let candidates: Vec<LinkIdentifier> = table
                .entries
                .iter()
                .filter(|(_, entry)| {
                    entry.scope.as_ref().is_some_and(&in_scope) && entry.policy.qualifies(event)
                })
                .map(|(identifier, _)| identifier.clone())
                .collect();
            candidates
                .iter()
                .filter_map(|identifier| Self::suspend_entry(&mut table, identifier))
                .collect()
        };

        let count = batch.len();
        if count > 0 {
            info!("{event}: suspending {count} termini");
        }
        for pending in batch {
            self.run_pending(pending);
        }
        count
    }

    fn suspend_entry(
        table: &mut RegistryTable,
        identifier: &LinkIdentifier,
    ) -> Option<PendingExpiry> {
        let entry = table.entries.get(identifier)?;
        let epoch = entry.terminus.suspend()?;
        let delay = entry.timeout;
        table.suspended.insert(identifier.clone(), epoch);

        let identifier = identifier.clone();
        Some(if delay.is_zero() {
            PendingExpiry::Now { identifier, epoch }
        } else {
            PendingExpiry::After {
                identifier,
                epoch,
                delay,
            }
        })
    }

    /// Returns whether the terminus was expired synchronously.
    fn run_pending(&self, pending: PendingExpiry) -> bool {
        match pending {
            PendingExpiry::Now { identifier, epoch } => self.expire_epoch(&identifier, epoch),
            PendingExpiry::After {
                identifier,
                epoch,
                delay,
            } => {
                self.schedule_expiry(identifier, epoch, delay);
                false
            }
        }
    }

    fn schedule_expiry(&self, identifier: LinkIdentifier, epoch: u64, delay: Duration) {
        let Ok(handle) = Handle::try_current() else {
            warn!("no tokio runtime: terminus {identifier} stays suspended until expired manually");
            return;
        };
        debug!("terminus {identifier} expires in {delay:?} unless reattached");
        let registry = self.this.clone();
        handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(registry) = registry.upgrade() {
                registry.expire_epoch(&identifier, epoch);
            }
        });
    }

    // ─── Expiry ──────────────────────────────────────────────────────

    /// Expire `identifier` if it is still suspended. Otherwise a no-op.
    pub fn expire(&self, identifier: &LinkIdentifier) -> bool {
        self.expire_checked(identifier, None)
    }

    fn expire_epoch(&self, identifier: &LinkIdentifier, epoch: u64) -> bool {
        self.expire_checked(identifier, Some(epoch))
    }

    fn expire_checked(&self, identifier: &LinkIdentifier, epoch: Option<u64>) -> bool {
        let mut table = self.lock();
        let Some(&suspended_epoch) = table.suspended.get(identifier) else {
            return false;
        };
        if epoch.is_some_and(|epoch| epoch != suspended_epoch) {
            return false;
        }
        table.suspended.remove(identifier);
        let Some(entry) = table.entries.remove(identifier) else {
            return false;
        };
        entry.terminus.expire_if(suspended_epoch);

        // Records go with the terminus. A new terminus for the same
        // identifier cannot be created until they are gone.
        match self.store.remove_all(identifier) {
            Ok(removed) => {
                info!("terminus {identifier} expired ({removed} unsettled deliveries dropped)");
            }
            Err(e) => {
                warn!("terminus {identifier} expired; dropping its deliveries failed: {e}");
                table.purging.insert(identifier.clone());
            }
        }
        true
    }

    /// Retry dropping the records of an expired terminus before its
    /// identifier is reused.
    fn finish_purge(
        &self,
        table: &mut RegistryTable,
        identifier: &LinkIdentifier,
    ) -> Result<(), StoreError> {
        if !table.purging.contains(identifier) {
            return Ok(());
        }
        let removed = self.store.remove_all(identifier)?;
        table.purging.remove(identifier);
        info!("dropped {removed} deliveries left by expired terminus {identifier}");
        Ok(())
    }

    /// Whether an expired terminus still has records awaiting removal.
    pub fn is_purge_pending(&self, identifier: &LinkIdentifier) -> bool {
        self.lock().purging.contains(identifier)
    }

    // ─── Administration ──────────────────────────────────────────────

    /// Insert a pre-built terminus if its identifier is absent.
    ///
    /// A suspended terminus gets an expiry scheduled as if it had just been
    /// suspended. Expired termini are refused.
    pub fn try_add(&self, terminus: Arc<LinkTerminus>) -> bool {
        let identifier = terminus.identifier().clone();
        let (policy, timeout) = self.config.resolve(&terminus.settings());

        let pending = {
            let mut table = self.lock();
            if table.entries.contains_key(&identifier) {
                return false;
            }
            if let Err(e) = self.finish_purge(&mut table, &identifier) {
                warn!("cannot add terminus {identifier}: stale deliveries remain: {e}");
                return false;
            }
            let phase = terminus.phase();
            if phase == TerminusPhase::Expired {
                return false;
            }
            let epoch = terminus.epoch();
            table.entries.insert(
                identifier.clone(),
                Entry {
                    terminus,
                    scope: None,
                    policy,
                    timeout,
                },
            );
            if phase != TerminusPhase::Suspended {
                None
            } else {
                table.suspended.insert(identifier.clone(), epoch);
                Some(if timeout.is_zero() {
                    PendingExpiry::Now { identifier, epoch }
                } else {
                    PendingExpiry::After {
                        identifier,
                        epoch,
                        delay: timeout,
                    }
                })
            }
        };

        if let Some(pending) = pending {
            self.run_pending(pending);
        }
        true
    }

    /// Remove an entry outright, cancelling any pending expiry. Its delivery
    /// records stay in the store.
    pub fn try_remove(&self, identifier: &LinkIdentifier) -> Option<Arc<LinkTerminus>> {
        let mut table = self.lock();
        table.suspended.remove(identifier);
        table.entries.remove(identifier).map(|entry| entry.terminus)
    }

    /// All entries, sorted by identifier.
    pub fn snapshot(&self) -> Vec<TerminusSnapshot> {
        let entries: Vec<(Arc<LinkTerminus>, Option<LinkScope>, ExpirationPolicy, Duration)> = {
            let table = self.lock();
            table
                .entries
                .values()
                .map(|entry| {
                    (
                        Arc::clone(&entry.terminus),
                        entry.scope,
                        entry.policy,
                        entry.timeout,
                    )
                })
                .collect()
        };

        let mut snapshots: Vec<TerminusSnapshot> = entries
            .into_iter()
            .map(|(terminus, scope, policy, timeout)| {
                let unsettled = terminus.deliveries().map(|d| d.len()).unwrap_or_else(|e| {
                    warn!("snapshot of {}: {e}", terminus.identifier());
                    0
                });
                TerminusSnapshot {
                    identifier: terminus.identifier().clone(),
                    phase: terminus.phase(),
                    policy,
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    scope,
                    live_link: terminus.has_live_link(),
                    suspended_at: terminus.suspended_at(),
                    unsettled,
                }
            })
            .collect();
        snapshots.sort_by_cached_key(|s| {
            (
                s.identifier.name().to_lowercase(),
                s.identifier.container_id().map(str::to_lowercase),
                s.identifier.role(),
            )
        });
        snapshots
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
