//! The live-link side of recovery.
//!
//! The registry never owns links. It holds `Arc<dyn RecoverableLink>`
//! handles for the currently associated link of each terminus, and the
//! link finds its terminus again through its identifier.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use linkrec_core::{LinkIdentifier, LinkRecoveryError, LinkScope, LinkSettings};

pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// A live link endpoint as seen by the registry.
pub trait RecoverableLink: Send + Sync + fmt::Debug {
    fn identifier(&self) -> &LinkIdentifier;

    /// Local settings negotiated for this link.
    fn settings(&self) -> LinkSettings;

    /// Session and connection the link is attached on.
    fn scope(&self) -> LinkScope;

    fn is_open(&self) -> bool;

    /// Force the link into its closed state because a newer link took over
    /// its terminus. Errors are logged by the registry and otherwise ignored.
    fn on_stolen(&self, error: LinkRecoveryError) -> Result<(), CallbackError>;
}

// ─── LocalLink ───────────────────────────────────────────────────────

/// A link handle whose lifecycle is driven directly by the caller.
///
/// Used by the simulator and in tests; protocol engines implement
/// [`RecoverableLink`] on their own link objects.
#[derive(Debug)]
pub struct LocalLink {
    identifier: LinkIdentifier,
    settings: LinkSettings,
    scope: LinkScope,
    open: AtomicBool,
    closed_with: Mutex<Option<LinkRecoveryError>>,
    fail_on_steal: AtomicBool,
    steal_count: AtomicUsize,
}

impl LocalLink {
    pub fn new(identifier: LinkIdentifier, settings: LinkSettings, scope: LinkScope) -> Self {
        Self {
            identifier,
            settings,
            scope,
            open: AtomicBool::new(true),
            closed_with: Mutex::new(None),
            fail_on_steal: AtomicBool::new(false),
            steal_count: AtomicUsize::new(0),
        }
    }

    /// Close normally, as on a detach.
    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    /// Error the link was closed with, if it was stolen.
    pub fn closed_error(&self) -> Option<LinkRecoveryError> {
        self.closed_with
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn steal_count(&self) -> usize {
        self.steal_count.load(Ordering::SeqCst)
    }

    /// Make the next steal callbacks fail after closing the link.
    pub fn fail_on_steal(&self, fail: bool) {
        self.fail_on_steal.store(fail, Ordering::SeqCst);
    }
}

impl RecoverableLink for LocalLink {
    fn identifier(&self) -> &LinkIdentifier {
        &self.identifier
    }

    fn settings(&self) -> LinkSettings {
        self.settings.clone()
    }

    fn scope(&self) -> LinkScope {
        self.scope
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn on_stolen(&self, error: LinkRecoveryError) -> Result<(), CallbackError> {
        self.open.store(false, Ordering::SeqCst);
        self.steal_count.fetch_add(1, Ordering::SeqCst);
        *self.closed_with.lock().unwrap_or_else(PoisonError::into_inner) = Some(error);
        if self.fail_on_steal.load(Ordering::SeqCst) {
            return Err(format!("{} failed to close", self.identifier).into());
        }
        Ok(())
    }
}
