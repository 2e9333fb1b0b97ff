use std::time::Duration;

use linkrec_core::LinkRecoveryError;
use linkrec_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Link(#[from] LinkRecoveryError),

    #[error("delivery store: {0}")]
    Store(#[from] StoreError),
}

/// Why [`wait_for_reattach`](crate::wait_for_reattach) gave up.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReattachError {
    #[error("no reattach within {0:?}")]
    Timeout(Duration),

    #[error("reattach wait cancelled")]
    Cancelled,

    #[error("terminus expired before reattach")]
    Expired,
}
