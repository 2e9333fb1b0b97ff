//! Error types for link recovery.

use thiserror::Error;

use crate::delivery::{DeliveryState, DeliveryTag};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkRecoveryError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A live link already owns the identifier and the caller did not ask
    /// for recovery, so stealing is not allowed.
    #[error("link terminus {identifier} is already attached to a live link")]
    DuplicateTerminus { identifier: String },

    /// Terminal state of a link displaced by a newer attach for the same
    /// identifier.
    #[error("link {identifier} was closed due to link stealing")]
    LinkStolen { identifier: String },

    /// The terminus has already expired and can no longer be associated.
    #[error("link terminus {identifier} has expired")]
    TerminusExpired { identifier: String },

    #[error("unknown terminus expiry policy: {0}")]
    UnknownExpiryPolicy(String),

    #[error("delivery {tag} cannot move from {from} to {to}")]
    BackwardTransition {
        tag: DeliveryTag,
        from: DeliveryState,
        to: DeliveryState,
    },
}
