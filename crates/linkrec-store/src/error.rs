use linkrec_core::LinkRecoveryError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A persisted row could not be decoded.
    #[error("corrupt delivery row for {terminus} tag {tag}: {reason}")]
    Corrupt {
        terminus: String,
        tag: String,
        reason: String,
    },

    #[error(transparent)]
    Transition(#[from] LinkRecoveryError),
}
