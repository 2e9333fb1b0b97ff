//! linkrec-registry: recoverable link termini and their lifecycle.
//!
//! The [`TerminusRegistry`] owns every [`LinkTerminus`] in the process,
//! keyed by [`LinkIdentifier`](linkrec_core::LinkIdentifier). It resolves
//! link stealing on attach, suspends termini when a qualifying lifecycle
//! event ends their link, and expires them once the configured timeout
//! elapses without a reattach.

pub mod config;
pub mod error;
pub mod events;
pub mod link;
pub mod reattach;
pub mod recovery;
pub mod registry;
pub mod terminus;

pub use config::RegistryConfig;
pub use error::{ReattachError, RegistryError};
pub use events::TerminusEvent;
pub use link::{CallbackError, LocalLink, RecoverableLink};
pub use reattach::wait_for_reattach;
pub use recovery::{RecoveryPlan, RecoveryStep, StepDecision, plan_recovery};
pub use registry::{SuspendOutcome, TerminusRegistry, TerminusSnapshot};
pub use terminus::{LinkTerminus, TerminusPhase};
