//! linkrec-core: identity, delivery-state and reconciliation primitives for
//! AMQP 1.0 link recovery.
//!
//! Everything here is pure: no IO, no async, no clocks. Stores, timers and
//! the terminus registry live in the downstream crates.

pub mod delivery;
pub mod error;
pub mod identifier;
pub mod policy;
pub mod reconciler;
pub mod scope;
pub mod settings;

pub use delivery::{DeliveryRecord, DeliveryState, DeliveryTag, Outcome, UnsettledMap};
pub use error::LinkRecoveryError;
pub use identifier::{LinkIdentifier, Role};
pub use policy::{ExpirationPolicy, LifecycleEvent, TerminusExpiry, is_valid_expiry_symbol};
pub use reconciler::{
    ReceiverAction, ResendFlags, TransferDirective, TransferFrame, reconcile, reconcile_for_role,
    reconcile_with_mode, sample_states,
};
pub use scope::{ConnectionId, LinkScope, SessionId};
pub use settings::{LinkSettings, SettleMode, TerminusAddress};
