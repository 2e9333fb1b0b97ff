//! Per-tag reconciliation of unsettled deliveries on link reattach.
//!
//! Pure functions only. Given the sending endpoint's own record ("local")
//! and the receiving peer's record ("remote") for one delivery tag, decide
//! what the sender transmits. Records are absent when `None`.
//!
//! | Local        | Remote          | Directive                            |
//! |--------------|-----------------|--------------------------------------|
//! | absent       | any             | Skip                                 |
//! | T(x)         | absent          | Skip                                 |
//! | T(x)         | U, RCV          | resume + aborted                     |
//! | T(x)         | T(x)            | resume + settled                     |
//! | T(x)         | T(y)            | resume, state x (left unsettled)     |
//! | T(x)         | TXP, TXT        | resume + aborted                     |
//! | U, RCV, TXP  | absent          | fresh resend (resume = false)        |
//! | U            | U               | resume                               |
//! | RCV          | U               | resume + aborted                     |
//! | U, RCV       | RCV             | resume + aborted                     |
//! | U, RCV       | T(x)            | resume + settled, state x            |
//! | U, RCV       | TXP, TXT        | resume + aborted                     |
//! | TXP          | present         | resume + aborted                     |
//! | TXT(x)       | absent          | Skip                                 |
//! | TXT(x)       | TXT(x)          | resume + settled                     |
//! | TXT(x)       | TXT(y)          | resume, state x (left unsettled)     |
//! | TXT(x)       | U, RCV, T, TXP  | resume + aborted                     |
//!
//! A settle-on-send sender already considers every delivery settled, so it
//! never resends after reattach.

use serde::{Deserialize, Serialize};

use crate::delivery::{DeliveryState, DeliveryTag, Outcome};
use crate::settings::SettleMode;

// ─── Directives ──────────────────────────────────────────────────────

/// Flags of a transfer produced by reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResendFlags {
    pub resume: bool,
    pub aborted: bool,
    pub settled: bool,
    /// Delivery state carried on the transfer, when the sender asserts one.
    pub state: Option<DeliveryState>,
}

/// What the sending endpoint does for one delivery tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "directive", rename_all = "snake_case")]
pub enum TransferDirective {
    /// Send nothing and discard the local record.
    Skip,
    /// Send nothing; the tag is already fully resolved.
    SkipAndForget,
    Resend(ResendFlags),
}

impl TransferDirective {
    fn fresh() -> Self {
        Self::Resend(ResendFlags {
            resume: false,
            aborted: false,
            settled: false,
            state: None,
        })
    }

    fn resume() -> Self {
        Self::Resend(ResendFlags {
            resume: true,
            aborted: false,
            settled: false,
            state: None,
        })
    }

    fn abort() -> Self {
        Self::Resend(ResendFlags {
            resume: true,
            aborted: true,
            settled: false,
            state: None,
        })
    }

    fn settle(state: DeliveryState) -> Self {
        Self::Resend(ResendFlags {
            resume: true,
            aborted: false,
            settled: true,
            state: Some(state),
        })
    }

    fn assert_state(state: DeliveryState) -> Self {
        Self::Resend(ResendFlags {
            resume: true,
            aborted: false,
            settled: false,
            state: Some(state),
        })
    }

    pub fn emits_frame(&self) -> bool {
        matches!(self, Self::Resend(_))
    }

    /// Whether the local record is removed once the directive is carried out.
    ///
    /// Only plain and state-asserting resends keep the record, now resumed
    /// and awaiting a fresh settlement.
    pub fn removes_record(&self) -> bool {
        match self {
            Self::Skip | Self::SkipAndForget => true,
            Self::Resend(flags) => flags.aborted || flags.settled,
        }
    }

    /// Transfer frame for `tag`, if the directive sends one.
    pub fn frame(&self, tag: &DeliveryTag) -> Option<TransferFrame> {
        match self {
            Self::Skip | Self::SkipAndForget => None,
            Self::Resend(flags) => Some(TransferFrame {
                tag: tag.clone(),
                resume: flags.resume,
                aborted: flags.aborted,
                settled: flags.settled,
                state: flags.state,
            }),
        }
    }
}

/// Transfer frame fields produced by a directive. Payload is the engine's
/// concern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferFrame {
    pub tag: DeliveryTag,
    pub resume: bool,
    pub aborted: bool,
    pub settled: bool,
    pub state: Option<DeliveryState>,
}

// ─── Decision Table ──────────────────────────────────────────────────

/// Decide the sender's directive for one tag.
pub fn reconcile(local: Option<DeliveryState>, remote: Option<DeliveryState>) -> TransferDirective {
    use DeliveryState::{
        PendingAcknowledged as Rcv, PendingUnknown as Unknown, Terminal,
        TransactionalPending as TxPending, TransactionalTerminal as TxTerminal,
    };

    let Some(local) = local else {
        return TransferDirective::Skip;
    };

    let Some(remote) = remote else {
        return match local {
            Terminal(_) | TxTerminal(_) => TransferDirective::Skip,
            Unknown | Rcv | TxPending => TransferDirective::fresh(),
        };
    };

    match (local, remote) {
        // ── Local terminal ───────────────────────────────────────
        (Terminal(_), Unknown | Rcv) => TransferDirective::abort(),
        (Terminal(x), Terminal(y)) if x == y => TransferDirective::settle(local),
        (Terminal(_), Terminal(_)) => TransferDirective::assert_state(local),
        (Terminal(_), TxPending | TxTerminal(_)) => TransferDirective::abort(),

        // ── Local pending ────────────────────────────────────────
        (Unknown, Unknown) => TransferDirective::resume(),
        (Rcv, Unknown) => TransferDirective::abort(),
        (Unknown | Rcv, Rcv) => TransferDirective::abort(),
        (Unknown | Rcv, Terminal(_)) => TransferDirective::settle(remote),
        (Unknown | Rcv, TxPending | TxTerminal(_)) => TransferDirective::abort(),

        // ── Local transactional ──────────────────────────────────
        (TxPending, _) => TransferDirective::abort(),
        (TxTerminal(x), TxTerminal(y)) if x == y => TransferDirective::settle(local),
        (TxTerminal(_), TxTerminal(_)) => TransferDirective::assert_state(local),
        (TxTerminal(_), Unknown | Rcv | Terminal(_) | TxPending) => TransferDirective::abort(),
    }
}

/// [`reconcile`] honouring the sender's settle mode.
pub fn reconcile_with_mode(
    settle_mode: SettleMode,
    local: Option<DeliveryState>,
    remote: Option<DeliveryState>,
) -> TransferDirective {
    match (settle_mode, local) {
        (_, None) => TransferDirective::Skip,
        (SettleMode::SettleOnSend, Some(_)) => TransferDirective::SkipAndForget,
        _ => reconcile(local, remote),
    }
}

// ─── Receiver Side ───────────────────────────────────────────────────

/// What a receiving endpoint does with its own record for one tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ReceiverAction {
    /// The sender will not transmit this tag; drop the local record.
    Discard,
    /// The sender is expected to transmit `expected`; keep the record until
    /// the transfer arrives.
    AwaitTransfer { expected: TransferDirective },
}

/// Predict the peer sender's directive and derive the receiver's action.
///
/// The receiver's own record is the "remote" side of the sender's decision.
pub fn reconcile_for_role(
    ours: Option<DeliveryState>,
    sender_record: Option<DeliveryState>,
    sender_settle_mode: SettleMode,
) -> ReceiverAction {
    let expected = reconcile_with_mode(sender_settle_mode, sender_record, ours);
    if expected.emits_frame() {
        ReceiverAction::AwaitTransfer { expected }
    } else {
        ReceiverAction::Discard
    }
}

/// Representative states used to print the full decision table.
pub fn sample_states() -> Vec<Option<DeliveryState>> {
    vec![
        None,
        Some(DeliveryState::PendingUnknown),
        Some(DeliveryState::PendingAcknowledged),
        Some(DeliveryState::Terminal(Outcome::Accepted)),
        Some(DeliveryState::Terminal(Outcome::Rejected)),
        Some(DeliveryState::TransactionalPending),
        Some(DeliveryState::TransactionalTerminal(Outcome::Accepted)),
        Some(DeliveryState::TransactionalTerminal(Outcome::Rejected)),
    ]
}

// ─── Tests ───────────────────────────────────────────────────────────
