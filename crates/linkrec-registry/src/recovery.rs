//! Attach-time recovery planning.
//!
//! On reattach each side learns the peer's unsettled map. The sending side
//! runs the decision table over the union of both tag sets and emits the
//! resulting transfers; the receiving side predicts the same decisions and
//! drops records the sender will not resend.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::debug;

use linkrec_core::{
    DeliveryState, DeliveryTag, LinkIdentifier, ReceiverAction, Role, TransferDirective,
    TransferFrame, UnsettledMap, reconcile_for_role, reconcile_with_mode,
};

use crate::error::RegistryError;
use crate::terminus::LinkTerminus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepDecision {
    Send(TransferDirective),
    Receive(ReceiverAction),
}

/// Decision for one delivery tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveryStep {
    pub tag: DeliveryTag,
    pub local: Option<DeliveryState>,
    pub remote: Option<DeliveryState>,
    pub decision: StepDecision,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveryPlan {
    pub identifier: LinkIdentifier,
    pub role: Role,
    pub steps: Vec<RecoveryStep>,
}

/// Plan recovery of `terminus` against the peer's unsettled map.
///
/// The role comes from the terminus identifier. The negotiated sender settle
/// mode is read from the terminus settings.
pub fn plan_recovery(
    terminus: &LinkTerminus,
    remote_unsettled: &UnsettledMap,
) -> Result<RecoveryPlan, RegistryError> {
    let identifier = terminus.identifier().clone();
    let role = identifier.role();
    let settle_mode = terminus.settings().settle_mode;
    let local = terminus.unsettled_map()?;

    let tags: BTreeSet<&DeliveryTag> = local.tags().chain(remote_unsettled.tags()).collect();
    let steps = tags
        .into_iter()
        .map(|tag| {
            let ours = local.get(tag);
            let theirs = remote_unsettled.get(tag);
            let decision = match role {
                Role::Sender => StepDecision::Send(reconcile_with_mode(settle_mode, ours, theirs)),
                Role::Receiver => {
                    StepDecision::Receive(reconcile_for_role(ours, theirs, settle_mode))
                }
            };
            RecoveryStep {
                tag: tag.clone(),
                local: ours,
                remote: theirs,
                decision,
            }
        })
        .collect();

    Ok(RecoveryPlan {
        identifier,
        role,
        steps,
    })
}

impl RecoveryPlan {
    /// Carry out the plan against the terminus' store.
    ///
    /// Returns the frames a sender must transmit, in tag order. Records are
    /// removed for skips, settled and aborted resends, and marked resumed for
    /// the other resumed transfers. A receiver only discards records.
    pub fn apply(&self, terminus: &LinkTerminus) -> Result<Vec<TransferFrame>, RegistryError> {
        let store = terminus.store();
        let mut frames = Vec::new();

        for step in &self.steps {
            match step.decision {
                StepDecision::Send(directive) => {
                    match directive {
                        _ if directive.removes_record() => {
                            if step.local.is_some() {
                                store.remove(&self.identifier, &step.tag)?;
                            }
                        }
                        TransferDirective::Resend(flags) if flags.resume => {
                            if let Some(mut record) = store.retrieve(&self.identifier, &step.tag)? {
                                record.resumed = true;
                                store.save(&self.identifier, &record)?;
                            }
                        }
                        _ => {}
                    }
                    if let Some(frame) = directive.frame(&step.tag) {
                        frames.push(frame);
                    }
                    debug!("{} tag {}: {directive:?}", self.identifier, step.tag);
                }
                StepDecision::Receive(ReceiverAction::Discard) => {
                    if step.local.is_some() {
                        store.remove(&self.identifier, &step.tag)?;
                    }
                }
                StepDecision::Receive(ReceiverAction::AwaitTransfer { .. }) => {}
            }
        }
        Ok(frames)
    }

    pub fn frame_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|step| matches!(step.decision, StepDecision::Send(d) if d.emits_frame()))
            .count()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
