//! Waiting for a suspended link to come back.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use linkrec_core::LinkIdentifier;

use crate::error::ReattachError;
use crate::events::TerminusEvent;
use crate::registry::TerminusRegistry;
use crate::terminus::{LinkTerminus, TerminusPhase};

/// Resolve once `identifier` is associated with a live link.
///
/// Fails with `Timeout` after `timeout`, `Cancelled` when `cancel` fires, or
/// `Expired` if the terminus expires first. Whichever happens first wins;
/// the event subscription and the timer are dropped on return.
pub async fn wait_for_reattach(
    registry: &TerminusRegistry,
    identifier: &LinkIdentifier,
    timeout: Duration,
    cancel: CancellationToken,
) -> Result<Arc<LinkTerminus>, ReattachError> {
    // Subscribe before checking so an attach in between is not missed.
    let mut events = registry.subscribe();
    if let Some(terminus) = attached(registry, identifier) {
        return Ok(terminus);
    }

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ReattachError::Cancelled),
            _ = &mut deadline => return Err(ReattachError::Timeout(timeout)),
            event = events.recv() => match event {
                Ok(TerminusEvent::Associated { identifier: attached_id })
                    if attached_id == *identifier =>
                {
                    if let Some(terminus) = attached(registry, identifier) {
                        return Ok(terminus);
                    }
                }
                Ok(TerminusEvent::Expired { identifier: expired_id })
                    if expired_id == *identifier =>
                {
                    return Err(ReattachError::Expired);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    debug!("reattach wait for {identifier} lagged by {skipped} events");
                    if let Some(terminus) = attached(registry, identifier) {
                        return Ok(terminus);
                    }
                }
                // The registry outlives this borrow, so the channel cannot
                // close while waiting.
                Err(RecvError::Closed) => return Err(ReattachError::Cancelled),
            },
        }
    }
}

fn attached(registry: &TerminusRegistry, identifier: &LinkIdentifier) -> Option<Arc<LinkTerminus>> {
    registry
        .try_get(identifier)
        .filter(|terminus| terminus.phase() == TerminusPhase::Active && terminus.has_live_link())
}
