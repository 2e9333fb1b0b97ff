//! Lifecycle notifications broadcast by the registry.

use linkrec_core::LinkIdentifier;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TerminusEvent {
    /// A link was associated with the terminus (first attach or reattach).
    Associated { identifier: LinkIdentifier },
    /// A live link was displaced by a newer attach.
    Stolen { identifier: LinkIdentifier },
    /// The terminus lost its link; `epoch` stamps this suspension episode.
    Suspended { identifier: LinkIdentifier, epoch: u64 },
    /// The terminus was removed for good.
    Expired { identifier: LinkIdentifier },
}

impl TerminusEvent {
    pub fn identifier(&self) -> &LinkIdentifier {
        match self {
            Self::Associated { identifier }
            | Self::Stolen { identifier }
            | Self::Suspended { identifier, .. }
            | Self::Expired { identifier } => identifier,
        }
    }
}
