//! Negotiated link settings relevant to recovery.
//!
//! Only the attach fields that recovery reads or writes are modelled: link
//! name and role, the source/target addresses with their `expiry-policy`
//! and `timeout`, the sender settle mode, application properties and the
//! `unsettled` map.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::delivery::UnsettledMap;
use crate::error::LinkRecoveryError;
use crate::identifier::{LinkIdentifier, Role};
use crate::policy::{ExpirationPolicy, TerminusExpiry};

/// Sender settle mode.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettleMode {
    /// Deliveries are settled by the sender before the peer sees them.
    SettleOnSend,
    #[default]
    SettleOnReceive,
    SettleOnDispose,
}

/// Source or target terminus address.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminusAddress {
    pub address: Option<String>,
    /// Raw `expiry-policy` symbol as carried on the wire.
    pub expiry_policy: Option<String>,
    /// Raw `timeout` field, in seconds.
    #[serde(default)]
    pub timeout_secs: u32,
}

impl TerminusAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: Some(address.into()),
            ..Self::default()
        }
    }

    /// Parsed expiry, if the symbol names a recoverable policy.
    pub fn expiry(&self) -> Option<TerminusExpiry> {
        let policy = ExpirationPolicy::from_symbol(self.expiry_policy.as_deref()?).ok()?;
        Some(TerminusExpiry {
            policy,
            timeout_secs: self.timeout_secs,
        })
    }
}

/// Link settings exchanged in attach.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkSettings {
    pub name: String,
    pub role: Role,
    #[serde(default)]
    pub source: TerminusAddress,
    #[serde(default)]
    pub target: TerminusAddress,
    #[serde(default)]
    pub settle_mode: SettleMode,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    #[serde(default)]
    pub unsettled: Option<UnsettledMap>,
}

impl LinkSettings {
    pub fn new(name: impl Into<String>, role: Role) -> Self {
        Self {
            name: name.into(),
            role,
            source: TerminusAddress::default(),
            target: TerminusAddress::default(),
            settle_mode: SettleMode::default(),
            properties: BTreeMap::new(),
            unsettled: None,
        }
    }

    /// Identifier of the terminus these settings describe.
    pub fn identifier(
        &self,
        container_id: Option<String>,
    ) -> Result<LinkIdentifier, LinkRecoveryError> {
        LinkIdentifier::new(self.name.clone(), self.role, container_id)
    }

    /// Address that carries the expiry policy for this terminus.
    ///
    /// `is_remote_settings` is true when the settings arrived in a peer's
    /// attach, in which case `role` is the peer's role. A receiving
    /// terminus keeps its expiry on the target; a sending one on the source.
    pub fn expiry_address(&self, is_remote_settings: bool) -> &TerminusAddress {
        if self.role.is_receiver() != is_remote_settings {
            &self.target
        } else {
            &self.source
        }
    }

    fn expiry_address_mut(&mut self) -> &mut TerminusAddress {
        if self.role.is_receiver() {
            &mut self.target
        } else {
            &mut self.source
        }
    }

    /// Whether these settings describe (or request) a recoverable link.
    pub fn is_recoverable(&self, is_remote_settings: bool) -> bool {
        self.terminus_expiry(is_remote_settings).is_some()
    }

    pub fn terminus_expiry(&self, is_remote_settings: bool) -> Option<TerminusExpiry> {
        self.expiry_address(is_remote_settings).expiry()
    }

    /// Write `expiry` onto the local expiry address. `None` clears it.
    pub fn set_terminus_expiry(&mut self, expiry: TerminusExpiry) {
        let address = self.expiry_address_mut();
        address.expiry_policy = expiry.policy.symbol().map(str::to_owned);
        address.timeout_secs = expiry.timeout_secs;
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
