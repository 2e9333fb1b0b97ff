//! Terminus expiration policy and the lifecycle events it is matched against.
//!
//! Policies are totally ordered by how "deep" an event must be before a
//! terminus becomes eligible for expiry:
//!
//! `None < LinkDetach < SessionEnd < ConnectionClose < Never`
//!
//! A terminus under policy `P` is suspended only by an event at least as deep
//! as `P`. `Never` is never suspended by any event.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::LinkRecoveryError;

// ─── Symbols ─────────────────────────────────────────────────────────

/// Attach `expiry-policy` symbols.
pub const SYMBOL_LINK_DETACH: &str = "link-detach";
pub const SYMBOL_SESSION_END: &str = "session-end";
pub const SYMBOL_CONNECTION_CLOSE: &str = "connection-close";
pub const SYMBOL_NEVER: &str = "never";

/// Whether `symbol` names a policy under which a terminus is recoverable.
pub fn is_valid_expiry_symbol(symbol: &str) -> bool {
    matches!(
        symbol,
        SYMBOL_LINK_DETACH | SYMBOL_SESSION_END | SYMBOL_CONNECTION_CLOSE | SYMBOL_NEVER
    )
}

// ─── Expiration Policy ───────────────────────────────────────────────

/// When a suspended terminus may be forgotten.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum ExpirationPolicy {
    /// Keep no terminus state beyond the live link.
    #[default]
    None,
    LinkDetach,
    SessionEnd,
    ConnectionClose,
    /// Keep the terminus for as long as the process lives.
    Never,
}

impl ExpirationPolicy {
    pub const ALL: [Self; 5] = [
        Self::None,
        Self::LinkDetach,
        Self::SessionEnd,
        Self::ConnectionClose,
        Self::Never,
    ];

    /// Attach symbol for this policy; `None` carries no symbol.
    pub fn symbol(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::LinkDetach => Some(SYMBOL_LINK_DETACH),
            Self::SessionEnd => Some(SYMBOL_SESSION_END),
            Self::ConnectionClose => Some(SYMBOL_CONNECTION_CLOSE),
            Self::Never => Some(SYMBOL_NEVER),
        }
    }

    /// Parse an attach symbol. Only the four recoverable symbols are valid.
    pub fn from_symbol(symbol: &str) -> Result<Self, LinkRecoveryError> {
        match symbol {
            SYMBOL_LINK_DETACH => Ok(Self::LinkDetach),
            SYMBOL_SESSION_END => Ok(Self::SessionEnd),
            SYMBOL_CONNECTION_CLOSE => Ok(Self::ConnectionClose),
            SYMBOL_NEVER => Ok(Self::Never),
            other => Err(LinkRecoveryError::UnknownExpiryPolicy(other.to_owned())),
        }
    }

    /// Whether `event` is deep enough to suspend a terminus under this policy.
    pub fn qualifies(self, event: LifecycleEvent) -> bool {
        match self {
            Self::Never => false,
            Self::None => true,
            Self::LinkDetach => event >= LifecycleEvent::LinkDetach,
            Self::SessionEnd => event >= LifecycleEvent::SessionEnd,
            Self::ConnectionClose => event >= LifecycleEvent::ConnectionClose,
        }
    }

    /// Whether termini under this policy outlive their link at all.
    pub fn is_recoverable(self) -> bool {
        self != Self::None
    }
}

impl fmt::Display for ExpirationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol().unwrap_or("none"))
    }
}

impl FromStr for ExpirationPolicy {
    type Err = LinkRecoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase().replace('_', "-");
        if lower == "none" {
            return Ok(Self::None);
        }
        Self::from_symbol(&lower)
    }
}

// ─── Lifecycle Events ────────────────────────────────────────────────

/// Protocol lifecycle events that can end a link's association, ordered by
/// depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    LinkDetach,
    SessionEnd,
    ConnectionClose,
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::LinkDetach => "link_detach",
            Self::SessionEnd => "session_end",
            Self::ConnectionClose => "connection_close",
        })
    }
}

// ─── Terminus Expiry ─────────────────────────────────────────────────

/// Expiry settings negotiated on a terminus address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminusExpiry {
    pub policy: ExpirationPolicy,
    /// AMQP `timeout` field, in seconds.
    pub timeout_secs: u32,
}

impl TerminusExpiry {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.timeout_secs))
    }
}

// ─── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policies_are_totally_ordered() {
        assert!(ExpirationPolicy::None < ExpirationPolicy::LinkDetach);
        assert!(ExpirationPolicy::LinkDetach < ExpirationPolicy::SessionEnd);
        assert!(ExpirationPolicy::SessionEnd < ExpirationPolicy::ConnectionClose);
        assert!(ExpirationPolicy::ConnectionClose < ExpirationPolicy::Never);
    }

    #[test]
    fn session_end_survives_detach_only() {
        let policy = ExpirationPolicy::SessionEnd;
        assert!(!policy.qualifies(LifecycleEvent::LinkDetach));
        assert!(policy.qualifies(LifecycleEvent::SessionEnd));
        assert!(policy.qualifies(LifecycleEvent::ConnectionClose));
    }

    #[test]
    fn never_and_none_extremes() {
        for event in [
            LifecycleEvent::LinkDetach,
            LifecycleEvent::SessionEnd,
            LifecycleEvent::ConnectionClose,
        ] {
            assert!(!ExpirationPolicy::Never.qualifies(event));
            assert!(ExpirationPolicy::None.qualifies(event));
        }
    }

    #[test]
    fn symbols_round_trip() {
        for policy in ExpirationPolicy::ALL {
            match policy.symbol() {
                Some(symbol) => {
                    assert!(is_valid_expiry_symbol(symbol));
                    assert_eq!(ExpirationPolicy::from_symbol(symbol).expect(symbol), policy);
                }
                None => assert_eq!(policy, ExpirationPolicy::None),
            }
        }
        assert!(!is_valid_expiry_symbol("none"));
        assert!(ExpirationPolicy::from_symbol("link_detach").is_err());
    }

    #[test]
    fn from_str_is_lenient_about_case_and_underscores() {
        assert_eq!(
            "SESSION_END".parse::<ExpirationPolicy>().expect("valid"),
            ExpirationPolicy::SessionEnd
        );
        assert_eq!(
            "none".parse::<ExpirationPolicy>().expect("valid"),
            ExpirationPolicy::None
        );
        assert!("forever".parse::<ExpirationPolicy>().is_err());
    }

    #[test]
    fn serde_uses_symbols() {
        let json = serde_json::to_string(&ExpirationPolicy::ConnectionClose).expect("serialize");
        assert_eq!(json, "\"connection-close\"");
        let parsed: ExpirationPolicy = serde_json::from_str("\"none\"").expect("deserialize");
        assert_eq!(parsed, ExpirationPolicy::None);
    }
}
