//! Registry configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use linkrec_core::{ExpirationPolicy, LinkSettings, TerminusExpiry};

/// Default broadcast capacity for lifecycle events.
const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Registry-wide expiry defaults.
///
/// A link whose own settings carry a valid expiry policy uses that policy
/// and timeout instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Policy for termini whose settings carry none (default `none`).
    pub expiration_policy: ExpirationPolicy,
    /// Delay between suspension and expiry in milliseconds (default 0 =
    /// expire synchronously).
    pub expiry_timeout_ms: u64,
    /// Capacity of the lifecycle event channel (default 64).
    pub event_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            expiration_policy: ExpirationPolicy::None,
            expiry_timeout_ms: 0,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl RegistryConfig {
    pub fn expiry_timeout(&self) -> Duration {
        Duration::from_millis(self.expiry_timeout_ms)
    }

    /// Policy and timeout that govern a terminus created from `settings`.
    pub fn resolve(&self, settings: &LinkSettings) -> (ExpirationPolicy, Duration) {
        match settings.terminus_expiry(false) {
            Some(expiry) => (expiry.policy, expiry.timeout()),
            None => (self.expiration_policy, self.expiry_timeout()),
        }
    }

    /// Write this registry's policy onto outgoing attach settings.
    ///
    /// The wire timeout is in whole seconds, rounded up.
    pub fn stamp(&self, settings: &mut LinkSettings) {
        let timeout_secs = u32::try_from(self.expiry_timeout_ms.div_ceil(1000)).unwrap_or(u32::MAX);
        settings.set_terminus_expiry(TerminusExpiry {
            policy: self.expiration_policy,
            timeout_secs,
        });
    }
}
