//! Delivery tags, delivery states and unsettled delivery records.
//!
//! ## States
//!
//! - `PendingUnknown`: sent/received, no progress marker (wire: null)
//! - `PendingAcknowledged`: non-terminal progress marker (`received`)
//! - `Terminal(outcome)`: accepted / rejected / released / modified
//! - `TransactionalPending`: decision deferred to an open transaction
//! - `TransactionalTerminal(outcome)`: final decision under a transaction
//!
//! "Absent" (no record at all) is modelled as `Option::None` by callers.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::LinkRecoveryError;

// ─── Delivery Tag ────────────────────────────────────────────────────

/// Opaque delivery tag, unique within a terminus.
///
/// Serialized as a lowercase hex string so it can key JSON maps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct DeliveryTag(Vec<u8>);

impl DeliveryTag {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Lowercase hex rendering, used for logs and as the durable store key.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    pub fn from_hex(s: &str) -> Result<Self, LinkRecoveryError> {
        if !s.is_ascii() || s.len() % 2 != 0 {
            return Err(LinkRecoveryError::InvalidArgument(format!(
                "invalid hex delivery tag: {s}"
            )));
        }
        (0..s.len())
            .step_by(2)
            .map(|i| {
                u8::from_str_radix(&s[i..i + 2], 16).map_err(|_| {
                    LinkRecoveryError::InvalidArgument(format!("invalid hex delivery tag: {s}"))
                })
            })
            .collect::<Result<Vec<u8>, _>>()
            .map(Self)
    }
}

impl From<&[u8]> for DeliveryTag {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl From<&str> for DeliveryTag {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<DeliveryTag> for String {
    fn from(tag: DeliveryTag) -> Self {
        tag.to_hex()
    }
}

impl TryFrom<String> for DeliveryTag {
    type Error = LinkRecoveryError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_hex(&s)
    }
}

impl fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

// ─── Outcome ─────────────────────────────────────────────────────────

/// Terminal delivery outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Accepted,
    Rejected,
    Released,
    Modified,
}

impl Outcome {
    pub const ALL: [Self; 4] = [
        Self::Accepted,
        Self::Rejected,
        Self::Released,
        Self::Modified,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Released => "released",
            Self::Modified => "modified",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Outcome {
    type Err = LinkRecoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "accepted" => Ok(Self::Accepted),
            "rejected" => Ok(Self::Rejected),
            "released" => Ok(Self::Released),
            "modified" => Ok(Self::Modified),
            _ => Err(LinkRecoveryError::InvalidArgument(format!(
                "unknown outcome: {s}"
            ))),
        }
    }
}

// ─── Delivery State ──────────────────────────────────────────────────

/// State of an unsettled delivery as recorded by one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "outcome", rename_all = "snake_case")]
pub enum DeliveryState {
    PendingUnknown,
    PendingAcknowledged,
    Terminal(Outcome),
    TransactionalPending,
    TransactionalTerminal(Outcome),
}

impl DeliveryState {
    /// Final outcome, transactional or not.
    pub fn outcome(self) -> Option<Outcome> {
        match self {
            Self::Terminal(outcome) | Self::TransactionalTerminal(outcome) => Some(outcome),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.outcome().is_some()
    }

    pub fn is_transactional(self) -> bool {
        matches!(
            self,
            Self::TransactionalPending | Self::TransactionalTerminal(_)
        )
    }

    fn rank(self) -> u8 {
        match self {
            Self::PendingUnknown => 0,
            Self::PendingAcknowledged | Self::TransactionalPending => 1,
            Self::Terminal(_) | Self::TransactionalTerminal(_) => 2,
        }
    }

    /// Whether a record may move from `self` to `next`.
    ///
    /// Re-recording the same state is allowed; terminal states are final;
    /// a transactional delivery never leaves the transactional track.
    pub fn can_advance_to(self, next: Self) -> bool {
        if self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        if self.is_transactional() && !next.is_transactional() {
            return false;
        }
        next.rank() > self.rank()
            || (self == Self::PendingAcknowledged && next == Self::TransactionalPending)
    }
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PendingUnknown => f.write_str("unknown"),
            Self::PendingAcknowledged => f.write_str("received"),
            Self::Terminal(outcome) => write!(f, "{outcome}"),
            Self::TransactionalPending => f.write_str("txn"),
            Self::TransactionalTerminal(outcome) => write!(f, "txn:{outcome}"),
        }
    }
}

impl FromStr for DeliveryState {
    type Err = LinkRecoveryError;

    /// Parses the `Display` form: `unknown`, `received`, an outcome,
    /// `txn`, or `txn:<outcome>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        match lower.as_str() {
            "unknown" | "null" => Ok(Self::PendingUnknown),
            "received" => Ok(Self::PendingAcknowledged),
            "txn" => Ok(Self::TransactionalPending),
            other => match other.strip_prefix("txn:") {
                Some(outcome) => outcome.parse().map(Self::TransactionalTerminal),
                None => other.parse().map(Self::Terminal),
            },
        }
    }
}

// ─── Delivery Record ─────────────────────────────────────────────────

/// One unsettled delivery held in the delivery store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub tag: DeliveryTag,
    pub state: DeliveryState,
    /// Set once the delivery has been resent as a resumed transfer and is
    /// awaiting a fresh settlement from the peer.
    #[serde(default)]
    pub resumed: bool,
}

impl DeliveryRecord {
    pub fn new(tag: DeliveryTag, state: DeliveryState) -> Self {
        Self {
            tag,
            state,
            resumed: false,
        }
    }

    /// Move the record forward to `next`.
    pub fn advance(&mut self, next: DeliveryState) -> Result<(), LinkRecoveryError> {
        if !self.state.can_advance_to(next) {
            return Err(LinkRecoveryError::BackwardTransition {
                tag: self.tag.clone(),
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }
}

// ─── Unsettled Map ───────────────────────────────────────────────────

/// The attach frame's `unsettled` map: `{tag -> state-or-null}`.
///
/// A null wire value is held as `PendingUnknown`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnsettledMap(BTreeMap<DeliveryTag, DeliveryState>);

impl UnsettledMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from decoded wire entries.
    pub fn from_wire(
        entries: impl IntoIterator<Item = (DeliveryTag, Option<DeliveryState>)>,
    ) -> Self {
        Self(
            entries
                .into_iter()
                .map(|(tag, state)| (tag, state.unwrap_or(DeliveryState::PendingUnknown)))
                .collect(),
        )
    }

    /// Entries as they go on the wire; `PendingUnknown` becomes null.
    pub fn to_wire(&self) -> Vec<(DeliveryTag, Option<DeliveryState>)> {
        self.0
            .iter()
            .map(|(tag, state)| {
                let wire = match state {
                    DeliveryState::PendingUnknown => None,
                    other => Some(*other),
                };
                (tag.clone(), wire)
            })
            .collect()
    }

    pub fn insert(&mut self, tag: DeliveryTag, state: DeliveryState) {
        self.0.insert(tag, state);
    }

    pub fn get(&self, tag: &DeliveryTag) -> Option<DeliveryState> {
        self.0.get(tag).copied()
    }

    pub fn tags(&self) -> impl Iterator<Item = &DeliveryTag> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DeliveryTag, &DeliveryState)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(DeliveryTag, DeliveryState)> for UnsettledMap {
    fn from_iter<I: IntoIterator<Item = (DeliveryTag, DeliveryState)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip_and_errors() {
        let tag = DeliveryTag::new(vec![0x00, 0xab, 0x7f]);
        assert_eq!(tag.to_hex(), "00ab7f");
        assert_eq!(DeliveryTag::from_hex("00AB7F").expect("valid"), tag);
        assert!(DeliveryTag::from_hex("abc").is_err());
        assert!(DeliveryTag::from_hex("zz").is_err());
    }

    #[test]
    fn parse_display_forms() {
        let cases = [
            ("unknown", DeliveryState::PendingUnknown),
            ("null", DeliveryState::PendingUnknown),
            ("received", DeliveryState::PendingAcknowledged),
            ("Accepted", DeliveryState::Terminal(Outcome::Accepted)),
            ("txn", DeliveryState::TransactionalPending),
            (
                "txn:rejected",
                DeliveryState::TransactionalTerminal(Outcome::Rejected),
            ),
        ];
        for (text, expected) in cases {
            assert_eq!(text.parse::<DeliveryState>().expect(text), expected);
        }
        assert!("settled".parse::<DeliveryState>().is_err());
        assert!("txn:maybe".parse::<DeliveryState>().is_err());
    }

    #[test]
    fn forward_transitions_allowed() {
        let mut record = DeliveryRecord::new("t1".into(), DeliveryState::PendingUnknown);
        record
            .advance(DeliveryState::PendingAcknowledged)
            .expect("unknown -> received");
        record
            .advance(DeliveryState::Terminal(Outcome::Accepted))
            .expect("received -> accepted");
        record
            .advance(DeliveryState::Terminal(Outcome::Accepted))
            .expect("same terminal state is idempotent");
    }

    #[test]
    fn terminal_is_final() {
        let mut record =
            DeliveryRecord::new("t1".into(), DeliveryState::Terminal(Outcome::Released));
        let err = record
            .advance(DeliveryState::PendingAcknowledged)
            .expect_err("terminal cannot regress");
        assert!(matches!(err, LinkRecoveryError::BackwardTransition { .. }));
        assert!(
            record
                .advance(DeliveryState::Terminal(Outcome::Accepted))
                .is_err()
        );
        assert_eq!(record.state, DeliveryState::Terminal(Outcome::Released));
    }

    #[test]
    fn transactional_track() {
        let mut record = DeliveryRecord::new("t1".into(), DeliveryState::PendingAcknowledged);
        record
            .advance(DeliveryState::TransactionalPending)
            .expect("enter transaction");
        assert!(
            record
                .advance(DeliveryState::Terminal(Outcome::Accepted))
                .is_err(),
            "cannot leave the transactional track"
        );
        record
            .advance(DeliveryState::TransactionalTerminal(Outcome::Accepted))
            .expect("txn decision");
    }

    #[test]
    fn unsettled_map_wire_nulls() {
        let map = UnsettledMap::from_wire([
            (DeliveryTag::from("a"), None),
            (
                DeliveryTag::from("b"),
                Some(DeliveryState::Terminal(Outcome::Accepted)),
            ),
        ]);
        assert_eq!(
            map.get(&DeliveryTag::from("a")),
            Some(DeliveryState::PendingUnknown)
        );
        let wire = map.to_wire();
        assert_eq!(wire[0], (DeliveryTag::from("a"), None));
        assert_eq!(
            wire[1].1,
            Some(DeliveryState::Terminal(Outcome::Accepted))
        );
    }
}
