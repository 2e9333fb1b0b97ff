//! Link endpoint identity, independent of any live connection.
//!
//! A link endpoint is identified by its link name, its role, and the
//! container it lives in. Name and container comparisons are
//! case-insensitive; the role must match exactly.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::LinkRecoveryError;

// ─── Role ────────────────────────────────────────────────────────────

/// Role of a link endpoint.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Sender,
    Receiver,
}

impl Role {
    /// The role the peer endpoint of the same link plays.
    pub fn peer(self) -> Self {
        match self {
            Self::Sender => Self::Receiver,
            Self::Receiver => Self::Sender,
        }
    }

    /// AMQP attach `role` field: `false` for sender, `true` for receiver.
    pub fn is_receiver(self) -> bool {
        matches!(self, Self::Receiver)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sender => "sender",
            Self::Receiver => "receiver",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Link Identifier ─────────────────────────────────────────────────

/// Immutable key of a link terminus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawLinkIdentifier")]
pub struct LinkIdentifier {
    name: String,
    role: Role,
    container_id: Option<String>,
}

#[derive(Deserialize)]
struct RawLinkIdentifier {
    name: String,
    role: Role,
    #[serde(default)]
    container_id: Option<String>,
}

impl TryFrom<RawLinkIdentifier> for LinkIdentifier {
    type Error = LinkRecoveryError;

    fn try_from(raw: RawLinkIdentifier) -> Result<Self, Self::Error> {
        Self::new(raw.name, raw.role, raw.container_id)
    }
}

impl LinkIdentifier {
    /// Build an identifier. Fails with `InvalidArgument` if `name` is empty.
    pub fn new(
        name: impl Into<String>,
        role: Role,
        container_id: Option<String>,
    ) -> Result<Self, LinkRecoveryError> {
        let name = name.into();
        if name.is_empty() {
            return Err(LinkRecoveryError::InvalidArgument(
                "link name must not be empty".to_owned(),
            ));
        }
        Ok(Self {
            name,
            role,
            container_id,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn container_id(&self) -> Option<&str> {
        self.container_id.as_deref()
    }

    /// Identifier of the peer's terminus for the same link.
    ///
    /// The peer lives in a different container, so the container is
    /// supplied by the caller.
    pub fn peer(&self, peer_container_id: Option<String>) -> Self {
        Self {
            name: self.name.clone(),
            role: self.role.peer(),
            container_id: peer_container_id,
        }
    }

    /// Case-folded key, stable across case-insensitively equal identifiers.
    /// Used as the durable store key.
    ///
    /// Name and container are length-prefixed, and a missing container is
    /// `-`, so unequal identifiers never share a key.
    pub fn storage_key(&self) -> String {
        let container = match &self.container_id {
            Some(container) => length_prefixed(&fold_case(container)),
            None => "-".to_owned(),
        };
        format!(
            "{}/{container}/{}",
            self.role,
            length_prefixed(&fold_case(&self.name))
        )
    }
}

fn length_prefixed(s: &str) -> String {
    format!("{}:{s}", s.len())
}

fn fold_case(s: &str) -> String {
    s.chars().flat_map(char::to_lowercase).collect()
}

fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.chars()
        .flat_map(char::to_lowercase)
        .eq(b.chars().flat_map(char::to_lowercase))
}

impl PartialEq for LinkIdentifier {
    fn eq(&self, other: &Self) -> bool {
        self.role == other.role
            && eq_ignore_case(&self.name, &other.name)
            && match (&self.container_id, &other.container_id) {
                (Some(a), Some(b)) => eq_ignore_case(a, b),
                (None, None) => true,
                _ => false,
            }
    }
}

impl Eq for LinkIdentifier {}

impl Hash for LinkIdentifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for c in self.name.chars().flat_map(char::to_lowercase) {
            c.hash(state);
        }
        self.role.hash(state);
        match &self.container_id {
            Some(container) => {
                1u8.hash(state);
                for c in container.chars().flat_map(char::to_lowercase) {
                    c.hash(state);
                }
            }
            None => 0u8.hash(state),
        }
    }
}

impl fmt::Display for LinkIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.container_id {
            Some(container) => write!(f, "{container}/{}[{}]", self.name, self.role),
            None => write!(f, "{}[{}]", self.name, self.role),
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::collections::hash_map::DefaultHasher;

    fn id(name: &str, role: Role, container: Option<&str>) -> LinkIdentifier {
        LinkIdentifier::new(name, role, container.map(str::to_owned)).expect("valid identifier")
    }

    fn hash_of(id: &LinkIdentifier) -> u64 {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        hasher.finish()
    }

    // ── 1. empty_name_rejected ──────────────────────────────────────

    #[test]
    fn empty_name_rejected() {
        let err = LinkIdentifier::new("", Role::Sender, None).expect_err("empty name");
        assert!(matches!(err, LinkRecoveryError::InvalidArgument(_)));
    }

    // ── 2. name_and_container_case_insensitive ──────────────────────

    #[test]
    fn name_and_container_case_insensitive() {
        let a = id("Orders-Link", Role::Sender, Some("Container-A"));
        let b = id("orders-link", Role::Sender, Some("CONTAINER-a"));
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
        assert_eq!(a.storage_key(), b.storage_key());
    }

    // ── 3. role_must_match ──────────────────────────────────────────

    #[test]
    fn role_must_match() {
        let a = id("link", Role::Sender, None);
        let b = id("link", Role::Receiver, None);
        assert_ne!(a, b);
        assert_ne!(a.storage_key(), b.storage_key());
    }

    // ── 4. missing_container_differs_from_present ───────────────────

    #[test]
    fn missing_container_differs_from_present() {
        let a = id("link", Role::Sender, None);
        let b = id("link", Role::Sender, Some("c1"));
        assert_ne!(a, b);
    }

    // ── 5. storage_keys_never_collide ───────────────────────────────

    #[test]
    fn storage_keys_never_collide() {
        let slash_in_name = id("b/c", Role::Sender, Some("a"));
        let slash_in_container = id("c", Role::Sender, Some("a/b"));
        assert_ne!(slash_in_name.storage_key(), slash_in_container.storage_key());

        let no_container = id("q", Role::Sender, None);
        let empty_container = id("q", Role::Sender, Some(""));
        assert_ne!(no_container, empty_container);
        assert_ne!(no_container.storage_key(), empty_container.storage_key());

        let dash_container = id("q", Role::Sender, Some("-"));
        assert_ne!(no_container.storage_key(), dash_container.storage_key());
    }

    // ── 6. usable_as_map_key ────────────────────────────────────────

    #[test]
    fn usable_as_map_key() {
        let mut map = HashMap::new();
        map.insert(id("Link", Role::Receiver, Some("c")), 1);
        assert_eq!(map.get(&id("LINK", Role::Receiver, Some("C"))), Some(&1));
        assert!(map.get(&id("LINK", Role::Sender, Some("C"))).is_none());
    }

    // ── 7. peer_flips_role ──────────────────────────────────────────

    #[test]
    fn peer_flips_role() {
        let local = id("link", Role::Sender, Some("client"));
        let peer = local.peer(Some("broker".to_owned()));
        assert_eq!(peer.role(), Role::Receiver);
        assert_eq!(peer.name(), "link");
        assert_eq!(peer.container_id(), Some("broker"));
    }

    // ── 8. serde_validates_name ─────────────────────────────────────

    #[test]
    fn serde_validates_name() {
        let parsed: LinkIdentifier =
            serde_json::from_str(r#"{"name":"q1","role":"receiver","container_id":null}"#)
                .expect("valid json");
        assert_eq!(parsed, id("Q1", Role::Receiver, None));

        let bad = serde_json::from_str::<LinkIdentifier>(r#"{"name":"","role":"sender"}"#);
        assert!(bad.is_err());
    }

    // ── 9. display_includes_container ───────────────────────────────

    #[test]
    fn display_includes_container() {
        assert_eq!(id("q", Role::Sender, Some("c")).to_string(), "c/q[sender]");
        assert_eq!(id("q", Role::Receiver, None).to_string(), "q[receiver]");
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(id: &LinkIdentifier) -> u64 {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        hasher.finish()
    }

    proptest! {
        /// Changing the case of name and container never changes equality or hash.
        #[test]
        fn case_changes_preserve_identity(
            name in "[a-zA-Z0-9_-]{1,24}",
            container in proptest::option::of("[a-zA-Z0-9]{1,12}"),
            receiver in any::<bool>(),
        ) {
            let role = if receiver { Role::Receiver } else { Role::Sender };
            let a = LinkIdentifier::new(name.clone(), role, container.clone()).expect("valid");
            let b = LinkIdentifier::new(
                name.to_uppercase(),
                role,
                container.map(|c| c.to_lowercase()),
            )
            .expect("valid");
            prop_assert_eq!(&a, &b);
            prop_assert_eq!(hash_of(&a), hash_of(&b));
        }

        /// Storage keys agree exactly when identifiers are equal.
        #[test]
        fn storage_key_tracks_equality(
            a_name in "[a-zA-Z/:0-9]{1,8}",
            a_container in proptest::option::of("[a-zA-Z/:0-9-]{0,6}"),
            b_name in "[a-zA-Z/:0-9]{1,8}",
            b_container in proptest::option::of("[a-zA-Z/:0-9-]{0,6}"),
        ) {
            let a = LinkIdentifier::new(a_name, Role::Sender, a_container).expect("valid");
            let b = LinkIdentifier::new(b_name, Role::Sender, b_container).expect("valid");
            prop_assert_eq!(a == b, a.storage_key() == b.storage_key());
        }

        /// Distinct names never compare equal.
        #[test]
        fn distinct_names_differ(a in "[a-z]{1,12}", b in "[a-z]{1,12}") {
            prop_assume!(a != b);
            let x = LinkIdentifier::new(a, Role::Sender, None).expect("valid");
            let y = LinkIdentifier::new(b, Role::Sender, None).expect("valid");
            prop_assert_ne!(x, y);
        }
    }
}
