//! Connection and session scope of a live link.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Process-local identity of a connection instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u64);

/// A session is identified by its connection and local channel number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId {
    pub connection: ConnectionId,
    pub channel: u16,
}

/// Where a live link is currently attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkScope {
    pub session: SessionId,
}

impl LinkScope {
    pub fn new(connection: u64, channel: u16) -> Self {
        Self {
            session: SessionId {
                connection: ConnectionId(connection),
                channel,
            },
        }
    }

    pub fn connection(&self) -> ConnectionId {
        self.session.connection
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/ch-{}", self.connection, self.channel)
    }
}
