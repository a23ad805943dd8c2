//! Shared data types for the coordinator: party IDs, relay messages and session kinds.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a party within one session. Positive; `0` is reserved for broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartyId(pub u16);

impl PartyId {
    /// The `to` address meaning "every party in the session".
    pub const BROADCAST: PartyId = PartyId(0);

    pub fn is_broadcast(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for PartyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for PartyId {
    fn from(id: u16) -> Self {
        PartyId(id)
    }
}

/// Protocol round number, starting at 1.
pub type Round = u32;

/// A single relayed protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub from: PartyId,
    /// `PartyId::BROADCAST` or a single recipient.
    pub to: PartyId,
    pub round: Round,
    pub content: Vec<u8>,
}

impl Message {
    /// Visibility rule used at retrieval time.
    pub fn is_visible_to(&self, party: PartyId) -> bool {
        self.to.is_broadcast() || self.to == party
    }
}

/// Outbound `(to, content)` pair as handed to `Submit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub to: PartyId,
    pub content: Vec<u8>,
}

impl Outbound {
    pub fn broadcast(content: Vec<u8>) -> Self {
        Outbound {
            to: PartyId::BROADCAST,
            content,
        }
    }

    pub fn directed(to: PartyId, content: Vec<u8>) -> Self {
        Outbound { to, content }
    }
}

/// Which of the two session families a session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    Keygen,
    Signing,
}

impl SessionKind {
    pub fn label(&self) -> &'static str {
        match self {
            SessionKind::Keygen => "keygen",
            SessionKind::Signing => "signing",
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
