//! Session state owned by the coordinator.
//!
//! A [`SessionStore`] is one registry of sessions (one instance per [`SessionKind`]).
//! Each session sits behind its own mutex; the registry mutex only guards the map itself,
//! so requests against different sessions never wait on each other.

use std::collections::BTreeMap;
use std::time::Instant;

use crate::types::{Message, PartyId, Round, SessionKind};

pub mod relay;
pub mod stage;
pub mod store;

pub use relay::{expected_keygen_messages, threshold_reached};
pub use stage::FinalizeReceipt;
pub use store::{JoinOutcome, SessionStore};

/// One DKG or signing session.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub kind: SessionKind,
    pub threshold: u16,
    pub total_parties: u16,
    /// `1..=n`, fixed at creation.
    pub party_ids: Vec<PartyId>,
    /// Append-only, arrival order.
    pub joined_parties: Vec<PartyId>,
    /// Append-only per round.
    pub messages: BTreeMap<Round, Vec<Message>>,
    /// Payload to sign (signing sessions only).
    pub transaction: Option<Vec<u8>>,
    pub created_at: Instant,
    pub last_activity: Instant,
}

impl Session {
    pub(crate) fn new(id: String, kind: SessionKind, threshold: u16, total_parties: u16) -> Self {
        let now = Instant::now();
        Session {
            id,
            kind,
            threshold,
            total_parties,
            party_ids: (1..=total_parties).map(PartyId).collect(),
            joined_parties: Vec::new(),
            messages: BTreeMap::new(),
            transaction: None,
            created_at: now,
            last_activity: now,
        }
    }

    pub fn is_full(&self) -> bool {
        self.joined_parties.len() >= self.total_parties as usize
    }

    pub fn has_joined(&self, party: PartyId) -> bool {
        self.joined_parties.contains(&party)
    }

    pub fn message_count(&self, round: Round) -> usize {
        self.messages.get(&round).map_or(0, Vec::len)
    }

    pub(crate) fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Read-only snapshot for `Status`.
    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            session_id: self.id.clone(),
            kind: self.kind,
            party_ids: self.party_ids.clone(),
            joined_parties: self.joined_parties.clone(),
            threshold: self.threshold,
            total_parties: self.total_parties,
            message_counts: self
                .messages
                .iter()
                .map(|(round, msgs)| (*round, msgs.len()))
                .collect(),
            has_transaction: self.transaction.is_some(),
            transaction_digest: self.transaction.as_deref().map(payload_digest),
        }
    }
}

/// Snapshot returned by `Status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub session_id: String,
    pub kind: SessionKind,
    pub party_ids: Vec<PartyId>,
    pub joined_parties: Vec<PartyId>,
    pub threshold: u16,
    pub total_parties: u16,
    pub message_counts: BTreeMap<Round, usize>,
    pub has_transaction: bool,
    pub transaction_digest: Option<String>,
}

impl SessionStatus {
    pub fn quorum_reached(&self) -> bool {
        self.joined_parties.len() >= self.total_parties as usize
    }

    pub fn message_count(&self, round: Round) -> usize {
        self.message_counts.get(&round).copied().unwrap_or(0)
    }
}

/// blake3 digest (hex) used wherever payloads would otherwise be logged.
pub fn payload_digest(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}
