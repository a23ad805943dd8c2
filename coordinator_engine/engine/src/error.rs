//! Centralized coordinator error types.

use thiserror::Error;

use crate::types::PartyId;

/// Errors raised by the session coordinator (store, relay, transaction stage).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    /// Threshold or party count out of range (`1 <= t <= n` violated).
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),
    #[error("Session not found: {0}")]
    SessionNotFound(String),
    /// Signing session IDs are caller-chosen and may collide.
    #[error("Session already exists: {0}")]
    SessionExists(String),
    #[error("Session is full: {0}")]
    SessionFull(String),
    /// Party is not part of the session (never joined, or outside `partyIDs`).
    #[error("Unknown party {party} in session {session_id}")]
    UnknownParty { session_id: String, party: PartyId },
    /// Retryable: the round has not collected its expected messages yet.
    #[error("Round {round} incomplete: {received}/{expected} messages")]
    RoundIncomplete {
        round: u32,
        received: usize,
        expected: usize,
    },
    #[error("Transaction not yet staged for session {0}")]
    NotYetStaged(String),
    /// Malformed base64 or JSON payload.
    #[error("Decode error: {0}")]
    DecodeError(String),
    #[error("Session lock poisoned")]
    LockPoisoned,
}

impl CoordinatorError {
    /// Stable machine-readable kind used on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            CoordinatorError::InvalidParameters(_) => "InvalidParameters",
            CoordinatorError::SessionNotFound(_) => "SessionNotFound",
            CoordinatorError::SessionExists(_) => "SessionExists",
            CoordinatorError::SessionFull(_) => "SessionFull",
            CoordinatorError::UnknownParty { .. } => "UnknownParty",
            CoordinatorError::RoundIncomplete { .. } => "RoundIncomplete",
            CoordinatorError::NotYetStaged(_) => "NotYetStaged",
            CoordinatorError::DecodeError(_) => "DecodeError",
            CoordinatorError::LockPoisoned => "LockPoisoned",
        }
    }

    /// Whether a driver should keep polling rather than abort.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoordinatorError::RoundIncomplete { .. } | CoordinatorError::NotYetStaged(_)
        )
    }
}

/// Failure inside the (external) cryptographic round function.
#[derive(Error, Debug)]
pub enum RoundError {
    #[error("Malformed protocol message: {0}")]
    MessageMalformed(String),
    #[error("Cryptographic failure: {0}")]
    CryptoFailure(String),
    /// Round function called out of order (e.g. after it already produced its result).
    #[error("Protocol state error: {0}")]
    State(String),
}

/// Errors surfaced by a party's round driver.
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Coordinator error: {0}")]
    Coordinator(#[from] CoordinatorError),
    /// Network-level failure after the request may have reached the coordinator.
    /// Reads retry it; writes do not.
    #[error("Transport error: {0}")]
    Transport(String),
    /// No connection was established, so the coordinator never saw the request.
    #[error("Coordinator unreachable: {0}")]
    Unreachable(String),
    /// Malformed base64/JSON from the coordinator; fatal for this party.
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Round function error: {0}")]
    Round(#[from] RoundError),
    #[error("Signature verification failed")]
    SignatureInvalid,
    #[error("Timed out waiting for {waiting_for}")]
    Timeout { waiting_for: String },
    #[error("Driver cancelled")]
    Cancelled,
    #[error("Round function finished without producing a result")]
    MissingResult,
}

impl DriverError {
    /// Transport failures and retryable coordinator answers keep the driver polling.
    pub fn is_retryable(&self) -> bool {
        match self {
            DriverError::Transport(_) | DriverError::Unreachable(_) => true,
            DriverError::Coordinator(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Safe to re-send even for writes.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, DriverError::Unreachable(_))
    }
}
