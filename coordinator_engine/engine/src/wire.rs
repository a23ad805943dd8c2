//! JSON bodies of the HTTP interface, shared by the server and the HTTP transport.
//!
//! Opaque bytes (protocol messages, payloads, signatures) travel as standard base64.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::CoordinatorError;
use crate::session::{FinalizeReceipt, JoinOutcome, SessionStatus};
use crate::types::{Outbound, PartyId, Round, SessionKind};

pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn decode(text: &str) -> Result<Vec<u8>, CoordinatorError> {
    STANDARD
        .decode(text)
        .map_err(|e| CoordinatorError::DecodeError(format!("invalid base64: {e}")))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitiateKeygenRequest {
    pub t: i64,
    pub n: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitiateKeygenResponse {
    #[serde(rename = "sessionID")]
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitiateSigningRequest {
    #[serde(rename = "sessionID")]
    pub session_id: String,
    pub t: i64,
    pub n: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitiateSigningResponse {
    pub t: u16,
    pub n: u16,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JoinKeygenRequest {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinSigningRequest {
    #[serde(rename = "partyID")]
    pub party_id: PartyId,
}

/// `t` may be absent on signing joins from other coordinators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinResponse {
    #[serde(rename = "partyID")]
    pub party_id: PartyId,
    #[serde(default)]
    pub t: u16,
    pub n: u16,
}

impl From<&JoinOutcome> for JoinResponse {
    fn from(outcome: &JoinOutcome) -> Self {
        JoinResponse {
            party_id: outcome.party_id,
            t: outcome.threshold,
            n: outcome.total_parties,
        }
    }
}

impl From<JoinResponse> for JoinOutcome {
    fn from(resp: JoinResponse) -> Self {
        JoinOutcome {
            party_id: resp.party_id,
            threshold: resp.t,
            total_parties: resp.n,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    /// `0` broadcasts.
    pub to: PartyId,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    #[serde(rename = "partyID")]
    pub party_id: PartyId,
    pub round: Round,
    pub messages: Vec<WireMessage>,
}

impl SubmitRequest {
    pub fn new(party_id: PartyId, round: Round, outbound: &[Outbound]) -> Self {
        SubmitRequest {
            party_id,
            round,
            messages: outbound
                .iter()
                .map(|m| WireMessage {
                    to: m.to,
                    content: encode(&m.content),
                })
                .collect(),
        }
    }

    /// Decode every message; a single bad payload rejects the whole batch.
    pub fn into_outbound(self) -> Result<Vec<Outbound>, CoordinatorError> {
        self.messages
            .into_iter()
            .map(|m| {
                Ok(Outbound {
                    to: m.to,
                    content: decode(&m.content)?,
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesQuery {
    #[serde(rename = "partyID")]
    pub party_id: PartyId,
    pub round: Round,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesResponse {
    #[serde(default)]
    pub messages: Vec<String>,
}

impl MessagesResponse {
    pub fn from_contents(contents: &[Vec<u8>]) -> Self {
        MessagesResponse {
            messages: contents.iter().map(|c| encode(c)).collect(),
        }
    }

    pub fn decode_all(&self) -> Result<Vec<Vec<u8>>, CoordinatorError> {
        self.messages.iter().map(|m| decode(m)).collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ack {
    #[serde(default)]
    pub message: String,
}

impl Ack {
    pub fn new(message: impl Into<String>) -> Self {
        Ack {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    #[serde(rename = "partyIDs")]
    pub party_ids: Vec<PartyId>,
    pub joined_parties: Vec<PartyId>,
    pub t: u16,
    pub n: u16,
    /// Per-round message counts.
    #[serde(default)]
    pub messages: BTreeMap<Round, usize>,
    #[serde(default)]
    pub has_transaction: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_digest: Option<String>,
}

impl From<SessionStatus> for StatusResponse {
    fn from(status: SessionStatus) -> Self {
        StatusResponse {
            party_ids: status.party_ids,
            joined_parties: status.joined_parties,
            t: status.threshold,
            n: status.total_parties,
            messages: status.message_counts,
            has_transaction: status.has_transaction,
            transaction_digest: status.transaction_digest,
        }
    }
}

impl StatusResponse {
    pub fn into_status(self, session_id: &str, kind: SessionKind) -> SessionStatus {
        SessionStatus {
            session_id: session_id.to_string(),
            kind,
            party_ids: self.party_ids,
            joined_parties: self.joined_parties,
            threshold: self.t,
            total_parties: self.n,
            message_counts: self.messages,
            has_transaction: self.has_transaction,
            transaction_digest: self.transaction_digest,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRequest {
    pub transaction: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionResponse {
    /// Older coordinators answered under `transaction`.
    #[serde(alias = "transaction")]
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizeRequest {
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeResponse {
    pub message: String,
    pub transaction_length: usize,
    pub signature_length: usize,
    pub transaction_digest: String,
}

impl From<&FinalizeReceipt> for FinalizeResponse {
    fn from(receipt: &FinalizeReceipt) -> Self {
        FinalizeResponse {
            message: "Transaction finalized successfully".to_string(),
            transaction_length: receipt.transaction_length,
            signature_length: receipt.signature_length,
            transaction_digest: receipt.transaction_digest.clone(),
        }
    }
}

impl FinalizeResponse {
    /// The coordinator does not echo the signature back; the caller supplies it.
    pub fn into_receipt(self, session_id: &str, signature: Vec<u8>) -> FinalizeReceipt {
        FinalizeReceipt {
            session_id: session_id.to_string(),
            transaction_length: self.transaction_length,
            signature_length: self.signature_length,
            transaction_digest: self.transaction_digest,
            signature,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub keygen_sessions: usize,
    pub signing_sessions: usize,
}

/// Error body: `error` carries [`CoordinatorError::kind`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round: Option<Round>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub party: Option<PartyId>,
}

impl From<&CoordinatorError> for ErrorBody {
    fn from(err: &CoordinatorError) -> Self {
        let mut body = ErrorBody {
            error: err.kind().to_string(),
            message: err.to_string(),
            round: None,
            received: None,
            expected: None,
            detail: None,
            party: None,
        };
        match err {
            CoordinatorError::InvalidParameters(detail) | CoordinatorError::DecodeError(detail) => {
                body.detail = Some(detail.clone())
            }
            CoordinatorError::SessionNotFound(id)
            | CoordinatorError::SessionExists(id)
            | CoordinatorError::SessionFull(id)
            | CoordinatorError::NotYetStaged(id) => body.detail = Some(id.clone()),
            CoordinatorError::UnknownParty { session_id, party } => {
                body.detail = Some(session_id.clone());
                body.party = Some(*party);
            }
            CoordinatorError::RoundIncomplete {
                round,
                received,
                expected,
            } => {
                body.round = Some(*round);
                body.received = Some(*received);
                body.expected = Some(*expected);
            }
            CoordinatorError::LockPoisoned => {}
        }
        body
    }
}

impl ErrorBody {
    /// Rebuild the typed error on the client side. Unknown kinds map to `None`.
    pub fn to_coordinator_error(&self) -> Option<CoordinatorError> {
        let detail = || self.detail.clone().unwrap_or_default();
        let err = match self.error.as_str() {
            "InvalidParameters" => CoordinatorError::InvalidParameters(detail()),
            "SessionNotFound" => CoordinatorError::SessionNotFound(detail()),
            "SessionExists" => CoordinatorError::SessionExists(detail()),
            "SessionFull" => CoordinatorError::SessionFull(detail()),
            "UnknownParty" => CoordinatorError::UnknownParty {
                session_id: detail(),
                party: self.party.unwrap_or(PartyId::BROADCAST),
            },
            "RoundIncomplete" => CoordinatorError::RoundIncomplete {
                round: self.round.unwrap_or_default(),
                received: self.received.unwrap_or_default(),
                expected: self.expected.unwrap_or_default(),
            },
            "NotYetStaged" => CoordinatorError::NotYetStaged(detail()),
            "DecodeError" => CoordinatorError::DecodeError(detail()),
            "LockPoisoned" => CoordinatorError::LockPoisoned,
            _ => return None,
        };
        Some(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(decode("not base64!"), Err(CoordinatorError::DecodeError(_))));
    }

    proptest! {
        #[test]
        fn base64_round_trips_any_payload(content in proptest::collection::vec(any::<u8>(), 0..512)) {
            prop_assert_eq!(decode(&encode(&content)).unwrap(), content);
        }
    }

    #[test]
    fn finalize_receipt_survives_the_wire() {
        let receipt = FinalizeReceipt {
            session_id: "tx-9".into(),
            transaction_length: 10,
            signature_length: 64,
            transaction_digest: crate::session::payload_digest(b"0123456789"),
            signature: vec![7u8; 64],
        };
        let json = serde_json::to_value(FinalizeResponse::from(&receipt)).unwrap();
        assert_eq!(json["transactionLength"], 10);
        assert_eq!(json["signatureLength"], 64);

        let parsed: FinalizeResponse = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.into_receipt("tx-9", vec![7u8; 64]), receipt);
    }

    #[test]
    fn submit_request_uses_wire_field_names() {
        let req = SubmitRequest::new(
            PartyId(2),
            1,
            &[Outbound::broadcast(b"hi".to_vec()), Outbound::directed(PartyId(3), vec![1])],
        );
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["partyID"], 2);
        assert_eq!(json["round"], 1);
        assert_eq!(json["messages"][0]["to"], 0);
        assert_eq!(json["messages"][0]["content"], "aGk=");
        assert_eq!(json["messages"][1]["to"], 3);
    }

    #[test]
    fn status_message_counts_keyed_by_round() {
        let body = r#"{"partyIDs":[1,2],"joinedParties":[1],"messages":{"1":2},"t":2,"n":2,"hasTransaction":true}"#;
        let status: StatusResponse = serde_json::from_str(body).unwrap();
        assert_eq!(status.messages.get(&1), Some(&2));
        assert_eq!(status.joined_parties, vec![PartyId(1)]);
        assert!(status.has_transaction);
    }

    #[test]
    fn keygen_status_without_counts_still_parses() {
        let body = r#"{"partyIDs":[1,2,3],"joinedParties":[],"t":2,"n":3}"#;
        let status: StatusResponse = serde_json::from_str(body).unwrap();
        assert!(status.messages.is_empty());
        assert!(!status.has_transaction);
    }

    #[test]
    fn transaction_response_accepts_both_field_names() {
        let a: TransactionResponse = serde_json::from_str(r#"{"message":"AQI="}"#).unwrap();
        let b: TransactionResponse = serde_json::from_str(r#"{"transaction":"AQI="}"#).unwrap();
        assert_eq!(a.message, b.message);
    }

    #[test]
    fn error_body_round_trips_kind() {
        let errors = [
            CoordinatorError::SessionNotFound("abc".into()),
            CoordinatorError::RoundIncomplete {
                round: 2,
                received: 4,
                expected: 6,
            },
            CoordinatorError::UnknownParty {
                session_id: "abc".into(),
                party: PartyId(7),
            },
            CoordinatorError::LockPoisoned,
        ];
        for err in errors {
            let body = ErrorBody::from(&err);
            let json = serde_json::to_string(&body).unwrap();
            let parsed: ErrorBody = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed.to_coordinator_error(), Some(err));
        }
    }
}
