//! Per-party round drivers.
//!
//! A driver walks one party through a session: join, wait for quorum, then alternate
//! between calling its [`RoundFunction`] and exchanging that round's messages through the
//! coordinator. Drivers share nothing with each other; all coordination goes through the
//! relay.
//!
//! ```text
//! keygen:  Join -> AwaitingQuorum -> Round(r) -> AwaitingRoundCompletion(r) -> ... -> Finished
//! signing: Join -> AwaitingQuorum -> [Staging] -> AwaitingTransaction -> Round(r) -> ... -> Finished
//! ```

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::PollPolicy;
use crate::error::{CoordinatorError, DriverError, RoundError};
use crate::session::{payload_digest, threshold_reached, FinalizeReceipt, JoinOutcome, SessionStatus};
use crate::types::{Outbound, PartyId, Round, SessionKind};

mod poll;
pub mod transport;

use poll::{poll_until, retry_unreachable};
pub use transport::{CoordinatorApi, HttpCoordinator, LocalCoordinator};

/// Round functions that never produce a result are cut off here.
pub const MAX_ROUNDS: Round = 16;

/// What one call into a round function produced.
#[derive(Debug)]
pub struct Advance<T> {
    /// Messages for this round. Empty on the terminal call.
    pub outbound: Vec<Vec<u8>>,
    /// Set on the terminal call.
    pub result: Option<T>,
}

impl<T> Advance<T> {
    pub fn send(outbound: Vec<Vec<u8>>) -> Self {
        Advance {
            outbound,
            result: None,
        }
    }

    pub fn finish(result: T) -> Self {
        Advance {
            outbound: Vec::new(),
            result: Some(result),
        }
    }
}

/// The cryptographic protocol of one party, one call per round.
///
/// The first call gets no inbound messages; every later call gets what the coordinator
/// delivered to this party for the previous round, in no particular sender order.
pub trait RoundFunction {
    type Output;

    fn advance(&mut self, inbound: Vec<Vec<u8>>) -> Result<Advance<Self::Output>, RoundError>;
}

/// A round function producing a signature over a message supplied before round 1.
pub trait ThresholdSigner: RoundFunction<Output = Vec<u8>> {
    fn load_message(&mut self, message: &[u8]) -> Result<(), RoundError>;

    /// Check a signature against the group public key.
    fn verify(&self, message: &[u8], signature: &[u8]) -> bool;
}

/// Session facts a keygen round function is built from, known only after joining.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeygenAssignment {
    pub party_id: PartyId,
    pub threshold: u16,
    pub party_ids: Vec<PartyId>,
}

/// Parameters of one party's signing run.
#[derive(Debug, Clone)]
pub struct SigningRequest {
    pub session_id: String,
    /// Slot in the signing session, `1..=total_parties`.
    pub party_id: PartyId,
    pub threshold: u16,
    pub total_parties: u16,
    /// Set for the initiator only; it stages these bytes once everyone has joined.
    pub payload: Option<Vec<u8>>,
}

/// A verified signature and the payload it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedPayload {
    pub session_id: String,
    pub party_id: PartyId,
    pub payload: Vec<u8>,
    pub signature: Vec<u8>,
}

pub struct RoundDriver<A> {
    api: A,
    policy: PollPolicy,
    cancel: CancellationToken,
}

impl<A: CoordinatorApi> RoundDriver<A> {
    pub fn new(api: A, policy: PollPolicy) -> Self {
        RoundDriver {
            api,
            policy,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Join a keygen session and run `build`'s round function to completion.
    pub async fn run_keygen<R, F>(&self, session_id: &str, build: F) -> Result<R::Output, DriverError>
    where
        R: RoundFunction,
        F: FnOnce(&KeygenAssignment) -> Result<R, RoundError>,
    {
        let api = &self.api;
        let joined = self.send("keygen join", move || api.join_keygen(session_id)).await?;
        let party = joined.party_id;
        info!(session_id, party_id = %party, t = joined.threshold, n = joined.total_parties, "joined keygen session");

        let status = self.await_quorum(SessionKind::Keygen, session_id).await?;
        let assignment = KeygenAssignment {
            party_id: party,
            threshold: status.threshold,
            party_ids: status.party_ids,
        };
        let mut round_fn = build(&assignment)?;

        let mut inbound = Vec::new();
        for round in 1..=MAX_ROUNDS {
            let advance = round_fn.advance(inbound)?;
            if let Some(result) = advance.result {
                info!(session_id, party_id = %party, rounds = round - 1, "keygen finished");
                return Ok(result);
            }
            let outbound = address_keygen_round(round, &assignment, advance.outbound)?;
            self.send(&format!("keygen round {round}"), move || {
                api.submit(SessionKind::Keygen, session_id, party, round, outbound.clone())
            })
            .await?;
            info!(session_id, party_id = %party, round, "submitted keygen round");

            inbound = self.await_keygen_round(session_id, party, round).await?;
        }
        Err(DriverError::MissingResult)
    }

    /// Join (creating the session if it does not exist yet) and produce a verified signature.
    ///
    /// Finalizing is left to the caller: other signers may still be reading the last round.
    pub async fn run_signing<S: ThresholdSigner>(
        &self,
        request: &SigningRequest,
        mut signer: S,
    ) -> Result<SignedPayload, DriverError> {
        let session_id = request.session_id.as_str();
        let party = request.party_id;
        self.join_or_create(request).await?;
        info!(session_id, party_id = %party, "joined signing session");

        self.await_quorum(SessionKind::Signing, session_id).await?;

        let api = &self.api;
        if let Some(payload) = &request.payload {
            self.send("transaction", move || api.stage_transaction(session_id, payload))
                .await?;
            info!(session_id, digest = %payload_digest(payload), "staged transaction");
        }
        let payload = self.await_transaction(session_id).await?;
        signer.load_message(&payload)?;

        let mut inbound = Vec::new();
        for round in 1..=MAX_ROUNDS {
            let advance = signer.advance(inbound)?;
            if let Some(signature) = advance.result {
                if !signer.verify(&payload, &signature) {
                    warn!(session_id, party_id = %party, "aggregated signature does not verify");
                    return Err(DriverError::SignatureInvalid);
                }
                info!(session_id, party_id = %party, signature_digest = %payload_digest(&signature), "signature verified");
                return Ok(SignedPayload {
                    session_id: session_id.to_string(),
                    party_id: party,
                    payload,
                    signature,
                });
            }
            let outbound: Vec<Outbound> = advance.outbound.into_iter().map(Outbound::broadcast).collect();
            self.send(&format!("signing round {round}"), move || {
                api.submit(SessionKind::Signing, session_id, party, round, outbound.clone())
            })
            .await?;
            info!(session_id, party_id = %party, round, "submitted signing round");

            inbound = self.await_signing_round(session_id, party, round).await?;
        }
        Err(DriverError::MissingResult)
    }

    /// Hand the signature to the coordinator; the session is gone afterwards.
    pub async fn finalize(&self, signed: &SignedPayload) -> Result<FinalizeReceipt, DriverError> {
        let api = &self.api;
        let receipt = self
            .send("finalize", move || api.finalize(&signed.session_id, &signed.signature))
            .await?;
        info!(
            session_id = %signed.session_id,
            transaction_digest = %receipt.transaction_digest,
            "signing session finalized"
        );
        Ok(receipt)
    }

    /// One creation attempt on `SessionNotFound`, then a single re-join.
    async fn join_or_create(&self, request: &SigningRequest) -> Result<JoinOutcome, DriverError> {
        let api = &self.api;
        let session_id = request.session_id.as_str();
        let party = request.party_id;
        match self.send("signing join", move || api.join_signing(session_id, party)).await {
            Err(DriverError::Coordinator(CoordinatorError::SessionNotFound(_))) => {
                info!(session_id, "signing session not found; creating it");
                match self
                    .send("signing session", move || {
                        api.initiate_signing(session_id, request.threshold, request.total_parties)
                    })
                    .await
                {
                    Ok(_) | Err(DriverError::Coordinator(CoordinatorError::SessionExists(_))) => {}
                    Err(e) => return Err(e),
                }
                self.send("signing join", move || api.join_signing(session_id, party)).await
            }
            other => other,
        }
    }

    /// Writes are re-sent only while the coordinator is unreachable.
    async fn send<T, F, Fut>(&self, sending: &str, attempt: F) -> Result<T, DriverError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, DriverError>>,
    {
        retry_unreachable(
            sending,
            self.policy.reconnect_interval,
            self.policy.wait_timeout,
            &self.cancel,
            attempt,
        )
        .await
    }

    async fn await_quorum(
        &self,
        kind: SessionKind,
        session_id: &str,
    ) -> Result<SessionStatus, DriverError> {
        let api = &self.api;
        poll_until(
            "quorum",
            self.policy.quorum_interval,
            self.policy.wait_timeout,
            &self.cancel,
            || async move {
                let status = api.status(kind, session_id).await?;
                Ok(status.quorum_reached().then_some(status))
            },
        )
        .await
    }

    async fn await_transaction(&self, session_id: &str) -> Result<Vec<u8>, DriverError> {
        let api = &self.api;
        poll_until(
            "transaction",
            self.policy.transaction_interval,
            self.policy.wait_timeout,
            &self.cancel,
            || async move { api.fetch_transaction(session_id).await.map(Some) },
        )
        .await
    }

    /// Keygen rounds are gated by the coordinator: `Retrieve` fails until the round is full.
    async fn await_keygen_round(
        &self,
        session_id: &str,
        party: PartyId,
        round: Round,
    ) -> Result<Vec<Vec<u8>>, DriverError> {
        let api = &self.api;
        poll_until(
            &format!("keygen round {round}"),
            self.policy.round_interval,
            self.policy.wait_timeout,
            &self.cancel,
            || async move {
                api.retrieve(SessionKind::Keygen, session_id, party, round)
                    .await
                    .map(Some)
            },
        )
        .await
    }

    /// Signing rounds are not gated; wait until `Status` shows at least `t` messages.
    async fn await_signing_round(
        &self,
        session_id: &str,
        party: PartyId,
        round: Round,
    ) -> Result<Vec<Vec<u8>>, DriverError> {
        let api = &self.api;
        let waiting_for = format!("signing round {round}");
        poll_until(
            &waiting_for,
            self.policy.round_interval,
            self.policy.wait_timeout,
            &self.cancel,
            || async move {
                let status = api.status(SessionKind::Signing, session_id).await?;
                Ok(threshold_reached(&status, round).then_some(()))
            },
        )
        .await?;
        poll_until(
            &waiting_for,
            self.policy.round_interval,
            self.policy.wait_timeout,
            &self.cancel,
            || async move {
                api.retrieve(SessionKind::Signing, session_id, party, round)
                    .await
                    .map(Some)
            },
        )
        .await
    }
}

/// Keygen round 1 broadcasts; round 2 pairs the i-th message with the i-th other party in
/// `partyIDs` order; later rounds broadcast again.
fn address_keygen_round(
    round: Round,
    assignment: &KeygenAssignment,
    outbound: Vec<Vec<u8>>,
) -> Result<Vec<Outbound>, RoundError> {
    if round != 2 {
        return Ok(outbound.into_iter().map(Outbound::broadcast).collect());
    }
    let others: Vec<PartyId> = assignment
        .party_ids
        .iter()
        .copied()
        .filter(|p| *p != assignment.party_id)
        .collect();
    if others.len() != outbound.len() {
        return Err(RoundError::State(format!(
            "round 2 produced {} messages for {} other parties",
            outbound.len(),
            others.len()
        )));
    }
    Ok(others
        .into_iter()
        .zip(outbound)
        .map(|(to, content)| Outbound::directed(to, content))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assignment(party: u16, n: u16) -> KeygenAssignment {
        KeygenAssignment {
            party_id: PartyId(party),
            threshold: 2,
            party_ids: (1..=n).map(PartyId).collect(),
        }
    }

    #[test]
    fn round_two_is_directed_in_party_order_skipping_self() {
        let outbound = address_keygen_round(2, &assignment(2, 4), vec![vec![1], vec![3], vec![4]]).unwrap();
        let targets: Vec<u16> = outbound.iter().map(|m| m.to.0).collect();
        assert_eq!(targets, vec![1, 3, 4]);
        assert_eq!(outbound[1].content, vec![3]);
    }

    #[test]
    fn round_one_broadcasts() {
        let outbound = address_keygen_round(1, &assignment(1, 3), vec![vec![9]]).unwrap();
        assert!(outbound.iter().all(|m| m.to.is_broadcast()));
    }

    #[test]
    fn round_two_count_mismatch_is_a_state_error() {
        let err = address_keygen_round(2, &assignment(1, 3), vec![vec![1]]).unwrap_err();
        assert!(matches!(err, RoundError::State(_)));
    }
}
