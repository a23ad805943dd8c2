//! The coordinator: both session registries plus the audit trail, behind one handle.
//!
//! Keygen and signing sessions live in separate [`SessionStore`]s with separate ID spaces.
//! Construct one `Coordinator` at process start and share it (`Arc`) with every request.

use std::time::{Duration, Instant};

use crate::audit::{AuditEventType, AuditRecord, AuditTracker};
use crate::config::CoordinatorConfig;
use crate::error::CoordinatorError;
use crate::session::{payload_digest, FinalizeReceipt, JoinOutcome, SessionStatus, SessionStore};
use crate::types::{Outbound, PartyId, Round, SessionKind};

pub struct Coordinator {
    keygen: SessionStore,
    signing: SessionStore,
    audit: AuditTracker,
    session_ttl: Option<Duration>,
}

/// Session counts for `/health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Health {
    pub keygen_sessions: usize,
    pub signing_sessions: usize,
}

impl Default for Coordinator {
    fn default() -> Self {
        Coordinator::new(&CoordinatorConfig::default())
    }
}

impl Coordinator {
    pub fn new(config: &CoordinatorConfig) -> Self {
        Coordinator {
            keygen: SessionStore::new(SessionKind::Keygen),
            signing: SessionStore::new(SessionKind::Signing),
            audit: AuditTracker::new(config.audit_capacity),
            session_ttl: config.session_ttl,
        }
    }

    pub fn store(&self, kind: SessionKind) -> &SessionStore {
        match kind {
            SessionKind::Keygen => &self.keygen,
            SessionKind::Signing => &self.signing,
        }
    }

    pub fn audit(&self) -> &AuditTracker {
        &self.audit
    }

    pub fn session_ttl(&self) -> Option<Duration> {
        self.session_ttl
    }

    /// `POST /keygen/initiate`
    pub fn initiate_keygen(&self, threshold: i64, total_parties: i64) -> Result<String, CoordinatorError> {
        let session_id = self.keygen.create(threshold, total_parties)?;
        self.audit.log(AuditRecord::new(
            AuditEventType::SessionCreated,
            SessionKind::Keygen,
            session_id.clone(),
            None,
            format!("t={threshold} n={total_parties}"),
        ));
        Ok(session_id)
    }

    /// `POST /keygen/{id}/join`
    pub fn join_keygen(&self, session_id: &str) -> Result<JoinOutcome, CoordinatorError> {
        let outcome = self.keygen.join_next(session_id)?;
        self.log_join(SessionKind::Keygen, session_id, &outcome);
        Ok(outcome)
    }

    /// `POST /sign/initiate`
    pub fn initiate_signing(
        &self,
        session_id: &str,
        threshold: i64,
        total_parties: i64,
    ) -> Result<(u16, u16), CoordinatorError> {
        let (t, n) = self.signing.create_with_id(session_id, threshold, total_parties)?;
        self.audit.log(AuditRecord::new(
            AuditEventType::SessionCreated,
            SessionKind::Signing,
            session_id,
            None,
            format!("t={t} n={n}"),
        ));
        Ok((t, n))
    }

    /// `POST /sign/{id}/join`
    pub fn join_signing(&self, session_id: &str, party: PartyId) -> Result<JoinOutcome, CoordinatorError> {
        let outcome = self.signing.join_as(session_id, party)?;
        self.log_join(SessionKind::Signing, session_id, &outcome);
        Ok(outcome)
    }

    /// `POST /{keygen|sign}/{id}/messages`
    pub fn submit(
        &self,
        kind: SessionKind,
        session_id: &str,
        from: PartyId,
        round: Round,
        outbound: Vec<Outbound>,
    ) -> Result<usize, CoordinatorError> {
        let submitted = outbound.len();
        let count = self.store(kind).submit(session_id, from, round, outbound)?;
        self.audit.log(AuditRecord::new(
            AuditEventType::MessagesSubmitted,
            kind,
            session_id,
            Some(from),
            format!("round {round}: {submitted} message(s), {count} total"),
        ));
        Ok(count)
    }

    /// `GET /{keygen|sign}/{id}/messages`
    pub fn retrieve(
        &self,
        kind: SessionKind,
        session_id: &str,
        party: PartyId,
        round: Round,
    ) -> Result<Vec<Vec<u8>>, CoordinatorError> {
        self.store(kind).retrieve(session_id, party, round)
    }

    /// `GET /{keygen|sign}/{id}/status`
    pub fn status(&self, kind: SessionKind, session_id: &str) -> Result<SessionStatus, CoordinatorError> {
        self.store(kind).status(session_id)
    }

    /// `POST /sign/{id}/broadcast`
    pub fn stage_transaction(&self, session_id: &str, payload: Vec<u8>) -> Result<(), CoordinatorError> {
        let digest = payload_digest(&payload);
        let length = payload.len();
        self.signing.stage_transaction(session_id, payload)?;
        self.audit.log(AuditRecord::new(
            AuditEventType::TransactionStaged,
            SessionKind::Signing,
            session_id,
            None,
            format!("{length} bytes, blake3 {digest}"),
        ));
        Ok(())
    }

    /// `GET /sign/{id}/transaction`
    pub fn fetch_transaction(&self, session_id: &str) -> Result<Vec<u8>, CoordinatorError> {
        self.signing.fetch_transaction(session_id)
    }

    /// `POST /sign/{id}/finalize`
    pub fn finalize(&self, session_id: &str, signature: Vec<u8>) -> Result<FinalizeReceipt, CoordinatorError> {
        let receipt = self.signing.finalize(session_id, signature)?;
        self.audit.log(AuditRecord::new(
            AuditEventType::SessionFinalized,
            SessionKind::Signing,
            session_id,
            None,
            format!(
                "transaction {} signed ({} byte signature)",
                receipt.transaction_digest, receipt.signature_length
            ),
        ));
        Ok(receipt)
    }

    /// Drop sessions idle past the configured TTL from both registries.
    pub fn sweep_expired(&self) -> Result<usize, CoordinatorError> {
        match self.session_ttl {
            Some(ttl) => self.sweep_expired_at(Instant::now(), ttl),
            None => Ok(0),
        }
    }

    pub fn sweep_expired_at(&self, now: Instant, ttl: Duration) -> Result<usize, CoordinatorError> {
        let mut removed = 0;
        for store in [&self.keygen, &self.signing] {
            for session_id in store.sweep_expired(now, ttl)? {
                self.audit.log(AuditRecord::new(
                    AuditEventType::SessionExpired,
                    store.kind(),
                    session_id,
                    None,
                    format!("idle for more than {}s", ttl.as_secs()),
                ));
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn health(&self) -> Result<Health, CoordinatorError> {
        Ok(Health {
            keygen_sessions: self.keygen.len()?,
            signing_sessions: self.signing.len()?,
        })
    }

    fn log_join(&self, kind: SessionKind, session_id: &str, outcome: &JoinOutcome) {
        self.audit.log(AuditRecord::new(
            AuditEventType::PartyJoined,
            kind,
            session_id,
            Some(outcome.party_id),
            format!("party {} of {}", outcome.party_id, outcome.total_parties),
        ));
    }
}
