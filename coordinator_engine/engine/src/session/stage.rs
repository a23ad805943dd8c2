//! Transaction stage for signing sessions: a single slot for the payload to sign, and
//! the terminal finalize step that records the signature and retires the session.

use tracing::{info, warn};

use crate::error::CoordinatorError;
use crate::session::payload_digest;
use crate::session::store::{lock_session, SessionStore};

/// What the coordinator reports back once a signing session is finalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeReceipt {
    pub session_id: String,
    pub transaction_length: usize,
    pub signature_length: usize,
    pub transaction_digest: String,
    pub signature: Vec<u8>,
}

impl SessionStore {
    /// Stage the payload to sign. A later call overwrites the earlier payload.
    pub fn stage_transaction(&self, session_id: &str, payload: Vec<u8>) -> Result<(), CoordinatorError> {
        self.with_session(session_id, |session| {
            let digest = payload_digest(&payload);
            if let Some(previous) = session.transaction.as_deref() {
                warn!(
                    session_id,
                    previous = %payload_digest(previous),
                    digest = %digest,
                    "overwriting staged transaction"
                );
            }
            info!(session_id, bytes = payload.len(), digest = %digest, "transaction staged");
            session.transaction = Some(payload);
            session.touch();
            Ok(())
        })
    }

    pub fn fetch_transaction(&self, session_id: &str) -> Result<Vec<u8>, CoordinatorError> {
        self.with_session(session_id, |session| {
            session.touch();
            session
                .transaction
                .clone()
                .ok_or_else(|| CoordinatorError::NotYetStaged(session_id.to_string()))
        })
    }

    /// Record the final signature and delete the session.
    ///
    /// Not idempotent: a second call finds no session. The signature is not checked here;
    /// drivers verify it before submitting.
    pub fn finalize(&self, session_id: &str, signature: Vec<u8>) -> Result<FinalizeReceipt, CoordinatorError> {
        self.with_session(session_id, |session| {
            if session.transaction.is_none() {
                return Err(CoordinatorError::NotYetStaged(session_id.to_string()));
            }
            Ok(())
        })?;

        // Whoever removes the entry first owns the finalize; concurrent callers see NotFound.
        let handle = self.remove(session_id)?;
        let session = lock_session(&handle)?;
        let transaction = session.transaction.as_deref().unwrap_or_default();

        let receipt = FinalizeReceipt {
            session_id: session_id.to_string(),
            transaction_length: transaction.len(),
            signature_length: signature.len(),
            transaction_digest: payload_digest(transaction),
            signature,
        };
        info!(
            session_id,
            transaction_digest = %receipt.transaction_digest,
            signature_digest = %payload_digest(&receipt.signature),
            "session finalized"
        );
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SessionKind;

    fn signing_store() -> SessionStore {
        let store = SessionStore::new(SessionKind::Signing);
        store.create_with_id("s", 2, 2).unwrap();
        store
    }

    #[test]
    fn fetch_before_stage_fails() {
        let store = signing_store();
        assert_eq!(
            store.fetch_transaction("s"),
            Err(CoordinatorError::NotYetStaged("s".into()))
        );
        assert!(!store.status("s").unwrap().has_transaction);
    }

    #[test]
    fn stage_overwrites() {
        let store = signing_store();
        store.stage_transaction("s", b"first".to_vec()).unwrap();
        store.stage_transaction("s", b"second".to_vec()).unwrap();
        assert_eq!(store.fetch_transaction("s").unwrap(), b"second".to_vec());
        assert!(store.status("s").unwrap().has_transaction);
    }

    #[test]
    fn stage_unknown_session() {
        let store = signing_store();
        assert!(matches!(
            store.stage_transaction("other", vec![1]),
            Err(CoordinatorError::SessionNotFound(_))
        ));
    }

    #[test]
    fn finalize_deletes_and_is_single_shot() {
        let store = signing_store();
        store.stage_transaction("s", vec![0u8; 10]).unwrap();

        let receipt = store.finalize("s", vec![1u8; 64]).unwrap();
        assert_eq!(receipt.transaction_length, 10);
        assert_eq!(receipt.signature_length, 64);

        assert!(matches!(store.status("s"), Err(CoordinatorError::SessionNotFound(_))));
        assert!(matches!(
            store.finalize("s", vec![1u8; 64]),
            Err(CoordinatorError::SessionNotFound(_))
        ));
    }

    #[test]
    fn finalize_requires_staged_transaction() {
        let store = signing_store();
        assert!(matches!(
            store.finalize("s", vec![1]),
            Err(CoordinatorError::NotYetStaged(_))
        ));
        assert!(store.contains("s").unwrap());
    }
}
