// File: src/session/store.rs

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error::CoordinatorError;
use crate::session::{Session, SessionStatus};
use crate::types::{PartyId, SessionKind};

/// Result of a successful `Join`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinOutcome {
    pub party_id: PartyId,
    pub threshold: u16,
    pub total_parties: u16,
}

/// In-memory registry of sessions of one kind.
///
/// Constructed explicitly by whoever owns the coordinator; there is no global instance.
pub struct SessionStore {
    kind: SessionKind,
    sessions: Mutex<HashMap<String, Arc<Mutex<Session>>>>,
}

impl SessionStore {
    pub fn new(kind: SessionKind) -> Self {
        SessionStore {
            kind,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    /// `1 <= t <= n`, and `n` must fit the PartyId space.
    pub fn validate_parameters(threshold: i64, total_parties: i64) -> Result<(u16, u16), CoordinatorError> {
        if threshold < 1 || total_parties < threshold {
            return Err(CoordinatorError::InvalidParameters(format!(
                "threshold {threshold} and party count {total_parties} must satisfy 1 <= t <= n"
            )));
        }
        let n = u16::try_from(total_parties).map_err(|_| {
            CoordinatorError::InvalidParameters(format!("party count {total_parties} too large"))
        })?;
        // t <= n, so this cannot overflow once n fits
        Ok((threshold as u16, n))
    }

    /// Create a session with a coordinator-chosen ID (keygen flow).
    pub fn create(&self, threshold: i64, total_parties: i64) -> Result<String, CoordinatorError> {
        let (t, n) = Self::validate_parameters(threshold, total_parties)?;
        let session_id = uuid::Uuid::new_v4().to_string();
        let session = Session::new(session_id.clone(), self.kind, t, n);

        self.registry()?
            .insert(session_id.clone(), Arc::new(Mutex::new(session)));

        info!(kind = %self.kind, session_id = %session_id, t, n, "session created");
        Ok(session_id)
    }

    /// Create a session under a caller-chosen ID (signing flow).
    pub fn create_with_id(
        &self,
        session_id: &str,
        threshold: i64,
        total_parties: i64,
    ) -> Result<(u16, u16), CoordinatorError> {
        let (t, n) = Self::validate_parameters(threshold, total_parties)?;
        if session_id.is_empty() {
            return Err(CoordinatorError::InvalidParameters("empty session ID".into()));
        }

        let mut sessions = self.registry()?;
        if sessions.contains_key(session_id) {
            return Err(CoordinatorError::SessionExists(session_id.to_string()));
        }
        let session = Session::new(session_id.to_string(), self.kind, t, n);
        sessions.insert(session_id.to_string(), Arc::new(Mutex::new(session)));
        drop(sessions);

        info!(kind = %self.kind, session_id, t, n, "session created");
        Ok((t, n))
    }

    /// Join with the next unclaimed PartyID (keygen flow).
    pub fn join_next(&self, session_id: &str) -> Result<JoinOutcome, CoordinatorError> {
        self.with_session(session_id, |session| {
            if session.is_full() {
                return Err(CoordinatorError::SessionFull(session_id.to_string()));
            }
            let party_id = session.party_ids[session.joined_parties.len()];
            session.joined_parties.push(party_id);
            session.touch();

            debug!(kind = %session.kind, session_id, party_id = %party_id, "party joined");
            Ok(JoinOutcome {
                party_id,
                threshold: session.threshold,
                total_parties: session.total_parties,
            })
        })
    }

    /// Join under an already-known PartyID (signing flow).
    ///
    /// Re-joining with an ID that already joined succeeds without appending again.
    pub fn join_as(&self, session_id: &str, party: PartyId) -> Result<JoinOutcome, CoordinatorError> {
        self.with_session(session_id, |session| {
            if !session.party_ids.contains(&party) {
                return Err(CoordinatorError::UnknownParty {
                    session_id: session_id.to_string(),
                    party,
                });
            }
            if !session.has_joined(party) {
                if session.is_full() {
                    return Err(CoordinatorError::SessionFull(session_id.to_string()));
                }
                session.joined_parties.push(party);
                debug!(kind = %session.kind, session_id, party_id = %party, "party joined");
            }
            session.touch();

            Ok(JoinOutcome {
                party_id: party,
                threshold: session.threshold,
                total_parties: session.total_parties,
            })
        })
    }

    pub fn status(&self, session_id: &str) -> Result<SessionStatus, CoordinatorError> {
        self.with_session(session_id, |session| Ok(session.status()))
    }

    pub fn contains(&self, session_id: &str) -> Result<bool, CoordinatorError> {
        Ok(self.registry()?.contains_key(session_id))
    }

    pub fn len(&self) -> Result<usize, CoordinatorError> {
        Ok(self.registry()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, CoordinatorError> {
        Ok(self.len()? == 0)
    }

    /// Drop a session from the registry and hand back its final state.
    pub fn remove(&self, session_id: &str) -> Result<Arc<Mutex<Session>>, CoordinatorError> {
        self.registry()?
            .remove(session_id)
            .ok_or_else(|| CoordinatorError::SessionNotFound(session_id.to_string()))
    }

    /// Remove every session idle for longer than `ttl` as of `now`. Returns the removed IDs.
    pub fn sweep_expired(&self, now: Instant, ttl: Duration) -> Result<Vec<String>, CoordinatorError> {
        let candidates = self.idle_candidates(now, ttl)?;
        let expired = self.remove_idle(candidates, now, ttl)?;
        if !expired.is_empty() {
            info!(kind = %self.kind, count = expired.len(), "expired idle sessions");
        }
        Ok(expired)
    }

    /// Scans a snapshot of the handles so the registry is not held across the scan.
    fn idle_candidates(
        &self,
        now: Instant,
        ttl: Duration,
    ) -> Result<Vec<(String, Arc<Mutex<Session>>)>, CoordinatorError> {
        let handles: Vec<(String, Arc<Mutex<Session>>)> = self
            .registry()?
            .iter()
            .map(|(id, session)| (id.clone(), Arc::clone(session)))
            .collect();

        let mut candidates = Vec::new();
        for (id, handle) in handles {
            if is_idle(&handle, now, ttl)? {
                candidates.push((id, handle));
            }
        }
        Ok(candidates)
    }

    /// A candidate may have been touched, or replaced under the same ID, since the scan.
    /// Rechecked under the registry lock; session locks never wait on the registry.
    fn remove_idle(
        &self,
        candidates: Vec<(String, Arc<Mutex<Session>>)>,
        now: Instant,
        ttl: Duration,
    ) -> Result<Vec<String>, CoordinatorError> {
        let mut expired = Vec::new();
        let mut sessions = self.registry()?;
        for (id, handle) in candidates {
            let unchanged = sessions
                .get(&id)
                .is_some_and(|current| Arc::ptr_eq(current, &handle));
            if unchanged && is_idle(&handle, now, ttl)? {
                sessions.remove(&id);
                expired.push(id);
            }
        }
        Ok(expired)
    }

    /// Look up a session; the registry lock is held only for the map access.
    pub(crate) fn get(&self, session_id: &str) -> Result<Arc<Mutex<Session>>, CoordinatorError> {
        self.registry()?
            .get(session_id)
            .cloned()
            .ok_or_else(|| CoordinatorError::SessionNotFound(session_id.to_string()))
    }

    /// Run `f` with exclusive access to one session.
    pub(crate) fn with_session<R>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut Session) -> Result<R, CoordinatorError>,
    ) -> Result<R, CoordinatorError> {
        let handle = self.get(session_id)?;
        let mut session = lock_session(&handle)?;
        f(&mut session)
    }

    fn registry(&self) -> Result<MutexGuard<'_, HashMap<String, Arc<Mutex<Session>>>>, CoordinatorError> {
        self.sessions.lock().map_err(|_| CoordinatorError::LockPoisoned)
    }
}

fn is_idle(handle: &Arc<Mutex<Session>>, now: Instant, ttl: Duration) -> Result<bool, CoordinatorError> {
    let last_activity = lock_session(handle)?.last_activity;
    Ok(now.saturating_duration_since(last_activity) >= ttl)
}

pub(crate) fn lock_session(handle: &Arc<Mutex<Session>>) -> Result<MutexGuard<'_, Session>, CoordinatorError> {
    handle.lock().map_err(|_| CoordinatorError::LockPoisoned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;
    use std::thread;

    #[test]
    fn create_rejects_bad_parameters() {
        let store = SessionStore::new(SessionKind::Keygen);
        assert!(matches!(
            store.create(0, 3),
            Err(CoordinatorError::InvalidParameters(_))
        ));
        assert!(matches!(
            store.create(5, 3),
            Err(CoordinatorError::InvalidParameters(_))
        ));
        assert!(matches!(
            store.create(-1, -1),
            Err(CoordinatorError::InvalidParameters(_))
        ));
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn join_unknown_session_fails() {
        let store = SessionStore::new(SessionKind::Keygen);
        assert_eq!(
            store.join_next("missing"),
            Err(CoordinatorError::SessionNotFound("missing".into()))
        );
    }

    #[test]
    fn signing_ids_are_unique_per_store() {
        let store = SessionStore::new(SessionKind::Signing);
        store.create_with_id("tx-1", 2, 2).unwrap();
        assert_eq!(
            store.create_with_id("tx-1", 2, 2),
            Err(CoordinatorError::SessionExists("tx-1".into()))
        );
    }

    #[test]
    fn join_as_validates_and_is_idempotent() {
        let store = SessionStore::new(SessionKind::Signing);
        store.create_with_id("s", 2, 2).unwrap();

        let err = store.join_as("s", PartyId(3)).unwrap_err();
        assert_eq!(err.kind(), "UnknownParty");

        store.join_as("s", PartyId(2)).unwrap();
        store.join_as("s", PartyId(2)).unwrap();
        let status = store.status("s").unwrap();
        assert_eq!(status.joined_parties, vec![PartyId(2)]);

        store.join_as("s", PartyId(1)).unwrap();
        assert!(store.status("s").unwrap().quorum_reached());
    }

    #[test]
    fn sweep_removes_only_idle_sessions() {
        let store = SessionStore::new(SessionKind::Keygen);
        let id = store.create(1, 1).unwrap();
        let later = Instant::now() + Duration::from_secs(120);

        assert!(store.sweep_expired(later, Duration::from_secs(600)).unwrap().is_empty());
        assert_eq!(store.sweep_expired(later, Duration::from_secs(60)).unwrap(), vec![id.clone()]);
        assert!(!store.contains(&id).unwrap());
    }

    #[test]
    fn sweep_spares_sessions_touched_or_replaced_after_the_scan() {
        let store = SessionStore::new(SessionKind::Signing);
        store.create_with_id("replaced", 1, 1).unwrap();
        store.create_with_id("touched", 1, 1).unwrap();
        store.create_with_id("idle", 1, 1).unwrap();
        let later = Instant::now() + Duration::from_secs(120);
        let ttl = Duration::from_secs(60);

        let candidates = store.idle_candidates(later, ttl).unwrap();
        assert_eq!(candidates.len(), 3);

        store.remove("replaced").unwrap();
        store.create_with_id("replaced", 1, 1).unwrap();
        lock_session(&store.get("touched").unwrap()).unwrap().last_activity = later;

        let removed = store.remove_idle(candidates, later, ttl).unwrap();
        assert_eq!(removed, vec!["idle".to_string()]);
        assert!(store.contains("replaced").unwrap());
        assert!(store.contains("touched").unwrap());
    }

    #[test]
    fn concurrent_joins_assign_distinct_ids() {
        const N: u16 = 16;
        let store = Arc::new(SessionStore::new(SessionKind::Keygen));
        let id = store.create(2, N as i64).unwrap();

        let handles: Vec<_> = (0..N)
            .map(|_| {
                let store = Arc::clone(&store);
                let id = id.clone();
                thread::spawn(move || store.join_next(&id).expect("join").party_id)
            })
            .collect();

        let assigned: HashSet<PartyId> = handles
            .into_iter()
            .map(|h| h.join().expect("Thread failed"))
            .collect();
        let expected: HashSet<PartyId> = (1..=N).map(PartyId).collect();
        assert_eq!(assigned, expected);
        assert!(matches!(store.join_next(&id), Err(CoordinatorError::SessionFull(_))));
    }

    #[test]
    fn sessions_in_other_registry_are_invisible() {
        let keygen = SessionStore::new(SessionKind::Keygen);
        let signing = SessionStore::new(SessionKind::Signing);
        let id = keygen.create(1, 2).unwrap();
        assert!(matches!(signing.status(&id), Err(CoordinatorError::SessionNotFound(_))));
    }

    proptest! {
        #[test]
        fn sequential_joins_fill_one_to_n(
            (n, t) in (1i64..12).prop_flat_map(|n| (Just(n), 1i64..=n))
        ) {
            let store = SessionStore::new(SessionKind::Keygen);
            let id = store.create(t, n).unwrap();
            for expected in 1..=n {
                let outcome = store.join_next(&id).unwrap();
                prop_assert_eq!(outcome.party_id, PartyId(expected as u16));
                prop_assert_eq!(outcome.threshold as i64, t);
                prop_assert_eq!(outcome.total_parties as i64, n);
            }
            let status = store.status(&id).unwrap();
            let joined: Vec<u16> = status.joined_parties.iter().map(|p| p.0).collect();
            prop_assert_eq!(joined, (1..=n as u16).collect::<Vec<_>>());
            prop_assert!(matches!(store.join_next(&id), Err(CoordinatorError::SessionFull(_))));
        }
    }
}
