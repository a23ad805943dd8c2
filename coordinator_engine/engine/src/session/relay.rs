//! Message relay: addressing and round-completeness rules on top of the session store.
//!
//! The two session kinds gate completeness differently and are kept apart on purpose:
//! - keygen: the coordinator refuses `Retrieve` until the round holds its exact expected
//!   count (`n` for round 1, `n·(n−1)` for round 2, `n` otherwise);
//! - signing: no server-side gate; drivers poll `Status` until the round holds `>= t`
//!   messages (see [`threshold_reached`]).

use tracing::debug;

use crate::error::CoordinatorError;
use crate::session::store::SessionStore;
use crate::session::SessionStatus;
use crate::types::{Message, Outbound, PartyId, Round, SessionKind};

/// Messages a keygen round must hold before anyone may retrieve it.
pub fn expected_keygen_messages(total_parties: u16, round: Round) -> usize {
    let n = total_parties as usize;
    match round {
        1 => n,
        2 => n * n.saturating_sub(1),
        _ => n,
    }
}

/// Client-side completeness rule for signing rounds.
pub fn threshold_reached(status: &SessionStatus, round: Round) -> bool {
    status.message_count(round) >= status.threshold as usize
}

impl SessionStore {
    /// Append one message per `(to, content)` pair to `messages[round]`.
    ///
    /// Returns the round's message count after the append.
    pub fn submit(
        &self,
        session_id: &str,
        from: PartyId,
        round: Round,
        outbound: Vec<Outbound>,
    ) -> Result<usize, CoordinatorError> {
        self.with_session(session_id, |session| {
            if !session.has_joined(from) {
                return Err(CoordinatorError::UnknownParty {
                    session_id: session_id.to_string(),
                    party: from,
                });
            }
            if let Some(bad) = outbound
                .iter()
                .find(|m| !m.to.is_broadcast() && !session.party_ids.contains(&m.to))
            {
                return Err(CoordinatorError::UnknownParty {
                    session_id: session_id.to_string(),
                    party: bad.to,
                });
            }

            let submitted = outbound.len();
            let log = session.messages.entry(round).or_default();
            log.extend(outbound.into_iter().map(|m| Message {
                from,
                to: m.to,
                round,
                content: m.content,
            }));
            let count = log.len();
            let threshold = session.threshold as usize;
            session.touch();

            debug!(
                kind = %session.kind,
                session_id,
                party_id = %from,
                round,
                submitted,
                count,
                "messages submitted"
            );
            if session.kind == SessionKind::Signing && count >= threshold {
                debug!(session_id, round, "threshold reached");
            }
            Ok(count)
        })
    }

    /// Contents of every message in `round` addressed to `party` or broadcast, in insertion order.
    pub fn retrieve(
        &self,
        session_id: &str,
        party: PartyId,
        round: Round,
    ) -> Result<Vec<Vec<u8>>, CoordinatorError> {
        let kind = self.kind();
        self.with_session(session_id, |session| {
            let received = session.message_count(round);
            if kind == SessionKind::Keygen {
                let expected = expected_keygen_messages(session.total_parties, round);
                if received < expected {
                    return Err(CoordinatorError::RoundIncomplete {
                        round,
                        received,
                        expected,
                    });
                }
            }

            Ok(session
                .messages
                .get(&round)
                .map(|msgs| {
                    msgs.iter()
                        .filter(|m| m.is_visible_to(party))
                        .map(|m| m.content.clone())
                        .collect()
                })
                .unwrap_or_default())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keygen_session(n: i64) -> (SessionStore, String) {
        let store = SessionStore::new(SessionKind::Keygen);
        let id = store.create(2, n).unwrap();
        for _ in 0..n {
            store.join_next(&id).unwrap();
        }
        (store, id)
    }

    #[test]
    fn expected_counts_per_round() {
        assert_eq!(expected_keygen_messages(3, 1), 3);
        assert_eq!(expected_keygen_messages(3, 2), 6);
        assert_eq!(expected_keygen_messages(3, 3), 3);
        assert_eq!(expected_keygen_messages(1, 2), 0);
    }

    #[test]
    fn keygen_retrieve_gated_until_exact_count() {
        let (store, id) = keygen_session(3);

        for p in 1..=3u16 {
            let err = store.retrieve(&id, PartyId(1), 1).unwrap_err();
            assert_eq!(
                err,
                CoordinatorError::RoundIncomplete {
                    round: 1,
                    received: (p - 1) as usize,
                    expected: 3
                }
            );
            store
                .submit(&id, PartyId(p), 1, vec![Outbound::broadcast(vec![p as u8])])
                .unwrap();
        }

        for p in 1..=3u16 {
            assert_eq!(
                store.retrieve(&id, PartyId(p), 1).unwrap(),
                vec![vec![1], vec![2], vec![3]]
            );
        }
    }

    #[test]
    fn round_two_gated_until_every_pair_has_sent() {
        let (store, id) = keygen_session(3);
        let mut sent = 0;
        for from in 1..=3u16 {
            for to in (1..=3u16).filter(|to| *to != from) {
                let err = store.retrieve(&id, PartyId(to), 2).unwrap_err();
                assert_eq!(
                    err,
                    CoordinatorError::RoundIncomplete {
                        round: 2,
                        received: sent,
                        expected: 6
                    }
                );
                store
                    .submit(&id, PartyId(from), 2, vec![Outbound::directed(PartyId(to), vec![from as u8])])
                    .unwrap();
                sent += 1;
            }
        }
        assert_eq!(store.retrieve(&id, PartyId(1), 2).unwrap(), vec![vec![2], vec![3]]);
    }

    #[test]
    fn later_rounds_gated_at_n() {
        let (store, id) = keygen_session(4);
        for p in 1..=4u16 {
            let err = store.retrieve(&id, PartyId(p), 3).unwrap_err();
            assert_eq!(
                err,
                CoordinatorError::RoundIncomplete {
                    round: 3,
                    received: (p - 1) as usize,
                    expected: 4
                }
            );
            store
                .submit(&id, PartyId(p), 3, vec![Outbound::broadcast(vec![p as u8])])
                .unwrap();
        }
        assert_eq!(store.retrieve(&id, PartyId(2), 3).unwrap().len(), 4);
    }

    #[test]
    fn directed_messages_reach_only_their_recipient() {
        let (store, id) = keygen_session(3);

        // round 2: every party sends one directed message to each other party
        for from in 1..=3u16 {
            let outbound = (1..=3u16)
                .filter(|to| *to != from)
                .map(|to| Outbound::directed(PartyId(to), vec![from as u8, to as u8]))
                .collect();
            store.submit(&id, PartyId(from), 2, outbound).unwrap();
        }

        for me in 1..=3u16 {
            let inbound = store.retrieve(&id, PartyId(me), 2).unwrap();
            assert_eq!(inbound.len(), 2);
            assert!(inbound.iter().all(|m| m[1] == me as u8 && m[0] != me as u8));
        }
    }

    #[test]
    fn signing_retrieve_is_not_gated() {
        let store = SessionStore::new(SessionKind::Signing);
        store.create_with_id("s", 2, 3).unwrap();
        store.join_as("s", PartyId(1)).unwrap();

        assert!(store.retrieve("s", PartyId(1), 1).unwrap().is_empty());
        store
            .submit("s", PartyId(1), 1, vec![Outbound::broadcast(b"c1".to_vec())])
            .unwrap();
        assert_eq!(store.retrieve("s", PartyId(2), 1).unwrap(), vec![b"c1".to_vec()]);

        let status = store.status("s").unwrap();
        assert!(!threshold_reached(&status, 1));
    }

    #[test]
    fn threshold_rule_uses_t_not_n() {
        let store = SessionStore::new(SessionKind::Signing);
        store.create_with_id("s", 2, 3).unwrap();
        for p in 1..=2u16 {
            store.join_as("s", PartyId(p)).unwrap();
            store
                .submit("s", PartyId(p), 1, vec![Outbound::broadcast(vec![p as u8])])
                .unwrap();
        }
        assert!(threshold_reached(&store.status("s").unwrap(), 1));
        assert!(!threshold_reached(&store.status("s").unwrap(), 2));
    }

    #[test]
    fn submit_from_unjoined_party_is_rejected() {
        let store = SessionStore::new(SessionKind::Keygen);
        let id = store.create(1, 2).unwrap();
        store.join_next(&id).unwrap();

        let err = store
            .submit(&id, PartyId(2), 1, vec![Outbound::broadcast(vec![])])
            .unwrap_err();
        assert_eq!(err.kind(), "UnknownParty");

        let err = store
            .submit(&id, PartyId(1), 2, vec![Outbound::directed(PartyId(9), vec![])])
            .unwrap_err();
        assert_eq!(err.kind(), "UnknownParty");
        assert_eq!(store.status(&id).unwrap().message_count(2), 0);
    }

    #[test]
    fn submit_to_missing_session() {
        let store = SessionStore::new(SessionKind::Signing);
        assert!(matches!(
            store.submit("nope", PartyId(1), 1, vec![]),
            Err(CoordinatorError::SessionNotFound(_))
        ));
    }
}
