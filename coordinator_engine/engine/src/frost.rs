//! FROST (Ed25519) round functions for the keygen and signing drivers.
//!
//! Every message is a JSON envelope `{from, body}`. The relay strips sender identity on
//! retrieval, so the sender's FROST identifier travels inside the content.

use std::collections::BTreeMap;
use std::fmt;

use frost_ed25519 as frost;
use frost_ed25519::keys::dkg;
use frost_ed25519::keys::{KeyPackage, PublicKeyPackage};
use frost_ed25519::{Identifier, SigningPackage};
use rand::rngs::OsRng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::Zeroizing;

use crate::driver::{Advance, KeygenAssignment, RoundFunction, ThresholdSigner};
use crate::error::RoundError;
use crate::types::PartyId;

/// One party's output of a completed DKG.
#[derive(Clone, Serialize, Deserialize)]
pub struct KeyShare {
    pub party_id: PartyId,
    pub threshold: u16,
    pub parties: Vec<PartyId>,
    pub key_package: KeyPackage,
    pub public_key_package: PublicKeyPackage,
    /// Hex-encoded group verifying key.
    pub group_key: String,
}

impl fmt::Debug for KeyShare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyShare")
            .field("party_id", &self.party_id)
            .field("threshold", &self.threshold)
            .field("parties", &self.parties)
            .field("group_key", &self.group_key)
            .finish_non_exhaustive()
    }
}

impl KeyShare {
    /// Serialized share; the buffer is wiped when dropped.
    pub fn to_json(&self) -> Result<Zeroizing<String>, RoundError> {
        serde_json::to_string_pretty(self)
            .map(Zeroizing::new)
            .map_err(|e| RoundError::State(format!("cannot serialize key share: {e}")))
    }

    pub fn from_json(text: &str) -> Result<Self, RoundError> {
        serde_json::from_str(text)
            .map_err(|e| RoundError::MessageMalformed(format!("invalid key share: {e}")))
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    from: PartyId,
    body: T,
}

fn seal<T: Serialize>(from: PartyId, body: &T) -> Result<Vec<u8>, RoundError> {
    serde_json::to_vec(&Envelope { from, body })
        .map_err(|e| RoundError::State(format!("cannot encode message: {e}")))
}

fn open<T: DeserializeOwned>(bytes: &[u8]) -> Result<Envelope<T>, RoundError> {
    serde_json::from_slice(bytes).map_err(|e| RoundError::MessageMalformed(e.to_string()))
}

fn identifier(party: PartyId) -> Result<Identifier, RoundError> {
    Identifier::try_from(party.0)
        .map_err(|e| RoundError::MessageMalformed(format!("party {party}: {e}")))
}

fn crypto(e: frost::Error) -> RoundError {
    RoundError::CryptoFailure(e.to_string())
}

/// Index inbound envelopes by sender, skipping our own broadcasts and rejecting duplicates.
fn collect_from_others<T: DeserializeOwned>(
    me: PartyId,
    inbound: &[Vec<u8>],
) -> Result<BTreeMap<Identifier, T>, RoundError> {
    let mut packages = BTreeMap::new();
    for bytes in inbound {
        let envelope: Envelope<T> = open(bytes)?;
        if envelope.from == me {
            continue;
        }
        if packages.insert(identifier(envelope.from)?, envelope.body).is_some() {
            return Err(RoundError::MessageMalformed(format!(
                "duplicate message from party {}",
                envelope.from
            )));
        }
    }
    Ok(packages)
}

fn expect_count<T>(packages: &BTreeMap<Identifier, T>, expected: usize, what: &str) -> Result<(), RoundError> {
    if packages.len() != expected {
        return Err(RoundError::MessageMalformed(format!(
            "expected {expected} {what}, got {}",
            packages.len()
        )));
    }
    Ok(())
}

enum KeygenStage {
    Start,
    Committed(dkg::round1::SecretPackage),
    Shared {
        secret: dkg::round2::SecretPackage,
        round1: BTreeMap<Identifier, dkg::round1::Package>,
    },
    Done,
}

/// Three-call FROST DKG: commit (broadcast), share (directed, `partyIDs` order), finish.
pub struct FrostKeygen {
    party_id: PartyId,
    threshold: u16,
    party_ids: Vec<PartyId>,
    stage: KeygenStage,
}

impl FrostKeygen {
    pub fn new(assignment: &KeygenAssignment) -> Result<Self, RoundError> {
        if !assignment.party_ids.contains(&assignment.party_id) {
            return Err(RoundError::State(format!(
                "party {} is not in the session",
                assignment.party_id
            )));
        }
        Ok(FrostKeygen {
            party_id: assignment.party_id,
            threshold: assignment.threshold,
            party_ids: assignment.party_ids.clone(),
            stage: KeygenStage::Start,
        })
    }

    fn others(&self) -> impl Iterator<Item = PartyId> + '_ {
        self.party_ids.iter().copied().filter(move |p| *p != self.party_id)
    }
}

impl RoundFunction for FrostKeygen {
    type Output = KeyShare;

    fn advance(&mut self, inbound: Vec<Vec<u8>>) -> Result<Advance<KeyShare>, RoundError> {
        match std::mem::replace(&mut self.stage, KeygenStage::Done) {
            KeygenStage::Start => {
                let max = self.party_ids.len() as u16;
                let (secret, package) =
                    dkg::part1(identifier(self.party_id)?, max, self.threshold, OsRng).map_err(crypto)?;
                debug!(party_id = %self.party_id, "dkg round 1 commitment ready");
                let outbound = vec![seal(self.party_id, &package)?];
                self.stage = KeygenStage::Committed(secret);
                Ok(Advance::send(outbound))
            }
            KeygenStage::Committed(secret) => {
                let round1: BTreeMap<Identifier, dkg::round1::Package> =
                    collect_from_others(self.party_id, &inbound)?;
                expect_count(&round1, self.party_ids.len() - 1, "round 1 packages")?;
                let (secret, mut shares) = dkg::part2(secret, &round1).map_err(crypto)?;

                let mut outbound = Vec::with_capacity(shares.len());
                for peer in self.others() {
                    let share = shares.remove(&identifier(peer)?).ok_or_else(|| {
                        RoundError::State(format!("no round 2 package for party {peer}"))
                    })?;
                    outbound.push(seal(self.party_id, &share)?);
                }
                self.stage = KeygenStage::Shared { secret, round1 };
                Ok(Advance::send(outbound))
            }
            KeygenStage::Shared { secret, round1 } => {
                let round2: BTreeMap<Identifier, dkg::round2::Package> =
                    collect_from_others(self.party_id, &inbound)?;
                expect_count(&round2, self.party_ids.len() - 1, "round 2 packages")?;
                let (key_package, public_key_package) =
                    dkg::part3(&secret, &round1, &round2).map_err(crypto)?;
                let group_key = hex::encode(
                    public_key_package
                        .verifying_key()
                        .serialize()
                        .map_err(crypto)?,
                );
                Ok(Advance::finish(KeyShare {
                    party_id: self.party_id,
                    threshold: self.threshold,
                    parties: self.party_ids.clone(),
                    key_package,
                    public_key_package,
                    group_key,
                }))
            }
            KeygenStage::Done => Err(RoundError::State("keygen already finished".into())),
        }
    }
}

enum SignStage {
    Start,
    Committed(frost::round1::SigningNonces),
    Signed(SigningPackage),
    Done,
}

/// Three-call FROST signing: commitments, signature shares, aggregation.
///
/// Every party aggregates for itself, so all signers end with the same signature.
pub struct FrostSigner {
    share: KeyShare,
    message: Option<Vec<u8>>,
    stage: SignStage,
}

impl FrostSigner {
    pub fn new(share: KeyShare) -> Self {
        FrostSigner {
            share,
            message: None,
            stage: SignStage::Start,
        }
    }

    pub fn share(&self) -> &KeyShare {
        &self.share
    }

    /// Every envelope, own included; FROST needs the full signer set.
    fn collect_all<T: DeserializeOwned>(inbound: &[Vec<u8>]) -> Result<BTreeMap<Identifier, T>, RoundError> {
        let mut packages = BTreeMap::new();
        for bytes in inbound {
            let envelope: Envelope<T> = open(bytes)?;
            if packages.insert(identifier(envelope.from)?, envelope.body).is_some() {
                return Err(RoundError::MessageMalformed(format!(
                    "duplicate message from party {}",
                    envelope.from
                )));
            }
        }
        Ok(packages)
    }
}

impl RoundFunction for FrostSigner {
    type Output = Vec<u8>;

    fn advance(&mut self, inbound: Vec<Vec<u8>>) -> Result<Advance<Vec<u8>>, RoundError> {
        let me = self.share.party_id;
        match std::mem::replace(&mut self.stage, SignStage::Done) {
            SignStage::Start => {
                if self.message.is_none() {
                    self.stage = SignStage::Start;
                    return Err(RoundError::State("no message loaded".into()));
                }
                let mut rng = OsRng;
                let (nonces, commitments) =
                    frost::round1::commit(self.share.key_package.signing_share(), &mut rng);
                let outbound = vec![seal(me, &commitments)?];
                self.stage = SignStage::Committed(nonces);
                Ok(Advance::send(outbound))
            }
            SignStage::Committed(nonces) => {
                let commitments: BTreeMap<Identifier, frost::round1::SigningCommitments> =
                    Self::collect_all(&inbound)?;
                if !commitments.contains_key(&identifier(me)?) {
                    return Err(RoundError::MessageMalformed(
                        "own commitment missing from round 1".into(),
                    ));
                }
                let message = self.message.as_deref().unwrap_or_default();
                let package = SigningPackage::new(commitments, message);
                let signature_share =
                    frost::round2::sign(&package, &nonces, &self.share.key_package).map_err(crypto)?;
                debug!(party_id = %me, signers = package.signing_commitments().len(), "signature share ready");
                let outbound = vec![seal(me, &signature_share)?];
                self.stage = SignStage::Signed(package);
                Ok(Advance::send(outbound))
            }
            SignStage::Signed(package) => {
                let shares: BTreeMap<Identifier, frost::round2::SignatureShare> =
                    Self::collect_all(&inbound)?;
                let signature = frost::aggregate(&package, &shares, &self.share.public_key_package)
                    .map_err(crypto)?;
                let bytes = signature.serialize().map_err(crypto)?;
                Ok(Advance::finish(bytes))
            }
            SignStage::Done => Err(RoundError::State("signing already finished".into())),
        }
    }
}

impl ThresholdSigner for FrostSigner {
    fn load_message(&mut self, message: &[u8]) -> Result<(), RoundError> {
        if !matches!(self.stage, SignStage::Start) {
            return Err(RoundError::State("message must be loaded before round 1".into()));
        }
        self.message = Some(message.to_vec());
        Ok(())
    }

    fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        match frost::Signature::deserialize(signature) {
            Ok(signature) => self
                .share
                .public_key_package
                .verifying_key()
                .verify(message, &signature)
                .is_ok(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assignment(party: u16, t: u16, n: u16) -> KeygenAssignment {
        KeygenAssignment {
            party_id: PartyId(party),
            threshold: t,
            party_ids: (1..=n).map(PartyId).collect(),
        }
    }

    /// Relay-free DKG: broadcast round 1 to all, route round 2 positionally.
    fn run_dkg(t: u16, n: u16) -> Vec<KeyShare> {
        let mut parties: Vec<FrostKeygen> = (1..=n)
            .map(|p| FrostKeygen::new(&assignment(p, t, n)).unwrap())
            .collect();

        let round1: Vec<Vec<u8>> = parties
            .iter_mut()
            .flat_map(|p| p.advance(vec![]).unwrap().outbound)
            .collect();
        assert_eq!(round1.len(), n as usize);

        let mut inboxes: Vec<Vec<Vec<u8>>> = vec![Vec::new(); n as usize];
        for (idx, party) in parties.iter_mut().enumerate() {
            let out = party.advance(round1.clone()).unwrap().outbound;
            let others: Vec<usize> = (0..n as usize).filter(|i| *i != idx).collect();
            assert_eq!(out.len(), others.len());
            for (to, content) in others.into_iter().zip(out) {
                inboxes[to].push(content);
            }
        }

        parties
            .iter_mut()
            .zip(inboxes)
            .map(|(party, inbox)| party.advance(inbox).unwrap().result.unwrap())
            .collect()
    }

    fn run_signing(shares: &[KeyShare], message: &[u8]) -> Vec<Vec<u8>> {
        let mut signers: Vec<FrostSigner> = shares.iter().cloned().map(FrostSigner::new).collect();
        for s in &mut signers {
            s.load_message(message).unwrap();
        }
        let mut inbound = Vec::new();
        for _ in 0..2 {
            inbound = signers
                .iter_mut()
                .flat_map(|s| s.advance(inbound.clone()).unwrap().outbound)
                .collect();
        }
        signers
            .iter_mut()
            .map(|s| s.advance(inbound.clone()).unwrap().result.unwrap())
            .collect()
    }

    #[test]
    fn dkg_parties_agree_on_group_key() {
        let shares = run_dkg(2, 3);
        assert_eq!(shares.len(), 3);
        assert!(shares.iter().all(|s| s.group_key == shares[0].group_key));
        assert_eq!(shares[1].party_id, PartyId(2));
    }

    #[test]
    fn any_threshold_subset_signs_and_verifies() {
        let shares = run_dkg(2, 3);
        let subset = vec![shares[0].clone(), shares[2].clone()];
        let message = b"ten bytes!";
        let signatures = run_signing(&subset, message);
        assert_eq!(signatures[0], signatures[1]);
        assert_eq!(signatures[0].len(), 64);

        let verifier = FrostSigner::new(shares[1].clone());
        assert!(verifier.verify(message, &signatures[0]));
        assert!(!verifier.verify(b"other bytes", &signatures[0]));
        assert!(!verifier.verify(message, &[0u8; 3]));
    }

    #[test]
    fn key_share_json_round_trip_keeps_group_key() {
        let shares = run_dkg(2, 2);
        let json = shares[0].to_json().unwrap();
        let restored = KeyShare::from_json(&json).unwrap();
        assert_eq!(restored.group_key, shares[0].group_key);
        assert_eq!(restored.parties, vec![PartyId(1), PartyId(2)]);
        assert!(!format!("{restored:?}").contains("key_package"));
    }

    #[test]
    fn malformed_inbound_is_rejected() {
        let mut party = FrostKeygen::new(&assignment(1, 2, 2)).unwrap();
        party.advance(vec![]).unwrap();
        let err = party.advance(vec![b"garbage".to_vec()]).err().unwrap();
        assert!(matches!(err, RoundError::MessageMalformed(_)));
    }

    #[test]
    fn signer_requires_message_before_round_one() {
        let shares = run_dkg(2, 2);
        let mut signer = FrostSigner::new(shares[0].clone());
        assert!(matches!(signer.advance(vec![]), Err(RoundError::State(_))));
        signer.load_message(b"late").unwrap();
        assert_eq!(signer.advance(vec![]).unwrap().outbound.len(), 1);
    }

    #[test]
    fn outside_party_cannot_build_keygen() {
        assert!(FrostKeygen::new(&assignment(4, 2, 3)).is_err());
    }
}
