use std::sync::Arc;

use coordinator_engine::driver::{RoundDriver, ThresholdSigner};
use coordinator_engine::{
    Coordinator, CoordinatorApi, CoordinatorError, DriverError, FrostKeygen, FrostSigner, KeyShare,
    LocalCoordinator, PartyId, PollPolicy, SessionKind, SignedPayload, SigningRequest,
};

fn local() -> LocalCoordinator {
    LocalCoordinator::new(Arc::new(Coordinator::default()))
}

async fn run_keygen(api: &LocalCoordinator, t: u16, n: u16) -> (String, Vec<KeyShare>) {
    let session_id = api.initiate_keygen(t, n).await.unwrap();
    let handles: Vec<_> = (0..n)
        .map(|_| {
            let driver = RoundDriver::new(api.clone(), PollPolicy::fast());
            let session_id = session_id.clone();
            tokio::spawn(async move {
                driver
                    .run_keygen(&session_id, FrostKeygen::new)
                    .await
            })
        })
        .collect();

    let mut shares = Vec::new();
    for handle in handles {
        shares.push(handle.await.unwrap().unwrap());
    }
    shares.sort_by_key(|s| s.party_id);
    (session_id, shares)
}

async fn run_signing(
    api: &LocalCoordinator,
    session_id: &str,
    signers: Vec<(KeyShare, Option<Vec<u8>>)>,
) -> Vec<Result<SignedPayload, DriverError>> {
    let n = signers.len() as u16;
    let handles: Vec<_> = signers
        .into_iter()
        .enumerate()
        .map(|(slot, (share, payload))| {
            let driver = RoundDriver::new(api.clone(), PollPolicy::fast());
            let request = SigningRequest {
                session_id: session_id.to_string(),
                party_id: PartyId(slot as u16 + 1),
                threshold: n,
                total_parties: n,
                payload,
            };
            tokio::spawn(async move { driver.run_signing(&request, FrostSigner::new(share)).await })
        })
        .collect();

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }
    results
}

#[tokio::test]
async fn keygen_two_of_three_agrees_on_group_key() {
    let api = local();
    let (session_id, shares) = run_keygen(&api, 2, 3).await;

    assert_eq!(shares.len(), 3);
    let ids: Vec<u16> = shares.iter().map(|s| s.party_id.0).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert!(shares.iter().all(|s| s.group_key == shares[0].group_key));

    let status = api.status(SessionKind::Keygen, &session_id).await.unwrap();
    assert_eq!(status.message_count(1), 3);
    assert_eq!(status.message_count(2), 6);
    assert_eq!(status.joined_parties.len(), 3);
}

#[tokio::test]
async fn signing_two_of_two_then_finalize_removes_session() {
    let api = local();
    let (_, shares) = run_keygen(&api, 2, 2).await;
    let payload = b"0123456789".to_vec();

    let results = run_signing(
        &api,
        "sign-b",
        vec![
            (shares[0].clone(), Some(payload.clone())),
            (shares[1].clone(), None),
        ],
    )
    .await;
    let signed: Vec<SignedPayload> = results.into_iter().map(|r| r.unwrap()).collect();

    assert_eq!(signed[0].payload, payload);
    assert_eq!(signed[1].payload, payload);
    assert_eq!(signed[0].signature, signed[1].signature);

    let driver = RoundDriver::new(api.clone(), PollPolicy::fast());
    let receipt = driver.finalize(&signed[0]).await.unwrap();
    assert_eq!(receipt.transaction_length, 10);
    assert_eq!(receipt.signature_length, 64);

    let err = api.status(SessionKind::Signing, "sign-b").await.unwrap_err();
    assert!(matches!(
        err,
        DriverError::Coordinator(CoordinatorError::SessionNotFound(_))
    ));
    let again = driver.finalize(&signed[0]).await.unwrap_err();
    assert!(matches!(
        again,
        DriverError::Coordinator(CoordinatorError::SessionNotFound(_))
    ));
}

#[tokio::test]
async fn threshold_subset_signs_with_slots_independent_of_share_ids() {
    let api = local();
    let (_, shares) = run_keygen(&api, 2, 3).await;
    let payload = b"subset".to_vec();

    // Shares 1 and 3 occupy signing slots 1 and 2.
    let results = run_signing(
        &api,
        "subset",
        vec![(shares[2].clone(), None), (shares[0].clone(), Some(payload.clone()))],
    )
    .await;
    let signed: Vec<SignedPayload> = results.into_iter().map(|r| r.unwrap()).collect();
    assert_eq!(signed[0].signature, signed[1].signature);

    let verifier = FrostSigner::new(shares[1].clone());
    assert!(verifier.verify(&payload, &signed[0].signature));
}

#[tokio::test]
async fn second_signing_session_with_same_id_is_rejected() {
    let api = local();
    api.initiate_signing("dup", 2, 2).await.unwrap();
    let err = api.initiate_signing("dup", 2, 2).await.unwrap_err();
    assert!(matches!(
        err,
        DriverError::Coordinator(CoordinatorError::SessionExists(_))
    ));
}
