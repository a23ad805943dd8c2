//! How a round driver reaches the coordinator.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;

use crate::coordinator::Coordinator;
use crate::error::{CoordinatorError, DriverError};
use crate::session::{FinalizeReceipt, JoinOutcome, SessionStatus};
use crate::types::{Outbound, PartyId, Round, SessionKind};
use crate::wire::{self, ErrorBody};

/// The coordinator operations a driver needs, keygen and signing families alike.
#[async_trait]
pub trait CoordinatorApi: Send + Sync {
    async fn initiate_keygen(&self, threshold: u16, total_parties: u16) -> Result<String, DriverError>;

    async fn join_keygen(&self, session_id: &str) -> Result<JoinOutcome, DriverError>;

    async fn initiate_signing(
        &self,
        session_id: &str,
        threshold: u16,
        total_parties: u16,
    ) -> Result<(u16, u16), DriverError>;

    async fn join_signing(&self, session_id: &str, party: PartyId) -> Result<JoinOutcome, DriverError>;

    async fn submit(
        &self,
        kind: SessionKind,
        session_id: &str,
        from: PartyId,
        round: Round,
        outbound: Vec<Outbound>,
    ) -> Result<(), DriverError>;

    async fn retrieve(
        &self,
        kind: SessionKind,
        session_id: &str,
        party: PartyId,
        round: Round,
    ) -> Result<Vec<Vec<u8>>, DriverError>;

    async fn status(&self, kind: SessionKind, session_id: &str) -> Result<SessionStatus, DriverError>;

    async fn stage_transaction(&self, session_id: &str, payload: &[u8]) -> Result<(), DriverError>;

    async fn fetch_transaction(&self, session_id: &str) -> Result<Vec<u8>, DriverError>;

    async fn finalize(&self, session_id: &str, signature: &[u8]) -> Result<FinalizeReceipt, DriverError>;
}

/// In-process coordinator, shared with whatever else holds the `Arc`.
#[derive(Clone)]
pub struct LocalCoordinator {
    inner: Arc<Coordinator>,
}

impl LocalCoordinator {
    pub fn new(inner: Arc<Coordinator>) -> Self {
        LocalCoordinator { inner }
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.inner
    }
}

#[async_trait]
impl CoordinatorApi for LocalCoordinator {
    async fn initiate_keygen(&self, threshold: u16, total_parties: u16) -> Result<String, DriverError> {
        Ok(self
            .inner
            .initiate_keygen(threshold.into(), total_parties.into())?)
    }

    async fn join_keygen(&self, session_id: &str) -> Result<JoinOutcome, DriverError> {
        Ok(self.inner.join_keygen(session_id)?)
    }

    async fn initiate_signing(
        &self,
        session_id: &str,
        threshold: u16,
        total_parties: u16,
    ) -> Result<(u16, u16), DriverError> {
        Ok(self
            .inner
            .initiate_signing(session_id, threshold.into(), total_parties.into())?)
    }

    async fn join_signing(&self, session_id: &str, party: PartyId) -> Result<JoinOutcome, DriverError> {
        Ok(self.inner.join_signing(session_id, party)?)
    }

    async fn submit(
        &self,
        kind: SessionKind,
        session_id: &str,
        from: PartyId,
        round: Round,
        outbound: Vec<Outbound>,
    ) -> Result<(), DriverError> {
        self.inner.submit(kind, session_id, from, round, outbound)?;
        Ok(())
    }

    async fn retrieve(
        &self,
        kind: SessionKind,
        session_id: &str,
        party: PartyId,
        round: Round,
    ) -> Result<Vec<Vec<u8>>, DriverError> {
        Ok(self.inner.retrieve(kind, session_id, party, round)?)
    }

    async fn status(&self, kind: SessionKind, session_id: &str) -> Result<SessionStatus, DriverError> {
        Ok(self.inner.status(kind, session_id)?)
    }

    async fn stage_transaction(&self, session_id: &str, payload: &[u8]) -> Result<(), DriverError> {
        Ok(self.inner.stage_transaction(session_id, payload.to_vec())?)
    }

    async fn fetch_transaction(&self, session_id: &str) -> Result<Vec<u8>, DriverError> {
        Ok(self.inner.fetch_transaction(session_id)?)
    }

    async fn finalize(&self, session_id: &str, signature: &[u8]) -> Result<FinalizeReceipt, DriverError> {
        Ok(self.inner.finalize(session_id, signature.to_vec())?)
    }
}

/// Remote coordinator over the HTTP/JSON interface.
#[derive(Clone)]
pub struct HttpCoordinator {
    client: Client,
    base: Url,
}

impl HttpCoordinator {
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(base_url: &str) -> Result<Self, DriverError> {
        let client = Client::builder()
            .timeout(Self::REQUEST_TIMEOUT)
            .build()
            .map_err(|e| DriverError::Transport(format!("cannot build HTTP client: {e}")))?;
        Self::with_client(client, base_url)
    }

    pub fn with_client(client: Client, base_url: &str) -> Result<Self, DriverError> {
        let base = Url::parse(base_url)
            .map_err(|e| DriverError::Decode(format!("invalid coordinator URL {base_url}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(DriverError::Decode(format!(
                "coordinator URL {base_url} cannot carry a path"
            )));
        }
        Ok(HttpCoordinator { client, base })
    }

    /// Caller-chosen session IDs are percent-encoded as a single path segment.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn family(kind: SessionKind) -> &'static str {
        match kind {
            SessionKind::Keygen => "keygen",
            SessionKind::Signing => "sign",
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, DriverError> {
        let response = request.send().await.map_err(|e| {
            if e.is_connect() {
                DriverError::Unreachable(e.to_string())
            } else {
                DriverError::Transport(e.to_string())
            }
        })?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| DriverError::Transport(e.to_string()))?;

        if status.is_success() {
            return serde_json::from_slice(&body)
                .map_err(|e| DriverError::Decode(format!("unexpected response body: {e}")));
        }
        Err(Self::error_from(status, &body))
    }

    /// Typed error from the `{error, message}` body; anything else falls back on the status code.
    fn error_from(status: StatusCode, body: &[u8]) -> DriverError {
        if let Some(err) = serde_json::from_slice::<ErrorBody>(body)
            .ok()
            .and_then(|b| b.to_coordinator_error())
        {
            return DriverError::Coordinator(err);
        }
        let text = String::from_utf8_lossy(body).trim().to_string();
        if status.is_server_error() {
            DriverError::Transport(format!("HTTP {status}: {text}"))
        } else if status == StatusCode::NOT_FOUND {
            DriverError::Coordinator(CoordinatorError::SessionNotFound(text))
        } else {
            DriverError::Decode(format!("HTTP {status}: {text}"))
        }
    }
}

#[async_trait]
impl CoordinatorApi for HttpCoordinator {
    async fn initiate_keygen(&self, threshold: u16, total_parties: u16) -> Result<String, DriverError> {
        let body = wire::InitiateKeygenRequest {
            t: threshold.into(),
            n: total_parties.into(),
        };
        let resp: wire::InitiateKeygenResponse = self
            .send(self.client.post(self.endpoint(&["keygen", "initiate"])).json(&body))
            .await?;
        Ok(resp.session_id)
    }

    async fn join_keygen(&self, session_id: &str) -> Result<JoinOutcome, DriverError> {
        let resp: wire::JoinResponse = self
            .send(
                self.client
                    .post(self.endpoint(&["keygen", session_id, "join"]))
                    .json(&wire::JoinKeygenRequest {}),
            )
            .await?;
        Ok(resp.into())
    }

    async fn initiate_signing(
        &self,
        session_id: &str,
        threshold: u16,
        total_parties: u16,
    ) -> Result<(u16, u16), DriverError> {
        let body = wire::InitiateSigningRequest {
            session_id: session_id.to_string(),
            t: threshold.into(),
            n: total_parties.into(),
        };
        let resp: wire::InitiateSigningResponse = self
            .send(self.client.post(self.endpoint(&["sign", "initiate"])).json(&body))
            .await?;
        Ok((resp.t, resp.n))
    }

    async fn join_signing(&self, session_id: &str, party: PartyId) -> Result<JoinOutcome, DriverError> {
        let resp: wire::JoinResponse = self
            .send(
                self.client
                    .post(self.endpoint(&["sign", session_id, "join"]))
                    .json(&wire::JoinSigningRequest { party_id: party }),
            )
            .await?;
        Ok(resp.into())
    }

    async fn submit(
        &self,
        kind: SessionKind,
        session_id: &str,
        from: PartyId,
        round: Round,
        outbound: Vec<Outbound>,
    ) -> Result<(), DriverError> {
        let body = wire::SubmitRequest::new(from, round, &outbound);
        let url = self.endpoint(&[Self::family(kind), session_id, "messages"]);
        let _: wire::Ack = self.send(self.client.post(url).json(&body)).await?;
        Ok(())
    }

    async fn retrieve(
        &self,
        kind: SessionKind,
        session_id: &str,
        party: PartyId,
        round: Round,
    ) -> Result<Vec<Vec<u8>>, DriverError> {
        let url = self.endpoint(&[Self::family(kind), session_id, "messages"]);
        let query = wire::MessagesQuery {
            party_id: party,
            round,
        };
        let resp: wire::MessagesResponse = self.send(self.client.get(url).query(&query)).await?;
        resp.decode_all().map_err(|e| DriverError::Decode(e.to_string()))
    }

    async fn status(&self, kind: SessionKind, session_id: &str) -> Result<SessionStatus, DriverError> {
        let url = self.endpoint(&[Self::family(kind), session_id, "status"]);
        let resp: wire::StatusResponse = self.send(self.client.get(url)).await?;
        Ok(resp.into_status(session_id, kind))
    }

    async fn stage_transaction(&self, session_id: &str, payload: &[u8]) -> Result<(), DriverError> {
        let body = wire::StageRequest {
            transaction: wire::encode(payload),
        };
        let _: wire::Ack = self
            .send(
                self.client
                    .post(self.endpoint(&["sign", session_id, "broadcast"]))
                    .json(&body),
            )
            .await?;
        Ok(())
    }

    async fn fetch_transaction(&self, session_id: &str) -> Result<Vec<u8>, DriverError> {
        let resp: wire::TransactionResponse = self
            .send(self.client.get(self.endpoint(&["sign", session_id, "transaction"])))
            .await?;
        wire::decode(&resp.message).map_err(|e| DriverError::Decode(e.to_string()))
    }

    async fn finalize(&self, session_id: &str, signature: &[u8]) -> Result<FinalizeReceipt, DriverError> {
        let body = wire::FinalizeRequest {
            signature: wire::encode(signature),
        };
        let resp: wire::FinalizeResponse = self
            .send(
                self.client
                    .post(self.endpoint(&["sign", session_id, "finalize"]))
                    .json(&body),
            )
            .await?;
        Ok(resp.into_receipt(session_id, signature.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_error_body_maps_back_to_coordinator_error() {
        let body = serde_json::to_vec(&ErrorBody::from(&CoordinatorError::RoundIncomplete {
            round: 1,
            received: 1,
            expected: 3,
        }))
        .unwrap();
        let err = HttpCoordinator::error_from(StatusCode::BAD_REQUEST, &body);
        assert!(err.is_retryable());
    }

    #[test]
    fn untyped_errors_fall_back_on_status() {
        assert!(matches!(
            HttpCoordinator::error_from(StatusCode::BAD_GATEWAY, b"upstream down"),
            DriverError::Transport(_)
        ));
        assert!(matches!(
            HttpCoordinator::error_from(StatusCode::NOT_FOUND, b"Session not found"),
            DriverError::Coordinator(CoordinatorError::SessionNotFound(_))
        ));
        assert!(matches!(
            HttpCoordinator::error_from(StatusCode::BAD_REQUEST, b"Invalid request body"),
            DriverError::Decode(_)
        ));
    }

    #[test]
    fn base_url_trailing_slash_is_dropped() {
        let api = HttpCoordinator::with_client(Client::new(), "http://localhost:8080/").unwrap();
        assert_eq!(
            api.endpoint(&["keygen", "initiate"]).as_str(),
            "http://localhost:8080/keygen/initiate"
        );
    }

    #[test]
    fn session_id_is_one_encoded_path_segment() {
        let api = HttpCoordinator::with_client(Client::new(), "http://localhost:8080").unwrap();
        assert_eq!(
            api.endpoint(&["sign", "tx/1?a#b", "join"]).as_str(),
            "http://localhost:8080/sign/tx%2F1%3Fa%23b/join"
        );
    }

    #[test]
    fn malformed_base_url_is_rejected() {
        assert!(matches!(
            HttpCoordinator::new("localhost 8080"),
            Err(DriverError::Decode(_))
        ));
        assert!(matches!(
            HttpCoordinator::new("mailto:ops@example.com"),
            Err(DriverError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn local_coordinator_reports_typed_errors() {
        let api = LocalCoordinator::new(Arc::new(Coordinator::default()));
        let err = api.join_keygen("missing").await.unwrap_err();
        assert!(matches!(
            err,
            DriverError::Coordinator(CoordinatorError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn refused_connection_is_unreachable() {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let api = HttpCoordinator::new(&format!("http://127.0.0.1:{port}")).unwrap();
        let err = api.status(SessionKind::Keygen, "any").await.unwrap_err();
        assert!(matches!(err, DriverError::Unreachable(_)));
    }
}
