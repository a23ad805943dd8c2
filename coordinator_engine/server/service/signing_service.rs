use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use coordinator_engine::wire::{
    self, Ack, FinalizeRequest, FinalizeResponse, InitiateSigningRequest, InitiateSigningResponse,
    JoinResponse, JoinSigningRequest, StageRequest, StatusResponse, TransactionResponse,
};
use coordinator_engine::SessionKind;
use tracing::info;

use crate::error::ApiResult;
use crate::AppState;

/// `POST /sign/initiate`; the caller picks the session ID.
pub async fn initiate(
    State(state): State<AppState>,
    body: Result<Json<InitiateSigningRequest>, JsonRejection>,
) -> ApiResult<Json<InitiateSigningResponse>> {
    let Json(req) = body?;
    let (t, n) = state.coordinator.initiate_signing(&req.session_id, req.t, req.n)?;
    info!(session_id = %req.session_id, t, n, "signing session created");
    Ok(Json(InitiateSigningResponse { t, n }))
}

pub async fn join(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    body: Result<Json<JoinSigningRequest>, JsonRejection>,
) -> ApiResult<Json<JoinResponse>> {
    let Json(req) = body?;
    let outcome = state.coordinator.join_signing(&session_id, req.party_id)?;
    info!(%session_id, party_id = %outcome.party_id, "party joined signing");
    Ok(Json(JoinResponse::from(&outcome)))
}

/// `POST /sign/{id}/broadcast` stages the payload to sign.
pub async fn stage(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    body: Result<Json<StageRequest>, JsonRejection>,
) -> ApiResult<Json<Ack>> {
    let Json(req) = body?;
    let payload = wire::decode(&req.transaction)?;
    state.coordinator.stage_transaction(&session_id, payload)?;
    Ok(Json(Ack::new("Transaction broadcast successfully")))
}

pub async fn transaction(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<TransactionResponse>> {
    let payload = state.coordinator.fetch_transaction(&session_id)?;
    Ok(Json(TransactionResponse {
        message: wire::encode(&payload),
    }))
}

pub async fn status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<StatusResponse>> {
    let status = state.coordinator.status(SessionKind::Signing, &session_id)?;
    Ok(Json(status.into()))
}

/// Records the signature and deletes the session.
pub async fn finalize(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    body: Result<Json<FinalizeRequest>, JsonRejection>,
) -> ApiResult<Json<FinalizeResponse>> {
    let Json(req) = body?;
    let signature = wire::decode(&req.signature)?;
    let receipt = state.coordinator.finalize(&session_id, signature)?;
    Ok(Json(FinalizeResponse::from(&receipt)))
}
