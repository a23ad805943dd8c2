use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use coordinator_engine::wire::{InitiateKeygenRequest, InitiateKeygenResponse, JoinResponse, StatusResponse};
use coordinator_engine::SessionKind;
use tracing::info;

use crate::error::ApiResult;
use crate::AppState;

/// `POST /keygen/initiate`
pub async fn initiate(
    State(state): State<AppState>,
    body: Result<Json<InitiateKeygenRequest>, JsonRejection>,
) -> ApiResult<Json<InitiateKeygenResponse>> {
    let Json(req) = body?;
    let session_id = state.coordinator.initiate_keygen(req.t, req.n)?;
    info!(%session_id, t = req.t, n = req.n, "keygen session created");
    Ok(Json(InitiateKeygenResponse { session_id }))
}

/// `POST /keygen/{id}/join`; the body is ignored, IDs are handed out in order.
pub async fn join(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<JoinResponse>> {
    let outcome = state.coordinator.join_keygen(&session_id)?;
    info!(%session_id, party_id = %outcome.party_id, "party joined keygen");
    Ok(Json(JoinResponse::from(&outcome)))
}

pub async fn status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<StatusResponse>> {
    let status = state.coordinator.status(SessionKind::Keygen, &session_id)?;
    Ok(Json(status.into()))
}
