//! Message submit/retrieve handlers, shared by the keygen and signing families.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::Json;
use coordinator_engine::wire::{Ack, MessagesQuery, MessagesResponse, SubmitRequest};
use coordinator_engine::SessionKind;

use crate::error::ApiResult;
use crate::AppState;

fn submit(state: &AppState, kind: SessionKind, session_id: &str, req: SubmitRequest) -> ApiResult<Json<Ack>> {
    let from = req.party_id;
    let round = req.round;
    let outbound = req.into_outbound()?;
    state.coordinator.submit(kind, session_id, from, round, outbound)?;
    Ok(Json(Ack::new("Messages submitted successfully")))
}

fn retrieve(state: &AppState, kind: SessionKind, session_id: &str, query: MessagesQuery) -> ApiResult<Json<MessagesResponse>> {
    let contents = state
        .coordinator
        .retrieve(kind, session_id, query.party_id, query.round)?;
    Ok(Json(MessagesResponse::from_contents(&contents)))
}

pub async fn submit_keygen(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    body: Result<Json<SubmitRequest>, JsonRejection>,
) -> ApiResult<Json<Ack>> {
    let Json(req) = body?;
    submit(&state, SessionKind::Keygen, &session_id, req)
}

pub async fn retrieve_keygen(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    query: Result<Query<MessagesQuery>, QueryRejection>,
) -> ApiResult<Json<MessagesResponse>> {
    let Query(query) = query?;
    retrieve(&state, SessionKind::Keygen, &session_id, query)
}

pub async fn submit_signing(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    body: Result<Json<SubmitRequest>, JsonRejection>,
) -> ApiResult<Json<Ack>> {
    let Json(req) = body?;
    submit(&state, SessionKind::Signing, &session_id, req)
}

pub async fn retrieve_signing(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    query: Result<Query<MessagesQuery>, QueryRejection>,
) -> ApiResult<Json<MessagesResponse>> {
    let Query(query) = query?;
    retrieve(&state, SessionKind::Signing, &session_id, query)
}
