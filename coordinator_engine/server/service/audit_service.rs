use axum::extract::{Query, State};
use axum::Json;
use coordinator_engine::audit::AuditRecord;
use serde::{Deserialize, Serialize};

use crate::AppState;

const DEFAULT_LIMIT: usize = 50;

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct AuditResponse {
    pub records: Vec<AuditRecord>,
}

/// `GET /audit?limit=` newest first.
pub async fn recent(State(state): State<AppState>, Query(query): Query<AuditQuery>) -> Json<AuditResponse> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    Json(AuditResponse {
        records: state.coordinator.audit().recent(limit),
    })
}
