use axum::extract::State;
use axum::Json;
use coordinator_engine::wire::HealthResponse;

use crate::error::ApiResult;
use crate::AppState;

/// Liveness plus live session counts per registry.
pub async fn check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    let health = state.coordinator.health()?;
    Ok(Json(HealthResponse {
        status: "ok".into(),
        keygen_sessions: health.keygen_sessions,
        signing_sessions: health.signing_sessions,
    }))
}
