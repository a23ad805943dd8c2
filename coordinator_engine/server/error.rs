//! Coordinator errors as HTTP responses.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use coordinator_engine::wire::ErrorBody;
use coordinator_engine::CoordinatorError;
use tracing::warn;

pub struct ApiError(pub CoordinatorError);

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            CoordinatorError::SessionNotFound(_) | CoordinatorError::NotYetStaged(_) => {
                StatusCode::NOT_FOUND
            }
            CoordinatorError::LockPoisoned => StatusCode::INTERNAL_SERVER_ERROR,
            CoordinatorError::InvalidParameters(_)
            | CoordinatorError::SessionExists(_)
            | CoordinatorError::SessionFull(_)
            | CoordinatorError::UnknownParty { .. }
            | CoordinatorError::RoundIncomplete { .. }
            | CoordinatorError::DecodeError(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<CoordinatorError> for ApiError {
    fn from(err: CoordinatorError) -> Self {
        ApiError(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError(CoordinatorError::DecodeError(rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError(CoordinatorError::DecodeError(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(error = %self.0, "request failed");
        }
        (status, Json(ErrorBody::from(&self.0))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_error_kind() {
        let cases = [
            (CoordinatorError::InvalidParameters("t=0".into()), 400),
            (CoordinatorError::SessionFull("s".into()), 400),
            (
                CoordinatorError::RoundIncomplete {
                    round: 1,
                    received: 0,
                    expected: 2,
                },
                400,
            ),
            (CoordinatorError::SessionNotFound("s".into()), 404),
            (CoordinatorError::NotYetStaged("s".into()), 404),
            (CoordinatorError::LockPoisoned, 500),
        ];
        for (err, code) in cases {
            assert_eq!(ApiError(err).status().as_u16(), code);
        }
    }
}
