use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("ride {0} was already claimed")]
    AlreadyClaimed(Uuid),

    #[error("driver {0} already has an active ride")]
    DriverBusy(Uuid),

    #[error("ride {0} has already been rated")]
    AlreadyRated(Uuid),

    #[error("not eligible: {0}")]
    NotEligible(String),

    #[error("score {0} must be between 1 and 5")]
    InvalidScore(f64),

    #[error("no location reported yet for ride {0}")]
    NoLocationYet(Uuid),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("no drivers available")]
    NoDriverAvailable,

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    fn kind(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::Forbidden(_) => "forbidden",
            AppError::NotFound(_) => "not_found",
            AppError::AlreadyClaimed(_) => "already_claimed",
            AppError::DriverBusy(_) => "driver_busy",
            AppError::AlreadyRated(_) => "already_rated",
            AppError::NotEligible(_) => "not_eligible",
            AppError::InvalidScore(_) => "invalid_score",
            AppError::NoLocationYet(_) => "no_location_yet",
            AppError::Conflict(_) => "conflict",
            AppError::NoDriverAvailable => "no_driver_available",
            AppError::Internal(_) => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::InvalidScore(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) | AppError::NoLocationYet(_) => StatusCode::NOT_FOUND,
            AppError::AlreadyClaimed(_)
            | AppError::DriverBusy(_)
            | AppError::AlreadyRated(_)
            | AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::NotEligible(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::NoDriverAvailable => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = Json(json!({
            "error": self.to_string(),
            "kind": self.kind(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_taxonomy() {
        let id = Uuid::new_v4();
        assert_eq!(AppError::InvalidScore(7.0).status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::AlreadyClaimed(id).status(), StatusCode::CONFLICT);
        assert_eq!(AppError::NoLocationYet(id).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            AppError::NoDriverAvailable.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
