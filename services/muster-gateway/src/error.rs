//! HTTP error mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use muster_attendance::{AttendanceError, AttendanceRecord};
use muster_authz::AuthzError;
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Errors surfaced by the attendance endpoints
#[derive(Debug, Error)]
pub enum ApiError {
    /// No bearer token, or the token is unknown
    #[error("Unauthorized")]
    Unauthorized,

    /// Identity lacks the required capability
    #[error("Forbidden")]
    Forbidden(#[from] AuthzError),

    /// Transition rejected by the attendance state machine
    #[error("{message}")]
    Rejected {
        message: String,
        record: Option<AttendanceRecord>,
    },

    /// Store failure; details stay in the logs
    #[error("Internal server error")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Rejected { .. } => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<AttendanceError> for ApiError {
    fn from(err: AttendanceError) -> Self {
        if err.is_rejection() {
            ApiError::Rejected {
                message: err.to_string(),
                record: err.record().cloned(),
            }
        } else {
            ApiError::Internal(err.to_string())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            Self::Rejected { message, record } => json!({ "error": message, "record": record }),
            Self::Internal(detail) => {
                error!(error = %detail, "Attendance store failure");
                json!({ "error": self.to_string(), "record": null })
            }
            _ => json!({ "error": self.to_string(), "record": null }),
        };

        (status, Json(body)).into_response()
    }
}
