use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use trawler_core::error::AppError;

use crate::dto::ErrorResponse;

/// Handler error: a domain failure or a body the JSON extractor refused.
pub enum ApiError {
    App(AppError),
    Rejected { status: StatusCode, message: String },
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self::App(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::rejected(rejection.status(), rejection.body_text())
    }
}

impl ApiError {
    /// Keeps the extractor's status except that unreadable JSON is always a 400.
    fn rejected(status: StatusCode, message: String) -> Self {
        let status = if status == StatusCode::UNPROCESSABLE_ENTITY {
            StatusCode::BAD_REQUEST
        } else {
            status
        };
        Self::Rejected { status, message }
    }

    fn status(&self) -> (StatusCode, &'static str) {
        match self {
            Self::App(err) => match err {
                AppError::ValidationError(_) => (StatusCode::BAD_REQUEST, "validation_error"),
                AppError::SerializationError(_) => {
                    (StatusCode::BAD_REQUEST, "serialization_error")
                }
                AppError::QueueError(_) => (StatusCode::SERVICE_UNAVAILABLE, "queue_error"),
                AppError::DatabaseError(_) => (StatusCode::SERVICE_UNAVAILABLE, "database_error"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            },
            Self::Rejected { status, .. } => match *status {
                StatusCode::PAYLOAD_TOO_LARGE => (*status, "payload_too_large"),
                StatusCode::UNSUPPORTED_MEDIA_TYPE => (*status, "unsupported_media_type"),
                StatusCode::BAD_REQUEST => (*status, "validation_error"),
                _ => (*status, "bad_request"),
            },
        }
    }

    fn message(self) -> String {
        match self {
            Self::App(err) => err.to_string(),
            Self::Rejected { message, .. } => message,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.status();
        let message = self.message();
        if status.is_server_error() {
            tracing::error!(error = %message, "Request failed");
        }

        let body = ErrorResponse {
            error: error_type.to_string(),
            message,
        };
        (status, axum::Json(body)).into_response()
    }
}
