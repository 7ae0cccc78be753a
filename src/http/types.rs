use crate::error::RelayError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

#[derive(Debug)]
pub struct HttpError {
    pub status: StatusCode,
    pub message: String,
}
impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                success: false,
                error: self.message,
            }),
        )
            .into_response()
    }
}

/// Webhook senders only need the status class, so internal failures are
/// reported without detail.
impl From<RelayError> for HttpError {
    fn from(e: RelayError) -> Self {
        let status = e.status();
        let message = if e.is_signature_error() {
            e.to_string()
        } else {
            "Internal server error".to_string()
        };
        HttpError { status, message }
    }
}

pub type HttpResult<T> = Result<T, HttpError>;
