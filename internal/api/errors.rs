use crate::api::RequestId;
use crate::storage::errors::EngineError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorDetail {
    code: &'static str,
    message: String,
    request_id: String,
}

/// Engine errors rendered as the JSON envelope
/// `{"error":{"code","message","requestId"}}`.
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    request_id: String,
}

impl ApiError {
    pub fn new(err: EngineError, request_id: &RequestId) -> Self {
        if err.status().is_server_error() {
            tracing::error!(request_id = %request_id.0, error = %err, "request failed");
        }
        Self {
            status: err.status(),
            code: err.code(),
            message: err.to_string(),
            request_id: request_id.0.clone(),
        }
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
                request_id: self.request_id,
            },
        };
        (self.status, Json(body)).into_response()
    }
}
