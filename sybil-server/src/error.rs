use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// A failed request. Caller mistakes become 400s, everything else a 500;
/// both carry the failure message as `detail`.
#[derive(Debug)]
pub struct ApiError(pub sybil_core::Error);

impl From<sybil_core::Error> for ApiError {
    fn from(err: sybil_core::Error) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        if self.0.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = self.0.to_string();
        if status.is_server_error() {
            tracing::error!(error = %detail, "request failed");
        } else {
            tracing::debug!(error = %detail, "rejected request");
        }
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}
