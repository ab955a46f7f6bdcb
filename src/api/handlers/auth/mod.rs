//! Auth route handlers. Each submodule maps one group of operations onto
//! the orchestrator; everything replies with [`ApiEnvelope`].

pub mod login;
pub mod otp;
pub mod password;
pub mod register;
pub mod token;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use tracing::error;

use crate::auth::error::AuthError;

/// Uniform response envelope for every auth endpoint.
#[derive(Debug, Serialize)]
pub struct ApiEnvelope<T: Serialize> {
    pub success: bool,
    pub message: String,
    pub data: Option<T>,
}

impl<T: Serialize> ApiEnvelope<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }
}

impl ApiEnvelope<serde_json::Value> {
    pub fn ok_empty(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }
}

/// Translate a domain error into the envelope, logging internals at the
/// boundary so handler bodies stay free of error plumbing.
pub fn error_response(err: &AuthError) -> Response {
    if let AuthError::Internal(source) = err {
        error!("internal error: {source:#}");
    }
    (err.status(), Json(ApiEnvelope::fail(err.public_message()))).into_response()
}

pub fn ok_response<T: Serialize>(message: impl Into<String>, data: T) -> Response {
    (StatusCode::OK, Json(ApiEnvelope::ok(message, data))).into_response()
}

pub fn ok_empty_response(message: impl Into<String>) -> Response {
    (StatusCode::OK, Json(ApiEnvelope::ok_empty(message))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_shapes() {
        let ok = ApiEnvelope::ok("done", serde_json::json!({"id": 1}));
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["message"], "done");
        assert_eq!(json["data"]["id"], 1);

        let fail = ApiEnvelope::fail("nope");
        let json = serde_json::to_value(&fail).unwrap();
        assert_eq!(json["success"], false);
        assert!(json["data"].is_null());
    }

    #[test]
    fn internal_errors_hide_details() {
        let err = AuthError::Internal(anyhow::anyhow!("connection reset"));
        assert_eq!(err.public_message(), "Internal server error");
    }
}
