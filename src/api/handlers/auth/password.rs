use std::sync::Arc;

use axum::extract::Extension;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use tracing::instrument;
use utoipa::ToSchema;

use super::{error_response, ok_empty_response};
use crate::api::handlers::{normalize_email, valid_email, valid_password};
use crate::auth::error::AuthError;
use crate::auth::service::AuthService;

#[derive(ToSchema, Deserialize, Debug)]
pub struct ForgotPassword {
    email: String,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct VerifyForgotOtp {
    email: String,
    otp: String,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct ResetPassword {
    email: String,
    otp: String,
    new_password: String,
}

fn checked_email(email: &str) -> Result<String, AuthError> {
    let email = normalize_email(email);
    if !valid_email(&email) {
        return Err(AuthError::validation("Invalid email"));
    }
    Ok(email)
}

#[utoipa::path(
    post,
    path = "/v1/auth/password/forgot",
    request_body = ForgotPassword,
    responses (
        (status = 200, description = "Recovery code sent"),
        (status = 404, description = "No account for that email"),
    ),
    tag = "auth"
)]
#[instrument(skip(auth, payload))]
pub async fn forgot_password(
    auth: Extension<Arc<AuthService>>,
    payload: Option<Json<ForgotPassword>>,
) -> Response {
    let Some(Json(payload)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };
    let email = match checked_email(&payload.email) {
        Ok(email) => email,
        Err(err) => return error_response(&err),
    };
    match auth.forgot_password(&email).await {
        Ok(()) => ok_empty_response("Recovery code sent"),
        Err(err) => error_response(&err),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/password/verify-otp",
    request_body = VerifyForgotOtp,
    responses (
        (status = 200, description = "Code accepted; it remains valid for the reset call"),
        (status = 401, description = "Invalid or expired code"),
    ),
    tag = "auth"
)]
#[instrument(skip(auth, payload))]
pub async fn verify_forgot_password_otp(
    auth: Extension<Arc<AuthService>>,
    payload: Option<Json<VerifyForgotOtp>>,
) -> Response {
    let Some(Json(payload)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };
    let email = match checked_email(&payload.email) {
        Ok(email) => email,
        Err(err) => return error_response(&err),
    };
    match auth.verify_forgot_password_otp(&email, &payload.otp).await {
        Ok(()) => ok_empty_response("Code accepted"),
        Err(err) => error_response(&err),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/password/reset",
    request_body = ResetPassword,
    responses (
        (status = 200, description = "Password updated; all sessions revoked"),
        (status = 400, description = "Invalid email or password"),
        (status = 401, description = "Invalid or expired code"),
    ),
    tag = "auth"
)]
#[instrument(skip(auth, payload))]
pub async fn reset_password(
    auth: Extension<Arc<AuthService>>,
    payload: Option<Json<ResetPassword>>,
) -> Response {
    let Some(Json(payload)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };
    let email = match checked_email(&payload.email) {
        Ok(email) => email,
        Err(err) => return error_response(&err),
    };
    if !valid_password(&payload.new_password) {
        return error_response(&AuthError::validation("Invalid password"));
    }
    match auth
        .reset_password(&email, &payload.otp, &payload.new_password)
        .await
    {
        Ok(()) => ok_empty_response("Password updated"),
        Err(err) => error_response(&err),
    }
}
