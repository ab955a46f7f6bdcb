use std::sync::Arc;

use axum::extract::Extension;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use tracing::instrument;
use utoipa::ToSchema;

use super::{error_response, ok_response};
use crate::api::handlers::{app_role_from_headers, normalize_email, valid_email, valid_password, valid_phone};
use crate::auth::error::AuthError;
use crate::auth::service::AuthService;

#[derive(ToSchema, Deserialize, Debug)]
pub struct PhoneRegister {
    phone: String,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct EmailRegister {
    email: String,
    password: String,
}

#[utoipa::path(
    post,
    path = "/v1/auth/register/phone",
    request_body = PhoneRegister,
    responses (
        (status = 200, description = "Account created or restored, verification code sent"),
        (status = 400, description = "Invalid phone number or app type"),
    ),
    tag = "auth"
)]
#[instrument(skip(auth, payload))]
pub async fn register_phone(
    auth: Extension<Arc<AuthService>>,
    headers: HeaderMap,
    payload: Option<Json<PhoneRegister>>,
) -> Response {
    let role = match app_role_from_headers(&headers) {
        Ok(role) => role,
        Err(err) => return error_response(&err),
    };
    let Some(Json(payload)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    let phone = payload.phone.trim();
    if !valid_phone(phone) {
        return error_response(&AuthError::validation("Invalid phone number"));
    }

    match auth.register_with_phone(phone, role).await {
        Ok(outcome) => ok_response("Verification code sent", outcome),
        Err(err) => error_response(&err),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/register/email",
    request_body = EmailRegister,
    responses (
        (status = 200, description = "Account created, verification code sent"),
        (status = 400, description = "Invalid email, password, or app type"),
        (status = 409, description = "Email already registered"),
    ),
    tag = "auth"
)]
#[instrument(skip(auth, payload))]
pub async fn register_email(
    auth: Extension<Arc<AuthService>>,
    headers: HeaderMap,
    payload: Option<Json<EmailRegister>>,
) -> Response {
    let role = match app_role_from_headers(&headers) {
        Ok(role) => role,
        Err(err) => return error_response(&err),
    };
    let Some(Json(payload)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    let email = normalize_email(&payload.email);
    if !valid_email(&email) {
        return error_response(&AuthError::validation("Invalid email"));
    }
    if !valid_password(&payload.password) {
        return error_response(&AuthError::validation("Invalid password"));
    }

    match auth.register_with_email(&email, &payload.password, role).await {
        Ok(outcome) => ok_response("Verification code sent", outcome),
        Err(err) => error_response(&err),
    }
}
