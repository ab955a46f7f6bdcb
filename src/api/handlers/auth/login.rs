use std::sync::Arc;

use axum::extract::Extension;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use tracing::instrument;
use utoipa::ToSchema;

use super::{error_response, ok_response};
use crate::api::handlers::{app_role_from_headers, normalize_email, valid_email, valid_phone};
use crate::auth::error::AuthError;
use crate::auth::oauth::OAuthProvider;
use crate::auth::service::AuthService;

#[derive(ToSchema, Deserialize, Debug)]
pub struct PhoneLogin {
    phone: String,
    otp: String,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct EmailLogin {
    email: String,
    otp: String,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct PasswordLogin {
    email: String,
    password: String,
}

#[derive(ToSchema, Deserialize, Debug, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum OAuthProviderName {
    Google,
    Apple,
}

impl From<OAuthProviderName> for OAuthProvider {
    fn from(name: OAuthProviderName) -> Self {
        match name {
            OAuthProviderName::Google => Self::Google,
            OAuthProviderName::Apple => Self::Apple,
        }
    }
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct OAuthLogin {
    provider: OAuthProviderName,
    token: String,
}

#[utoipa::path(
    post,
    path = "/v1/auth/login/phone",
    request_body = PhoneLogin,
    responses (
        (status = 200, description = "Login successful, tokens issued"),
        (status = 401, description = "Invalid credentials"),
    ),
    tag = "auth"
)]
#[instrument(skip(auth, payload))]
pub async fn login_phone(
    auth: Extension<Arc<AuthService>>,
    headers: HeaderMap,
    payload: Option<Json<PhoneLogin>>,
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
    match auth.login_with_phone(phone, &payload.otp, role).await {
        Ok(session) => ok_response("Login successful", session),
        Err(err) => error_response(&err),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/login/email",
    request_body = EmailLogin,
    responses (
        (status = 200, description = "Login successful, tokens issued"),
        (status = 401, description = "Invalid credentials"),
    ),
    tag = "auth"
)]
#[instrument(skip(auth, payload))]
pub async fn login_email(
    auth: Extension<Arc<AuthService>>,
    headers: HeaderMap,
    payload: Option<Json<EmailLogin>>,
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
    match auth.login_with_email(&email, &payload.otp, role).await {
        Ok(session) => ok_response("Login successful", session),
        Err(err) => error_response(&err),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/login/oauth",
    request_body = OAuthLogin,
    responses (
        (status = 200, description = "Login successful, tokens issued"),
        (status = 401, description = "Identity token rejected"),
        (status = 409, description = "Email belongs to another account"),
    ),
    tag = "auth"
)]
#[instrument(skip(auth, payload))]
pub async fn login_oauth(
    auth: Extension<Arc<AuthService>>,
    headers: HeaderMap,
    payload: Option<Json<OAuthLogin>>,
) -> Response {
    let role = match app_role_from_headers(&headers) {
        Ok(role) => role,
        Err(err) => return error_response(&err),
    };
    let Some(Json(payload)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };
    match auth
        .login_with_oauth(payload.provider.into(), &payload.token, role)
        .await
    {
        Ok(session) => ok_response("Login successful", session),
        Err(err) => error_response(&err),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/login/password",
    request_body = PasswordLogin,
    responses (
        (status = 200, description = "Login successful, tokens issued"),
        (status = 401, description = "Invalid email or password"),
    ),
    tag = "auth"
)]
#[instrument(skip(auth, payload))]
pub async fn login_password(
    auth: Extension<Arc<AuthService>>,
    headers: HeaderMap,
    payload: Option<Json<PasswordLogin>>,
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
        // Same generic message as a wrong password, on purpose.
        return error_response(&AuthError::invalid_credentials());
    }
    match auth.login_with_password(&email, &payload.password, role).await {
        Ok(session) => ok_response("Login successful", session),
        Err(err) => error_response(&err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oauth_provider_names_parse() {
        let login: OAuthLogin =
            serde_json::from_str(r#"{"provider":"google","token":"t"}"#).unwrap();
        assert!(matches!(login.provider, OAuthProviderName::Google));
        assert!(serde_json::from_str::<OAuthLogin>(r#"{"provider":"github","token":"t"}"#).is_err());
    }
}
