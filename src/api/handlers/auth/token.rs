use std::sync::Arc;

use axum::extract::Extension;
use axum::http::{header::AUTHORIZATION, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use tracing::instrument;
use utoipa::ToSchema;

use super::{error_response, ok_empty_response, ok_response};
use crate::api::handlers::optional_app_role_from_headers;
use crate::auth::error::AuthError;
use crate::auth::service::AuthService;

#[derive(ToSchema, Deserialize, Debug)]
pub struct RefreshRequest {
    refresh_token: String,
}

#[utoipa::path(
    post,
    path = "/v1/auth/token/refresh",
    request_body = RefreshRequest,
    responses (
        (status = 200, description = "New session issued; the old refresh token is revoked"),
        (status = 401, description = "Refresh token invalid, expired, or already used"),
    ),
    tag = "auth"
)]
#[instrument(skip(auth, headers, payload))]
pub async fn refresh(
    auth: Extension<Arc<AuthService>>,
    headers: HeaderMap,
    payload: Option<Json<RefreshRequest>>,
) -> Response {
    let Some(Json(payload)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };
    let role = match optional_app_role_from_headers(&headers) {
        Ok(role) => role,
        Err(err) => return error_response(&err),
    };
    match auth.refresh_token(&payload.refresh_token, role).await {
        Ok(session) => ok_response("Token refreshed", session),
        Err(err) => error_response(&err),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    responses (
        (status = 200, description = "All refresh tokens revoked"),
        (status = 401, description = "Missing or invalid bearer token"),
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
#[instrument(skip(auth, headers))]
pub async fn logout(auth: Extension<Arc<AuthService>>, headers: HeaderMap) -> Response {
    let claims = match bearer_claims(&auth, &headers) {
        Ok(claims) => claims,
        Err(err) => return error_response(&err),
    };
    match auth.logout(claims.sub).await {
        Ok(()) => ok_empty_response("Logged out"),
        Err(err) => error_response(&err),
    }
}

fn bearer_claims(
    auth: &AuthService,
    headers: &HeaderMap,
) -> Result<crate::auth::tokens::AccessClaims, AuthError> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| AuthError::unauthorized("Missing bearer token"))?;
    auth.token_issuer().decode(token).map_err(AuthError::from)
}
