use std::sync::Arc;

use axum::extract::Extension;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use tracing::instrument;
use utoipa::ToSchema;

use super::{error_response, ok_empty_response};
use crate::api::handlers::{normalize_email, valid_email, valid_phone};
use crate::auth::error::AuthError;
use crate::auth::service::AuthService;
use crate::auth::storage::users::Channel;

#[derive(ToSchema, Deserialize, Debug, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum OtpChannel {
    Phone,
    Email,
}

impl From<OtpChannel> for Channel {
    fn from(channel: OtpChannel) -> Self {
        match channel {
            OtpChannel::Phone => Self::Phone,
            OtpChannel::Email => Self::Email,
        }
    }
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct SendOtp {
    channel: OtpChannel,
    identifier: String,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct VerifyOtp {
    channel: OtpChannel,
    identifier: String,
    code: String,
}

fn validated_identifier(channel: OtpChannel, identifier: &str) -> Result<String, AuthError> {
    match channel {
        OtpChannel::Phone => {
            let phone = identifier.trim();
            if !valid_phone(phone) {
                return Err(AuthError::validation("Invalid phone number"));
            }
            Ok(phone.to_string())
        }
        OtpChannel::Email => {
            let email = normalize_email(identifier);
            if !valid_email(&email) {
                return Err(AuthError::validation("Invalid email"));
            }
            Ok(email)
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/otp/send",
    request_body = SendOtp,
    responses (
        (status = 200, description = "Verification code sent"),
        (status = 400, description = "Invalid identifier"),
        (status = 404, description = "No account for that identifier"),
    ),
    tag = "auth"
)]
#[instrument(skip(auth, payload))]
pub async fn send_otp(
    auth: Extension<Arc<AuthService>>,
    payload: Option<Json<SendOtp>>,
) -> Response {
    let Some(Json(payload)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };
    let identifier = match validated_identifier(payload.channel, &payload.identifier) {
        Ok(identifier) => identifier,
        Err(err) => return error_response(&err),
    };
    match auth.send_otp(payload.channel.into(), &identifier).await {
        Ok(()) => ok_empty_response("Verification code sent"),
        Err(err) => error_response(&err),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/otp/verify",
    request_body = VerifyOtp,
    responses (
        (status = 200, description = "Channel verified"),
        (status = 401, description = "Invalid or expired code"),
        (status = 404, description = "No account for that identifier"),
    ),
    tag = "auth"
)]
#[instrument(skip(auth, payload))]
pub async fn verify_otp(
    auth: Extension<Arc<AuthService>>,
    payload: Option<Json<VerifyOtp>>,
) -> Response {
    let Some(Json(payload)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };
    let identifier = match validated_identifier(payload.channel, &payload.identifier) {
        Ok(identifier) => identifier,
        Err(err) => return error_response(&err),
    };
    match auth
        .verify_otp(payload.channel.into(), &identifier, &payload.code)
        .await
    {
        Ok(()) => ok_empty_response("Verified"),
        Err(err) => error_response(&err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_parses_lowercase() {
        let send: SendOtp =
            serde_json::from_str(r#"{"channel":"phone","identifier":"+15550000001"}"#).unwrap();
        assert!(matches!(send.channel, OtpChannel::Phone));
        assert!(serde_json::from_str::<SendOtp>(r#"{"channel":"sms","identifier":"x"}"#).is_err());
    }

    #[test]
    fn identifier_validation_follows_channel() {
        assert!(validated_identifier(OtpChannel::Phone, "+15550000001").is_ok());
        assert!(validated_identifier(OtpChannel::Phone, "rider@example.com").is_err());
        assert_eq!(
            validated_identifier(OtpChannel::Email, " Rider@Example.com ").unwrap(),
            "rider@example.com"
        );
        assert!(validated_identifier(OtpChannel::Email, "+15550000001").is_err());
    }
}
