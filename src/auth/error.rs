//! Domain error taxonomy shared by the auth core and the HTTP layer.

use axum::http::StatusCode;
use thiserror::Error;

/// Errors surfaced by the authentication core.
///
/// Handlers translate these into the response envelope; the orchestrator and
/// the resolver let them propagate unmodified so call sites can branch on the
/// kind (e.g. auto-create on `NotFound` during registration, hard-fail during
/// login).
#[derive(Debug, Error)]
pub enum AuthError {
    /// Malformed or missing input, rejected before any persistence.
    #[error("{0}")]
    Validation(String),

    /// A referenced user, role, or token does not exist.
    #[error("{0}")]
    NotFound(String),

    /// The request would violate a uniqueness invariant.
    #[error("{0}")]
    Conflict(String),

    /// Bad credential, invalid/expired OTP or token, inactive profile.
    #[error("{0}")]
    Unauthorized(String),

    /// Infrastructure failure; detail is logged, the client gets a generic message.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    /// Generic message used by password/OTP login paths so a failed attempt
    /// never reveals whether the account exists.
    pub fn invalid_credentials() -> Self {
        Self::Unauthorized("Invalid email or password".to_string())
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to put into the response envelope.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        Self::Internal(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(
            AuthError::validation("bad").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AuthError::not_found("missing").status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(AuthError::conflict("dup").status(), StatusCode::CONFLICT);
        assert_eq!(
            AuthError::unauthorized("no").status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AuthError::Internal(anyhow::anyhow!("db down")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn internal_detail_is_not_exposed() {
        let err = AuthError::Internal(anyhow::anyhow!("connection refused to 10.0.0.3"));
        assert_eq!(err.public_message(), "Internal server error");
    }

    #[test]
    fn domain_messages_are_exposed() {
        let err = AuthError::conflict("Email already associated with another account");
        assert_eq!(
            err.public_message(),
            "Email already associated with another account"
        );
    }

    #[test]
    fn invalid_credentials_is_generic() {
        assert_eq!(
            AuthError::invalid_credentials().public_message(),
            "Invalid email or password"
        );
    }
}
