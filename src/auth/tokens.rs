//! Access token issuance and the refresh token store.
//!
//! Access tokens are short-lived HS256 JWTs carrying the user's roles,
//! permissions and profile claims. Refresh tokens are opaque random strings;
//! only their SHA-256 hash is persisted, and each one is single-use.

use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use tracing::{error, info};
use uuid::Uuid;

use crate::auth::config::AuthConfig;
use crate::auth::error::AuthError;
use crate::auth::storage::refresh_tokens::{self, ConsumeOutcome};
use crate::auth::storage::{profiles, roles};

const REFRESH_TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: Uuid,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_id: Option<Uuid>,
    pub profile_ids: Vec<Uuid>,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    /// Access token lifetime in seconds.
    pub expires_in: u64,
}

#[derive(Clone)]
pub struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenIssuer {
    pub fn new(config: &AuthConfig) -> Result<Self, AuthError> {
        let secret = config.jwt_secret();
        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            access_ttl: config.access_token_ttl()?,
            refresh_ttl: config.refresh_token_ttl()?,
        })
    }

    /// Issue a fresh access/refresh pair, loading role and profile claims
    /// from storage and persisting the refresh token hash.
    pub async fn issue(
        &self,
        pool: &PgPool,
        user_id: Uuid,
        profile_id: Option<Uuid>,
    ) -> Result<TokenPair, AuthError> {
        let role_names = roles::names_for_user(pool, user_id).await?;
        let permissions = roles::permissions_for_user(pool, user_id).await?;
        let profile_ids = profiles::ids_for_user(pool, user_id).await?;

        let now = Utc::now();
        let exp = now + chrono::Duration::from_std(self.access_ttl).map_err(anyhow::Error::from)?;
        let claims = AccessClaims {
            sub: user_id,
            roles: role_names,
            permissions,
            profile_id,
            profile_ids,
            iat: now.timestamp(),
            exp: exp.timestamp(),
        };
        let access_token = encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|err| AuthError::Internal(anyhow::anyhow!("failed to sign token: {err}")))?;

        let refresh_token = generate_refresh_token();
        let refresh_expires = now
            + chrono::Duration::from_std(self.refresh_ttl).map_err(anyhow::Error::from)?;
        refresh_tokens::insert(pool, user_id, &hash_token(&refresh_token), refresh_expires)
            .await?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            token_type: "Bearer",
            expires_in: self.access_ttl.as_secs(),
        })
    }

    /// Consume a presented refresh token, returning its owner. The revoke
    /// happens before the caller issues a replacement, so a crash between the
    /// two steps can only cost the client a re-login, never leave two live
    /// tokens.
    pub async fn consume(&self, pool: &PgPool, refresh_token: &str) -> Result<Uuid, AuthError> {
        match refresh_tokens::consume(pool, &hash_token(refresh_token)).await? {
            ConsumeOutcome::Rotated { user_id } => Ok(user_id),
            ConsumeOutcome::Expired => Err(AuthError::unauthorized("Refresh token has expired")),
            ConsumeOutcome::Revoked => Err(AuthError::unauthorized("Invalid refresh token")),
        }
    }

    pub async fn revoke_all(&self, pool: &PgPool, user_id: Uuid) -> Result<u64, AuthError> {
        let revoked = refresh_tokens::revoke_all(pool, user_id).await?;
        info!(%user_id, revoked, "revoked refresh tokens");
        Ok(revoked)
    }

    /// Decode and validate an access token, keeping expiry distinguishable
    /// from tampering for callers that want to prompt a refresh.
    pub fn decode(&self, token: &str) -> Result<AccessClaims, TokenDecodeError> {
        let validation = Validation::default();
        match decode::<AccessClaims>(token, &self.decoding_key, &validation) {
            Ok(data) => Ok(data.claims),
            Err(err) => match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => Err(TokenDecodeError::Expired),
                _ => Err(TokenDecodeError::Invalid),
            },
        }
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenDecodeError {
    Expired,
    Invalid,
}

impl From<TokenDecodeError> for AuthError {
    fn from(err: TokenDecodeError) -> Self {
        match err {
            TokenDecodeError::Expired => AuthError::unauthorized("Token has expired"),
            TokenDecodeError::Invalid => AuthError::unauthorized("Invalid token"),
        }
    }
}

fn generate_refresh_token() -> String {
    let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

pub(crate) fn hash_token(token: &str) -> Vec<u8> {
    Sha256::digest(token.as_bytes()).to_vec()
}

/// Periodic sweep deleting refresh tokens past their expiry.
pub fn spawn_token_cleanup(pool: PgPool, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match refresh_tokens::delete_expired(&pool).await {
                Ok(0) => {}
                Ok(deleted) => info!(deleted, "swept expired refresh tokens"),
                Err(err) => error!("refresh token sweep failed: {err:#}"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn issuer() -> TokenIssuer {
        let config = crate::auth::config::AuthConfig::new(SecretString::from(
            "0123456789abcdef0123456789abcdef",
        ));
        TokenIssuer::new(&config).unwrap()
    }

    fn sign(issuer: &TokenIssuer, claims: &AccessClaims) -> String {
        encode(&Header::default(), claims, &issuer.encoding_key).unwrap()
    }

    fn claims(exp_offset_secs: i64) -> AccessClaims {
        let now = Utc::now().timestamp();
        AccessClaims {
            sub: Uuid::new_v4(),
            roles: vec!["rider".into()],
            permissions: vec!["ride.request".into()],
            profile_id: None,
            profile_ids: vec![],
            iat: now,
            exp: now + exp_offset_secs,
        }
    }

    #[test]
    fn decode_accepts_a_freshly_signed_token() {
        let issuer = issuer();
        let claims = claims(900);
        let token = sign(&issuer, &claims);
        let decoded = issuer.decode(&token).unwrap();
        assert_eq!(decoded.sub, claims.sub);
        assert_eq!(decoded.roles, vec!["rider"]);
    }

    #[test]
    fn expired_and_garbage_tokens_are_told_apart() {
        let issuer = issuer();
        let token = sign(&issuer, &claims(-3600));
        assert!(matches!(
            issuer.decode(&token),
            Err(TokenDecodeError::Expired)
        ));
        assert!(matches!(
            issuer.decode("not.a.jwt"),
            Err(TokenDecodeError::Invalid)
        ));
    }

    #[test]
    fn tampered_signature_is_invalid() {
        let issuer = issuer();
        let mut token = sign(&issuer, &claims(900));
        token.push('x');
        assert!(matches!(
            issuer.decode(&token),
            Err(TokenDecodeError::Invalid)
        ));
    }

    #[test]
    fn refresh_tokens_are_unique_and_urlsafe() {
        let first = generate_refresh_token();
        let second = generate_refresh_token();
        assert_ne!(first, second);
        assert_eq!(first.len(), 43); // 32 bytes, base64url, no padding
        assert!(first.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn token_hash_is_stable() {
        let token = "fixed-token";
        assert_eq!(hash_token(token), hash_token(token));
        assert_eq!(hash_token(token).len(), 32);
        assert_ne!(hash_token(token), hash_token("other-token"));
    }

    #[test]
    fn profile_id_is_omitted_when_absent() {
        let claims = claims(900);
        let json = serde_json::to_value(&claims).unwrap();
        assert!(json.get("profile_id").is_none());
        assert!(json.get("profile_ids").is_some());
    }
}
