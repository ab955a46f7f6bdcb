//! Google and Apple ID token verification.
//!
//! Tokens are RS256 JWTs signed by the provider. Signing keys are fetched
//! from the provider's JWKS endpoint and cached with a TTL; a kid miss after
//! a fresh fetch means the token is bogus, not that the cache is stale.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context};
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::auth::error::AuthError;
use crate::auth::storage::credentials::AuthProvider;

const GOOGLE_JWKS_URL: &str = "https://www.googleapis.com/oauth2/v3/certs";
const APPLE_JWKS_URL: &str = "https://appleid.apple.com/auth/keys";
const JWKS_CACHE_TTL: Duration = Duration::from_secs(3600);

pub const APPLE_RELAY_DOMAIN: &str = "@privaterelay.appleid.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OAuthProvider {
    Google,
    Apple,
}

impl OAuthProvider {
    fn jwks_url(self) -> &'static str {
        match self {
            Self::Google => GOOGLE_JWKS_URL,
            Self::Apple => APPLE_JWKS_URL,
        }
    }

    pub fn as_auth_provider(self) -> AuthProvider {
        match self {
            Self::Google => AuthProvider::Google,
            Self::Apple => AuthProvider::Apple,
        }
    }
}

/// What a verified ID token tells us about the person behind it.
#[derive(Debug, Clone)]
pub struct VerifiedIdentity {
    pub provider: OAuthProvider,
    /// Provider-stable subject, the credential identifier.
    pub subject: String,
    pub email: Option<String>,
    pub email_verified: bool,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// Apple private relay addresses forward to the real mailbox but rotate
    /// with app deletion, so they are flagged for downstream handling.
    pub is_private_email: bool,
    pub real_user_status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default, deserialize_with = "flexible_bool")]
    email_verified: Option<bool>,
    #[serde(default)]
    given_name: Option<String>,
    #[serde(default)]
    family_name: Option<String>,
    #[serde(default, deserialize_with = "flexible_bool")]
    is_private_email: Option<bool>,
    #[serde(default)]
    real_user_status: Option<u8>,
}

/// Google sends booleans, Apple sends the strings "true"/"false". Accept
/// both.
fn flexible_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Bool(b)) => Some(b),
        Some(serde_json::Value::String(s)) => Some(s == "true"),
        _ => None,
    })
}

/// Apple's `real_user_status` claim: 0 unsupported device, 1 unknown,
/// 2 likely a real person.
fn real_user_status_label(status: u8) -> &'static str {
    match status {
        0 => "unsupported",
        2 => "likely_real",
        _ => "unknown",
    }
}

/// Apple tokens sometimes omit the claim entirely; those read as "unknown"
/// rather than leaving the field unset. Google never sends it.
fn real_user_status_value(provider: OAuthProvider, claim: Option<u8>) -> Option<String> {
    match (provider, claim) {
        (_, Some(status)) => Some(real_user_status_label(status).to_string()),
        (OAuthProvider::Apple, None) => Some("unknown".to_string()),
        (OAuthProvider::Google, None) => None,
    }
}

struct CachedJwks {
    fetched_at: Instant,
    keys: JwkSet,
}

pub struct OAuthVerifier {
    client: reqwest::Client,
    google_audiences: Vec<String>,
    apple_audiences: Vec<String>,
    cache: Mutex<HashMap<OAuthProvider, CachedJwks>>,
}

impl OAuthVerifier {
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(
        google_audiences: Vec<String>,
        apple_audiences: Vec<String>,
    ) -> anyhow::Result<Self> {
        // Provider calls are bounded so a slow JWKS endpoint degrades into
        // an authentication failure instead of a hung login.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build OAuth HTTP client")?;
        Ok(Self {
            client,
            google_audiences,
            apple_audiences,
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Verify an ID token end to end: fetch or reuse the provider JWKS,
    /// check signature, audience and issuer, then normalize the claims.
    pub async fn verify(
        &self,
        provider: OAuthProvider,
        id_token: &str,
    ) -> Result<VerifiedIdentity, AuthError> {
        let header = decode_header(id_token)
            .map_err(|_| AuthError::unauthorized("Invalid identity token"))?;
        let kid = header
            .kid
            .ok_or_else(|| AuthError::unauthorized("Identity token is missing a key id"))?;

        let decoding_key = self.decoding_key(provider, &kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        match provider {
            OAuthProvider::Google => {
                validation.set_audience(&self.google_audiences);
                validation.set_issuer(&["https://accounts.google.com", "accounts.google.com"]);
            }
            OAuthProvider::Apple => {
                validation.set_audience(&self.apple_audiences);
                validation.set_issuer(&["https://appleid.apple.com"]);
            }
        }

        let data = decode::<IdTokenClaims>(id_token, &decoding_key, &validation)
            .map_err(|err| match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    AuthError::unauthorized("Identity token has expired")
                }
                _ => AuthError::unauthorized("Invalid identity token"),
            })?;
        let claims = data.claims;

        let is_private_email = claims.is_private_email.unwrap_or(false)
            || claims
                .email
                .as_deref()
                .is_some_and(|email| email.ends_with(APPLE_RELAY_DOMAIN));

        Ok(VerifiedIdentity {
            provider,
            subject: claims.sub,
            email: claims.email,
            email_verified: claims.email_verified.unwrap_or(false),
            first_name: claims.given_name,
            last_name: claims.family_name,
            is_private_email,
            real_user_status: real_user_status_value(provider, claims.real_user_status),
        })
    }

    async fn decoding_key(
        &self,
        provider: OAuthProvider,
        kid: &str,
    ) -> Result<DecodingKey, AuthError> {
        let mut cache = self.cache.lock().await;

        let stale = match cache.get(&provider) {
            Some(cached) => cached.fetched_at.elapsed() > JWKS_CACHE_TTL,
            None => true,
        };
        // Refresh on kid miss too; providers rotate keys ahead of the TTL.
        let miss = !stale
            && cache
                .get(&provider)
                .is_some_and(|cached| cached.keys.find(kid).is_none());

        if stale || miss {
            let keys = self.fetch_jwks(provider).await?;
            debug!(provider = ?provider, keys = keys.keys.len(), "refreshed provider JWKS");
            cache.insert(
                provider,
                CachedJwks {
                    fetched_at: Instant::now(),
                    keys,
                },
            );
        }

        let cached = cache
            .get(&provider)
            .ok_or_else(|| AuthError::Internal(anyhow!("JWKS cache miss after refresh")))?;
        let jwk = cached
            .keys
            .find(kid)
            .ok_or_else(|| AuthError::unauthorized("Identity token signed by unknown key"))?;
        DecodingKey::from_jwk(jwk)
            .map_err(|err| AuthError::Internal(anyhow!("unusable provider key: {err}")))
    }

    async fn fetch_jwks(&self, provider: OAuthProvider) -> Result<JwkSet, AuthError> {
        let response = self
            .client
            .get(provider.jwks_url())
            .send()
            .await
            .context("failed to reach identity provider")?;
        let keys = response
            .error_for_status()
            .context("identity provider returned an error")?
            .json::<JwkSet>()
            .await
            .context("identity provider returned malformed keys")?;
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Flagged {
        #[serde(default, deserialize_with = "flexible_bool")]
        flag: Option<bool>,
    }

    #[test]
    fn flexible_bool_accepts_both_spellings() {
        let b: Flagged = serde_json::from_str(r#"{"flag": true}"#).unwrap();
        assert_eq!(b.flag, Some(true));
        let s: Flagged = serde_json::from_str(r#"{"flag": "true"}"#).unwrap();
        assert_eq!(s.flag, Some(true));
        let f: Flagged = serde_json::from_str(r#"{"flag": "false"}"#).unwrap();
        assert_eq!(f.flag, Some(false));
        let none: Flagged = serde_json::from_str(r#"{}"#).unwrap();
        assert_eq!(none.flag, None);
    }

    #[test]
    fn real_user_status_labels() {
        assert_eq!(real_user_status_label(0), "unsupported");
        assert_eq!(real_user_status_label(1), "unknown");
        assert_eq!(real_user_status_label(2), "likely_real");
        assert_eq!(real_user_status_label(7), "unknown");
    }

    #[test]
    fn apple_without_status_claim_reads_unknown() {
        assert_eq!(
            real_user_status_value(OAuthProvider::Apple, None).as_deref(),
            Some("unknown")
        );
        assert_eq!(
            real_user_status_value(OAuthProvider::Apple, Some(2)).as_deref(),
            Some("likely_real")
        );
        assert_eq!(real_user_status_value(OAuthProvider::Google, None), None);
    }

    #[test]
    fn relay_addresses_are_detected_from_email_alone() {
        let claims: IdTokenClaims = serde_json::from_value(serde_json::json!({
            "sub": "001234.abcdef",
            "email": "x9f2k@privaterelay.appleid.com"
        }))
        .unwrap();
        assert!(claims
            .email
            .as_deref()
            .is_some_and(|e| e.ends_with(APPLE_RELAY_DOMAIN)));
        assert_eq!(claims.is_private_email, None);
    }

    #[test]
    fn provider_maps_to_credential_provider() {
        assert_eq!(OAuthProvider::Google.as_auth_provider(), AuthProvider::Google);
        assert_eq!(OAuthProvider::Apple.as_auth_provider(), AuthProvider::Apple);
    }
}
