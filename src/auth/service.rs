//! The auth orchestrator: every login, registration, refresh and password
//! flow composed from the engine modules, one method per operation.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::config::AuthConfig;
use crate::auth::error::AuthError;
use crate::auth::identity;
use crate::auth::notify::{Notifier, Recipient};
use crate::auth::oauth::{OAuthProvider, OAuthVerifier};
use crate::auth::otp::OtpEngine;
use crate::auth::password::{hash_password, verify_password};
use crate::auth::roles::{self, AppRole};
use crate::auth::storage::credentials::{self, AuthProvider};
use crate::auth::storage::users::{self, Channel, UserRecord};
use crate::auth::storage::{profiles, refresh_tokens, roles as storage_roles};
use crate::auth::tokens::{self, TokenIssuer, TokenPair};

/// Payload returned by every login and refresh flow. The account flags are
/// read from a fresh user snapshot at issuance, not from whatever record the
/// flow started with.
#[derive(Debug, Clone, Serialize)]
pub struct AuthSession {
    pub user_id: Uuid,
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
    pub roles: Vec<String>,
    pub profile_id: Uuid,
    /// Whether the profile for the requested role has both name parts set.
    pub is_profile_updated: bool,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub email_verified: bool,
    pub phone_verified: bool,
    pub is_policy_allowed: bool,
}

/// Payload returned by registration flows; tokens come later, after OTP
/// verification.
#[derive(Debug, Clone, Serialize)]
pub struct RegistrationOutcome {
    pub user_id: Uuid,
    pub created: bool,
    pub otp_sent: bool,
}

#[derive(Clone)]
pub struct AuthService {
    pool: PgPool,
    config: AuthConfig,
    otp: OtpEngine,
    oauth: Arc<OAuthVerifier>,
    tokens: TokenIssuer,
    notifier: Arc<dyn Notifier>,
}

impl AuthService {
    /// # Errors
    /// Returns an error if configured durations are malformed or the OAuth
    /// client cannot be built.
    pub fn new(
        pool: PgPool,
        config: AuthConfig,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, AuthError> {
        let bypass = config
            .staging()
            .then(|| config.staging_bypass_code().to_string());
        let otp = OtpEngine::new(
            config.otp_digits(),
            config.otp_step_seconds(),
            config.otp_skew(),
            bypass,
        );
        let google_audiences: Vec<String> = [config.google_client_id(), config.google_client_id_ios()]
            .into_iter()
            .filter(|id| !id.is_empty())
            .map(String::from)
            .collect();
        let apple_audiences: Vec<String> = std::iter::once(config.apple_bundle_id())
            .filter(|id| !id.is_empty())
            .map(String::from)
            .collect();
        let oauth = Arc::new(OAuthVerifier::new(google_audiences, apple_audiences)?);
        let tokens = TokenIssuer::new(&config)?;
        Ok(Self {
            pool,
            config,
            otp,
            oauth,
            tokens,
            notifier,
        })
    }

    pub fn token_issuer(&self) -> &TokenIssuer {
        &self.tokens
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // -- registration ------------------------------------------------------

    /// Phone sign-up: create or restore the account, bind the role, send a
    /// verification code.
    pub async fn register_with_phone(
        &self,
        phone_number: &str,
        role: AppRole,
    ) -> Result<RegistrationOutcome, AuthError> {
        if !role.self_registrable() {
            return Err(AuthError::validation(format!(
                "Role {role} cannot self-register"
            )));
        }
        let resolved = identity::register_with_phone(&self.pool, phone_number).await?;
        roles::ensure_role_and_profile(&self.pool, resolved.user.id, role).await?;
        let otp_sent = self
            .dispatch_otp(&resolved.user, Channel::Phone, self.config.phone_otp_template())
            .await?;
        Ok(RegistrationOutcome {
            user_id: resolved.user.id,
            created: resolved.created,
            otp_sent,
        })
    }

    /// Email/password sign-up, limited to rider accounts.
    pub async fn register_with_email(
        &self,
        email: &str,
        password: &str,
        role: AppRole,
    ) -> Result<RegistrationOutcome, AuthError> {
        if role != AppRole::Rider {
            return Err(AuthError::validation(
                "Email registration is only available for rider accounts",
            ));
        }
        let resolved = identity::register_with_email(&self.pool, email, password).await?;
        roles::ensure_role_and_profile(&self.pool, resolved.user.id, role).await?;
        let otp_sent = self
            .dispatch_otp(&resolved.user, Channel::Email, self.config.email_otp_template())
            .await?;
        Ok(RegistrationOutcome {
            user_id: resolved.user.id,
            created: resolved.created,
            otp_sent,
        })
    }

    // -- OTP ---------------------------------------------------------------

    /// (Re)send a verification code over the given channel.
    pub async fn send_otp(&self, channel: Channel, identifier: &str) -> Result<(), AuthError> {
        let user = self.user_by_channel(channel, identifier).await?;
        let template = match channel {
            Channel::Phone => self.config.phone_otp_template(),
            Channel::Email => self.config.email_otp_template(),
        };
        self.dispatch_otp(&user, channel, template).await?;
        Ok(())
    }

    /// Verify a code and stamp the channel verified. The secret is consumed
    /// on success, so a code never verifies twice.
    pub async fn verify_otp(
        &self,
        channel: Channel,
        identifier: &str,
        code: &str,
    ) -> Result<(), AuthError> {
        let user = self.user_by_channel(channel, identifier).await?;
        self.check_otp(&user, code)?;
        users::mark_channel_verified(&self.pool, user.id, channel).await?;
        info!(user_id = %user.id, ?channel, "channel verified");
        Ok(())
    }

    // -- login -------------------------------------------------------------

    /// OTP login over the phone channel.
    pub async fn login_with_phone(
        &self,
        phone_number: &str,
        code: &str,
        role: AppRole,
    ) -> Result<AuthSession, AuthError> {
        let user = users::find_by_phone(&self.pool, phone_number)
            .await?
            .ok_or_else(AuthError::invalid_credentials)?;
        self.check_otp(&user, code)
            .map_err(|_| AuthError::invalid_credentials())?;
        users::mark_channel_verified(&self.pool, user.id, Channel::Phone).await?;
        self.establish_session(&user, role).await
    }

    /// OTP login over the email channel.
    pub async fn login_with_email(
        &self,
        email: &str,
        code: &str,
        role: AppRole,
    ) -> Result<AuthSession, AuthError> {
        let user = users::find_by_email(&self.pool, email)
            .await?
            .ok_or_else(AuthError::invalid_credentials)?;
        self.check_otp(&user, code)
            .map_err(|_| AuthError::invalid_credentials())?;
        users::mark_channel_verified(&self.pool, user.id, Channel::Email).await?;
        self.establish_session(&user, role).await
    }

    /// Sign in with a Google or Apple ID token, creating or linking the
    /// account as needed.
    pub async fn login_with_oauth(
        &self,
        provider: OAuthProvider,
        id_token: &str,
        role: AppRole,
    ) -> Result<AuthSession, AuthError> {
        if !role.self_registrable() {
            return Err(AuthError::validation(format!(
                "Role {role} cannot sign in with an identity provider"
            )));
        }
        let verified = self.oauth.verify(provider, id_token).await.map_err(|err| {
            warn!(?provider, "identity token rejected: {err}");
            err
        })?;
        let resolved = identity::resolve_oauth_user(&self.pool, &verified).await?;
        self.establish_session(&resolved.user, role).await
    }

    /// Classic email and password login. Every failure collapses into the
    /// same generic message so the response never confirms an address.
    pub async fn login_with_password(
        &self,
        email: &str,
        password: &str,
        role: AppRole,
    ) -> Result<AuthSession, AuthError> {
        let user = users::find_by_email(&self.pool, email)
            .await?
            .ok_or_else(AuthError::invalid_credentials)?;
        let credential = credentials::find_for_user(&self.pool, user.id, AuthProvider::Password)
            .await?
            .ok_or_else(AuthError::invalid_credentials)?;
        let stored = credential
            .metadata
            .password_hash
            .as_deref()
            .ok_or_else(AuthError::invalid_credentials)?;
        if !verify_password(password, stored) {
            return Err(AuthError::invalid_credentials());
        }

        // Password login needs an existing, active profile for the role;
        // unlike OTP and provider flows it never creates one.
        let role_record = storage_roles::find_by_name(&self.pool, role.as_str())
            .await?
            .ok_or_else(|| AuthError::not_found(format!("Role {role} is not configured")))?;
        let profile = profiles::find(&self.pool, user.id, role_record.id)
            .await?
            .ok_or_else(|| AuthError::unauthorized("User profile not found"))?;
        if !profile.is_active() {
            return Err(AuthError::unauthorized(
                "Account is not active. Please contact administrator.",
            ));
        }

        self.establish_session(&user, role).await
    }

    // -- tokens ------------------------------------------------------------

    /// Rotate a refresh token into a full session. With no role selector the
    /// user's first assigned role is used; an explicit role must already be
    /// assigned and carry a profile.
    pub async fn refresh_token(
        &self,
        refresh_token: &str,
        role: Option<AppRole>,
    ) -> Result<AuthSession, AuthError> {
        let user_id = self.tokens.consume(&self.pool, refresh_token).await?;

        let role = match role {
            Some(role) => role,
            None => {
                let names = storage_roles::names_for_user(&self.pool, user_id).await?;
                names
                    .first()
                    .and_then(|name| AppRole::parse(name))
                    .ok_or_else(|| AuthError::unauthorized("User has no assigned roles"))?
            }
        };
        let role_record = storage_roles::find_by_name(&self.pool, role.as_str())
            .await?
            .ok_or_else(|| AuthError::not_found(format!("Role {role} is not configured")))?;
        if !storage_roles::has_role(&self.pool, user_id, role_record.id).await? {
            return Err(AuthError::unauthorized(format!(
                "User does not have the {role} role"
            )));
        }
        let profile = profiles::find(&self.pool, user_id, role_record.id)
            .await?
            .ok_or_else(|| {
                AuthError::unauthorized(format!("User does not have the {role} role"))
            })?;

        let pair = self
            .tokens
            .issue(&self.pool, user_id, Some(profile.id))
            .await?;
        self.session_payload(user_id, pair, profile.id, profile.is_complete())
            .await
    }

    /// Read-only owner lookup for a presented refresh token, for callers
    /// that must check the subject before consuming it.
    pub async fn refresh_token_owner(
        &self,
        refresh_token: &str,
    ) -> Result<Option<Uuid>, AuthError> {
        let owner =
            refresh_tokens::owner(&self.pool, &tokens::hash_token(refresh_token)).await?;
        Ok(owner)
    }

    /// Revoke every refresh token the user holds.
    pub async fn logout(&self, user_id: Uuid) -> Result<(), AuthError> {
        self.tokens.revoke_all(&self.pool, user_id).await?;
        Ok(())
    }

    // -- password recovery -------------------------------------------------

    pub async fn forgot_password(&self, email: &str) -> Result<(), AuthError> {
        let user = users::find_by_email(&self.pool, email)
            .await?
            .ok_or_else(|| AuthError::not_found("No account found for that email"))?;
        self.dispatch_otp(&user, Channel::Email, self.config.forgot_password_template())
            .await?;
        Ok(())
    }

    /// Pre-flight check so the client can gate the new-password screen. The
    /// secret survives this call; `reset_password` consumes it.
    pub async fn verify_forgot_password_otp(
        &self,
        email: &str,
        code: &str,
    ) -> Result<(), AuthError> {
        let user = users::find_by_email(&self.pool, email)
            .await?
            .ok_or_else(|| AuthError::not_found("No account found for that email"))?;
        self.check_otp(&user, code)?;
        Ok(())
    }

    /// Set a new password after OTP proof, then force re-login everywhere by
    /// revoking all refresh tokens.
    pub async fn reset_password(
        &self,
        email: &str,
        code: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        let user = users::find_by_email(&self.pool, email)
            .await?
            .ok_or_else(|| AuthError::not_found("No account found for that email"))?;
        self.check_otp(&user, code)?;

        let hash = hash_password(new_password)?;
        match credentials::find_for_user(&self.pool, user.id, AuthProvider::Password).await? {
            Some(credential) => {
                let mut metadata = credential.metadata.clone();
                metadata.password_hash = Some(hash);
                credentials::set_metadata(&self.pool, credential.id, &metadata).await?;
            }
            None => {
                let metadata = credentials::CredentialMetadata {
                    password_hash: Some(hash),
                    ..credentials::CredentialMetadata::default()
                };
                credentials::insert(&self.pool, user.id, AuthProvider::Password, email, &metadata)
                    .await
                    .map_err(AuthError::from)?;
            }
        }

        users::clear_otp_secret(&self.pool, user.id).await?;
        self.tokens.revoke_all(&self.pool, user.id).await?;
        info!(user_id = %user.id, "password reset completed");
        Ok(())
    }

    // -- internals ---------------------------------------------------------

    async fn user_by_channel(
        &self,
        channel: Channel,
        identifier: &str,
    ) -> Result<UserRecord, AuthError> {
        let user = match channel {
            Channel::Phone => users::find_by_phone(&self.pool, identifier).await?,
            Channel::Email => users::find_by_email(&self.pool, identifier).await?,
        };
        user.ok_or_else(|| AuthError::not_found("No account found for that identifier"))
    }

    /// Generate a fresh secret, persist it with its TTL, and hand the
    /// current code to the notifier. Delivery failure is logged, not
    /// surfaced; the code can always be resent.
    async fn dispatch_otp(
        &self,
        user: &UserRecord,
        channel: Channel,
        template_id: &str,
    ) -> Result<bool, AuthError> {
        let recipient = match channel {
            Channel::Phone => user
                .phone_number
                .clone()
                .map(Recipient::Phone)
                .ok_or_else(|| AuthError::validation("Account has no phone number on file"))?,
            Channel::Email => user
                .email
                .clone()
                .map(Recipient::Email)
                .ok_or_else(|| AuthError::validation("Account has no email on file"))?,
        };

        let secret = self.otp.generate_secret();
        let expires_at = Utc::now() + ChronoDuration::seconds(self.config.otp_secret_ttl_seconds());
        users::set_otp_secret(&self.pool, user.id, &secret, expires_at).await?;

        let code = self.otp.current_code(&secret)?;
        let mut variables = BTreeMap::new();
        variables.insert("otp".to_string(), code);

        match self
            .notifier
            .send_notification(template_id, &recipient, &variables)
            .await
        {
            Ok(()) => Ok(true),
            Err(err) => {
                warn!(user_id = %user.id, template_id, "notification dispatch failed: {err:#}");
                Ok(false)
            }
        }
    }

    /// Validate a submitted code against the user's stored secret. In
    /// staging the bypass code passes even with no secret on file.
    fn check_otp(&self, user: &UserRecord, code: &str) -> Result<(), AuthError> {
        if self.config.staging() && code == self.config.staging_bypass_code() {
            return Ok(());
        }
        let secret = user
            .otp_secret
            .as_deref()
            .ok_or_else(|| AuthError::unauthorized("No verification code was requested"))?;
        if let Some(expires_at) = user.otp_secret_expires_at {
            if expires_at <= Utc::now() {
                return Err(AuthError::unauthorized("Verification code has expired"));
            }
        }
        if !self.otp.verify(secret, code) {
            return Err(AuthError::unauthorized("Invalid verification code"));
        }
        Ok(())
    }

    /// Shared login tail: bind role and profile, then mint tokens.
    async fn establish_session(
        &self,
        user: &UserRecord,
        role: AppRole,
    ) -> Result<AuthSession, AuthError> {
        let binding = roles::ensure_role_and_profile(&self.pool, user.id, role).await?;
        let pair = self
            .tokens
            .issue(&self.pool, user.id, Some(binding.profile_id))
            .await?;
        info!(user_id = %user.id, role = role.as_str(), "session established");
        self.session_payload(user.id, pair, binding.profile_id, binding.profile_complete)
            .await
    }

    /// Assemble the session body around a freshly minted pair. The user row
    /// is re-read here so the verification and policy flags reflect whatever
    /// the flow just changed, not a stale record.
    async fn session_payload(
        &self,
        user_id: Uuid,
        pair: TokenPair,
        profile_id: Uuid,
        profile_complete: bool,
    ) -> Result<AuthSession, AuthError> {
        let user = users::find_by_id(&self.pool, user_id, false)
            .await?
            .ok_or_else(AuthError::invalid_credentials)?;
        let role_names = storage_roles::names_for_user(&self.pool, user_id).await?;
        Ok(AuthSession {
            user_id,
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            token_type: pair.token_type,
            expires_in: pair.expires_in,
            roles: role_names,
            profile_id,
            is_profile_updated: profile_complete,
            email: user.email,
            phone_number: user.phone_number,
            email_verified: user.email_verified_at.is_some(),
            phone_verified: user.phone_verified_at.is_some(),
            is_policy_allowed: user.is_policy_allowed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_body_carries_account_flags() {
        let session = AuthSession {
            user_id: Uuid::new_v4(),
            access_token: "access".into(),
            refresh_token: "refresh".into(),
            token_type: "Bearer",
            expires_in: 900,
            roles: vec!["rider".into()],
            profile_id: Uuid::new_v4(),
            is_profile_updated: true,
            email: Some("rider@example.com".into()),
            phone_number: None,
            email_verified: true,
            phone_verified: false,
            is_policy_allowed: true,
        };
        let json = serde_json::to_value(&session).unwrap();
        for key in [
            "email",
            "phone_number",
            "email_verified",
            "phone_verified",
            "is_policy_allowed",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        assert_eq!(json["email_verified"], serde_json::json!(true));
        assert_eq!(json["phone_verified"], serde_json::json!(false));
    }
}
