//! Identity resolution: mapping a verified external identity or a raw
//! phone/email onto exactly one user row.
//!
//! Lookups are credential-first. The provider's stable subject, not the
//! email, decides which account a token belongs to, so an address change on
//! the provider side rotates the stored email instead of forking the
//! account.

use anyhow::Context;
use chrono::Utc;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::auth::error::AuthError;
use crate::auth::oauth::VerifiedIdentity;
use crate::auth::password::hash_password;
use crate::auth::storage::credentials::{
    self, AuthProvider, CredentialMetadata, CredentialRecord, EmailHistoryEntry,
};
use crate::auth::storage::is_unique_violation;
use crate::auth::storage::users::{self, NewUser, UserRecord};

/// A resolved user plus whether this call created the row.
#[derive(Debug)]
pub struct ResolvedUser {
    pub user: UserRecord,
    pub created: bool,
}

/// An identity without an email cannot register or link; reject it before
/// anything is written.
fn registration_email(identity: &VerifiedIdentity) -> Result<&str, AuthError> {
    identity
        .email
        .as_deref()
        .ok_or_else(|| AuthError::validation("Email is required for provider sign-in"))
}

/// Record an address in the credential history, skipping addresses already
/// seen so a round-trip back to an earlier email adds nothing.
fn record_email(metadata: &mut CredentialMetadata, email: &str) {
    if metadata
        .email_history
        .iter()
        .any(|entry| entry.email == email)
    {
        return;
    }
    metadata.email_history.push(EmailHistoryEntry {
        email: email.to_string(),
        recorded_at: Utc::now(),
    });
}

/// Uniqueness guard: an address already owned by a different live user blocks
/// the rotation.
fn ensure_email_available(owner: Option<Uuid>, user_id: Uuid) -> Result<(), AuthError> {
    match owner {
        Some(other) if other != user_id => Err(AuthError::conflict(
            "Email address is already in use by another account",
        )),
        _ => Ok(()),
    }
}

/// Resolve an OAuth identity to a user: existing credential wins, then an
/// email match links the credential to that account, then a fresh account is
/// created.
pub async fn resolve_oauth_user(
    pool: &PgPool,
    identity: &VerifiedIdentity,
) -> Result<ResolvedUser, AuthError> {
    let provider = identity.provider.as_auth_provider();

    if let Some(credential) =
        credentials::find_by_provider_identifier(pool, provider, &identity.subject).await?
    {
        let user = users::find_by_id(pool, credential.user_id, true)
            .await?
            .ok_or_else(|| {
                AuthError::Internal(anyhow::anyhow!(
                    "credential {} points at a missing user",
                    credential.id
                ))
            })?;
        let user = if user.deleted_at.is_some() {
            info!(user_id = %user.id, "restoring soft-deleted account on provider sign-in");
            users::restore(pool, user.id).await?
        } else {
            user
        };
        let user = rotate_email_if_changed(pool, &credential, identity, user).await?;
        return Ok(ResolvedUser {
            user,
            created: false,
        });
    }

    let email = registration_email(identity)?;

    // No credential yet. A verified matching email links the new provider to
    // the existing account rather than creating a duplicate.
    if identity.email_verified {
        if let Some(user) = users::find_by_email(pool, email).await? {
            attach_credential(pool, user.id, provider, identity).await?;
            info!(user_id = %user.id, %provider, "linked provider to existing account");
            let user = if user.email.as_deref() != Some(email) {
                users::set_email_verified(pool, user.id, email).await?;
                users::find_by_id(pool, user.id, false)
                    .await?
                    .ok_or_else(|| {
                        AuthError::Internal(anyhow::anyhow!("user vanished during provider link"))
                    })?
            } else {
                user
            };
            return Ok(ResolvedUser {
                user,
                created: false,
            });
        }
    }

    let user = users::create(
        pool,
        NewUser {
            email: Some(email),
            phone_number: None,
            email_verified: identity.email_verified,
        },
    )
    .await?;
    attach_credential(pool, user.id, provider, identity).await?;
    info!(user_id = %user.id, %provider, "created account from provider sign-in");

    Ok(ResolvedUser {
        user,
        created: true,
    })
}

fn metadata_from_identity(identity: &VerifiedIdentity) -> CredentialMetadata {
    let mut metadata = CredentialMetadata {
        email: identity.email.clone(),
        email_history: Vec::new(),
        is_private_email: identity.is_private_email.then_some(true),
        real_user_status: identity.real_user_status.clone(),
        password_hash: None,
    };
    if let Some(email) = identity.email.as_deref() {
        record_email(&mut metadata, email);
    }
    metadata
}

/// Attach the provider credential, replacing a stale row for the same
/// (user, provider) pair if one exists.
async fn attach_credential(
    pool: &PgPool,
    user_id: Uuid,
    provider: AuthProvider,
    identity: &VerifiedIdentity,
) -> Result<(), AuthError> {
    let metadata = metadata_from_identity(identity);
    credentials::upsert(pool, user_id, provider, &identity.subject, &metadata).await?;
    Ok(())
}

/// Apply a provider-side email change: guard uniqueness, record the new
/// address in the credential's history, then move the primary email.
async fn rotate_email_if_changed(
    pool: &PgPool,
    credential: &CredentialRecord,
    identity: &VerifiedIdentity,
    user: UserRecord,
) -> Result<UserRecord, AuthError> {
    let Some(new_email) = identity.email.as_deref() else {
        return Ok(user);
    };
    let current = credential.metadata.email.as_deref().or(user.email.as_deref());
    if current == Some(new_email) {
        return Ok(user);
    }

    let mut tx = pool
        .begin()
        .await
        .context("failed to begin email rotation transaction")?;

    let owner = users::email_owner(&mut tx, new_email).await?;
    ensure_email_available(owner, user.id)?;

    let mut metadata = credential.metadata.clone();
    record_email(&mut metadata, new_email);
    metadata.email = Some(new_email.to_string());
    metadata.is_private_email = identity.is_private_email.then_some(true);
    if identity.real_user_status.is_some() {
        metadata.real_user_status = identity.real_user_status.clone();
    }

    credentials::update_metadata(&mut tx, credential.id, &metadata).await?;
    users::update_email(&mut tx, user.id, new_email).await?;

    tx.commit()
        .await
        .context("failed to commit email rotation")?;
    info!(user_id = %user.id, "rotated primary email after provider change");

    let user = users::find_by_id(pool, user.id, false)
        .await?
        .ok_or_else(|| AuthError::Internal(anyhow::anyhow!("user vanished during email rotation")))?;
    Ok(user)
}

/// Phone sign-up: the phone credential is the key. Reuse the account it
/// points at, restoring a soft-deleted one, or create user and credential
/// together.
pub async fn register_with_phone(
    pool: &PgPool,
    phone_number: &str,
) -> Result<ResolvedUser, AuthError> {
    if let Some(credential) =
        credentials::find_by_provider_identifier(pool, AuthProvider::Phone, phone_number).await?
    {
        let user = users::find_by_id(pool, credential.user_id, true)
            .await?
            .ok_or_else(|| {
                AuthError::Internal(anyhow::anyhow!(
                    "credential {} points at a missing user",
                    credential.id
                ))
            })?;
        let user = if user.deleted_at.is_some() {
            info!(user_id = %user.id, "restoring soft-deleted account on phone re-signup");
            users::restore(pool, user.id).await?
        } else {
            user
        };
        return Ok(ResolvedUser {
            user,
            created: false,
        });
    }

    let user = users::create(
        pool,
        NewUser {
            email: None,
            phone_number: Some(phone_number),
            email_verified: false,
        },
    )
    .await?;
    match credentials::insert(
        pool,
        user.id,
        AuthProvider::Phone,
        phone_number,
        &CredentialMetadata::default(),
    )
    .await
    {
        Ok(_) => {}
        // Lost a race with a concurrent sign-up for the same number.
        Err(err) if is_unique_violation(&err) => {
            return Err(AuthError::conflict("Phone number is already registered"));
        }
        Err(err) => return Err(err.into()),
    }
    Ok(ResolvedUser {
        user,
        created: true,
    })
}

/// Email/password sign-up. The address must be free; the password hash lives
/// in the password credential's metadata alongside an email credential.
pub async fn register_with_email(
    pool: &PgPool,
    email: &str,
    password: &str,
) -> Result<ResolvedUser, AuthError> {
    if users::find_by_email(pool, email).await?.is_some() {
        return Err(AuthError::conflict("Email address is already registered"));
    }

    let user = users::create(
        pool,
        NewUser {
            email: Some(email),
            phone_number: None,
            email_verified: false,
        },
    )
    .await?;

    match credentials::insert(
        pool,
        user.id,
        AuthProvider::Email,
        email,
        &CredentialMetadata::default(),
    )
    .await
    {
        Ok(_) => {}
        Err(err) if is_unique_violation(&err) => {
            return Err(AuthError::conflict("Email address is already registered"));
        }
        Err(err) => return Err(err.into()),
    }

    let metadata = CredentialMetadata {
        password_hash: Some(hash_password(password)?),
        ..CredentialMetadata::default()
    };
    match credentials::insert(pool, user.id, AuthProvider::Password, email, &metadata).await {
        Ok(_) => {}
        Err(err) if is_unique_violation(&err) => {
            return Err(AuthError::conflict("Email address is already registered"));
        }
        Err(err) => return Err(err.into()),
    }

    Ok(ResolvedUser {
        user,
        created: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::oauth::OAuthProvider;

    fn identity(email: Option<&str>) -> VerifiedIdentity {
        VerifiedIdentity {
            provider: OAuthProvider::Apple,
            subject: "subject-1".into(),
            email: email.map(String::from),
            email_verified: true,
            is_private_email: false,
            real_user_status: None,
            first_name: None,
            last_name: None,
        }
    }

    #[test]
    fn sign_in_without_email_is_rejected() {
        let err = registration_email(&identity(None)).unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));
        assert_eq!(
            registration_email(&identity(Some("a@example.com"))).unwrap(),
            "a@example.com"
        );
    }

    #[test]
    fn email_history_skips_addresses_already_seen() {
        let mut metadata = CredentialMetadata::default();
        record_email(&mut metadata, "a@example.com");
        record_email(&mut metadata, "b@example.com");
        // Rotating back to the first address must not grow the history.
        record_email(&mut metadata, "a@example.com");
        let emails: Vec<&str> = metadata
            .email_history
            .iter()
            .map(|entry| entry.email.as_str())
            .collect();
        assert_eq!(emails, ["a@example.com", "b@example.com"]);
    }

    #[test]
    fn email_rotation_guard_blocks_other_owners() {
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();
        assert!(ensure_email_available(None, me).is_ok());
        assert!(ensure_email_available(Some(me), me).is_ok());
        let err = ensure_email_available(Some(other), me).unwrap_err();
        assert!(matches!(err, AuthError::Conflict(_)));
    }
}
