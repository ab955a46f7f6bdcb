//! User rows: the identity anchor.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::Instrument;
use uuid::Uuid;

use super::db_span;

#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: Uuid,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub email_verified_at: Option<DateTime<Utc>>,
    pub phone_verified_at: Option<DateTime<Utc>>,
    pub otp_secret: Option<String>,
    pub otp_secret_expires_at: Option<DateTime<Utc>>,
    pub is_policy_allowed: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl UserRecord {
    fn from_row(row: &sqlx::postgres::PgRow) -> Self {
        Self {
            id: row.get("id"),
            email: row.get("email"),
            phone_number: row.get("phone_number"),
            email_verified_at: row.get("email_verified_at"),
            phone_verified_at: row.get("phone_verified_at"),
            otp_secret: row.get("otp_secret"),
            otp_secret_expires_at: row.get("otp_secret_expires_at"),
            is_policy_allowed: row.get("is_policy_allowed"),
            deleted_at: row.get("deleted_at"),
        }
    }
}

const USER_COLUMNS: &str = "id, email, phone_number, email_verified_at, phone_verified_at, \
     otp_secret, otp_secret_expires_at, is_policy_allowed, deleted_at";

/// New user parameters; OAuth sign-ups arrive with a pre-verified email.
#[derive(Debug, Default)]
pub struct NewUser<'a> {
    pub email: Option<&'a str>,
    pub phone_number: Option<&'a str>,
    pub email_verified: bool,
}

pub async fn find_by_email(pool: &PgPool, email: &str) -> Result<Option<UserRecord>> {
    let query = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1 AND deleted_at IS NULL");
    let row = sqlx::query(&query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(db_span("SELECT", "users by email"))
        .await
        .context("failed to look up user by email")?;
    Ok(row.map(|row| UserRecord::from_row(&row)))
}

pub async fn find_by_phone(pool: &PgPool, phone_number: &str) -> Result<Option<UserRecord>> {
    let query =
        format!("SELECT {USER_COLUMNS} FROM users WHERE phone_number = $1 AND deleted_at IS NULL");
    let row = sqlx::query(&query)
        .bind(phone_number)
        .fetch_optional(pool)
        .instrument(db_span("SELECT", "users by phone"))
        .await
        .context("failed to look up user by phone number")?;
    Ok(row.map(|row| UserRecord::from_row(&row)))
}

/// Find by id; soft-deleted rows are filtered out unless `include_deleted`.
pub async fn find_by_id(
    pool: &PgPool,
    user_id: Uuid,
    include_deleted: bool,
) -> Result<Option<UserRecord>> {
    let query = if include_deleted {
        format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1")
    } else {
        format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1 AND deleted_at IS NULL")
    };
    let row = sqlx::query(&query)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(db_span("SELECT", "users by id"))
        .await
        .context("failed to look up user by id")?;
    Ok(row.map(|row| UserRecord::from_row(&row)))
}

pub async fn create(pool: &PgPool, new_user: NewUser<'_>) -> Result<UserRecord> {
    let query = format!(
        "INSERT INTO users (email, phone_number, email_verified_at)
         VALUES ($1, $2, CASE WHEN $3 THEN NOW() ELSE NULL END)
         RETURNING {USER_COLUMNS}"
    );
    let row = sqlx::query(&query)
        .bind(new_user.email)
        .bind(new_user.phone_number)
        .bind(new_user.email_verified)
        .fetch_one(pool)
        .instrument(db_span("INSERT", "users"))
        .await
        .context("failed to create user")?;
    Ok(UserRecord::from_row(&row))
}

/// Clear the soft-delete marker, bringing the account back to life.
pub async fn restore(pool: &PgPool, user_id: Uuid) -> Result<UserRecord> {
    let query = format!(
        "UPDATE users SET deleted_at = NULL, updated_at = NOW()
         WHERE id = $1
         RETURNING {USER_COLUMNS}"
    );
    let row = sqlx::query(&query)
        .bind(user_id)
        .fetch_one(pool)
        .instrument(db_span("UPDATE", "users restore"))
        .await
        .context("failed to restore user")?;
    Ok(UserRecord::from_row(&row))
}

pub async fn set_otp_secret(
    pool: &PgPool,
    user_id: Uuid,
    secret: &str,
    expires_at: DateTime<Utc>,
) -> Result<()> {
    let query = "UPDATE users
         SET otp_secret = $2, otp_secret_expires_at = $3, updated_at = NOW()
         WHERE id = $1";
    sqlx::query(query)
        .bind(user_id)
        .bind(secret)
        .bind(expires_at)
        .execute(pool)
        .instrument(db_span("UPDATE", "users otp secret"))
        .await
        .context("failed to store OTP secret")?;
    Ok(())
}

pub async fn clear_otp_secret(pool: &PgPool, user_id: Uuid) -> Result<()> {
    let query = "UPDATE users
         SET otp_secret = NULL, otp_secret_expires_at = NULL, updated_at = NOW()
         WHERE id = $1";
    sqlx::query(query)
        .bind(user_id)
        .execute(pool)
        .instrument(db_span("UPDATE", "users clear otp secret"))
        .await
        .context("failed to clear OTP secret")?;
    Ok(())
}

/// Stamp the verified timestamp for a channel and consume the OTP secret in
/// one statement so a verified code can never be replayed.
pub async fn mark_channel_verified(pool: &PgPool, user_id: Uuid, channel: Channel) -> Result<()> {
    let query = match channel {
        Channel::Email => {
            "UPDATE users
             SET email_verified_at = NOW(), otp_secret = NULL,
                 otp_secret_expires_at = NULL, updated_at = NOW()
             WHERE id = $1"
        }
        Channel::Phone => {
            "UPDATE users
             SET phone_verified_at = NOW(), otp_secret = NULL,
                 otp_secret_expires_at = NULL, updated_at = NOW()
             WHERE id = $1"
        }
    };
    sqlx::query(query)
        .bind(user_id)
        .execute(pool)
        .instrument(db_span("UPDATE", "users mark verified"))
        .await
        .context("failed to mark channel verified")?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Phone,
    Email,
}

/// Look up a live user holding the given email, for uniqueness guards.
pub async fn email_owner(
    tx: &mut Transaction<'_, Postgres>,
    email: &str,
) -> Result<Option<Uuid>> {
    let query = "SELECT id FROM users WHERE email = $1 AND deleted_at IS NULL";
    let row = sqlx::query(query)
        .bind(email)
        .fetch_optional(&mut **tx)
        .instrument(db_span("SELECT", "users email owner"))
        .await
        .context("failed to check email ownership")?;
    Ok(row.map(|row| row.get("id")))
}

/// Replace the primary email and stamp it verified, for a linked account
/// whose provider reports a newer verified address.
pub async fn set_email_verified(pool: &PgPool, user_id: Uuid, email: &str) -> Result<()> {
    let query = "UPDATE users
         SET email = $2, email_verified_at = NOW(), updated_at = NOW()
         WHERE id = $1";
    sqlx::query(query)
        .bind(user_id)
        .bind(email)
        .execute(pool)
        .instrument(db_span("UPDATE", "users email verified"))
        .await
        .context("failed to update verified email")?;
    Ok(())
}

/// Update the primary email inside a rotation/link transaction. The address
/// arrives provider-verified, so the verified timestamp moves with it.
pub async fn update_email(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    email: &str,
) -> Result<()> {
    let query = "UPDATE users
         SET email = $2, email_verified_at = NOW(), updated_at = NOW()
         WHERE id = $1";
    sqlx::query(query)
        .bind(user_id)
        .bind(email)
        .execute(&mut **tx)
        .instrument(db_span("UPDATE", "users email"))
        .await
        .context("failed to update user email")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_user_defaults_are_empty() {
        let new_user = NewUser::default();
        assert!(new_user.email.is_none());
        assert!(new_user.phone_number.is_none());
        assert!(!new_user.email_verified);
    }

    #[test]
    fn channel_is_comparable() {
        assert_eq!(Channel::Phone, Channel::Phone);
        assert_ne!(Channel::Phone, Channel::Email);
    }
}
