//! Refresh token persistence. Only the SHA-256 hash of the opaque token is
//! stored; the presented token is hashed and matched against `token_hash`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::db_span;

/// Result of attempting to consume a presented refresh token.
#[derive(Debug)]
pub enum ConsumeOutcome {
    /// Token was valid and is now revoked; the caller issues a replacement.
    Rotated { user_id: Uuid },
    /// Token exists but its lifetime has passed.
    Expired,
    /// Token is unknown or was already revoked.
    Revoked,
}

/// Where a stored token currently stands, judged without touching it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    Live,
    Expired,
    Revoked,
}

/// Pure state check shared by [`consume`] and its tests. Revocation wins over
/// expiry so a replayed token reads as revoked even after its lifetime ends.
pub fn classify(
    revoked_at: Option<DateTime<Utc>>,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> TokenState {
    if revoked_at.is_some() {
        TokenState::Revoked
    } else if expires_at <= now {
        TokenState::Expired
    } else {
        TokenState::Live
    }
}

pub async fn insert(
    pool: &PgPool,
    user_id: Uuid,
    token_hash: &[u8],
    expires_at: DateTime<Utc>,
) -> Result<()> {
    let query = "INSERT INTO refresh_tokens (user_id, token_hash, expires_at)
         VALUES ($1, $2, $3)";
    sqlx::query(query)
        .bind(user_id)
        .bind(token_hash)
        .bind(expires_at)
        .execute(pool)
        .instrument(db_span("INSERT", "refresh_tokens"))
        .await
        .context("failed to store refresh token")?;
    Ok(())
}

/// Single-use consumption: lock the row, check state, revoke. The row lock
/// keeps two concurrent presentations of the same token from both rotating;
/// the loser sees `revoked_at` set and gets [`ConsumeOutcome::Revoked`].
pub async fn consume(pool: &PgPool, token_hash: &[u8]) -> Result<ConsumeOutcome> {
    let mut tx = pool
        .begin()
        .await
        .context("failed to begin refresh token transaction")?;

    let query = "SELECT id, user_id, expires_at, revoked_at
         FROM refresh_tokens WHERE token_hash = $1
         FOR UPDATE";
    let row = sqlx::query(query)
        .bind(token_hash)
        .fetch_optional(&mut *tx)
        .instrument(db_span("SELECT", "refresh_tokens by hash"))
        .await
        .context("failed to look up refresh token")?;

    let Some(row) = row else {
        return Ok(ConsumeOutcome::Revoked);
    };

    let revoked_at: Option<DateTime<Utc>> = row.get("revoked_at");
    let expires_at: DateTime<Utc> = row.get("expires_at");
    match classify(revoked_at, expires_at, Utc::now()) {
        TokenState::Revoked => return Ok(ConsumeOutcome::Revoked),
        TokenState::Expired => return Ok(ConsumeOutcome::Expired),
        TokenState::Live => {}
    }

    let id: Uuid = row.get("id");
    let user_id: Uuid = row.get("user_id");

    let query = "UPDATE refresh_tokens SET revoked_at = NOW() WHERE id = $1";
    sqlx::query(query)
        .bind(id)
        .execute(&mut *tx)
        .instrument(db_span("UPDATE", "refresh_tokens revoke"))
        .await
        .context("failed to revoke refresh token")?;

    tx.commit()
        .await
        .context("failed to commit refresh token rotation")?;

    Ok(ConsumeOutcome::Rotated { user_id })
}

/// Read-only lookup of which user a presented token belongs to. Used to check
/// the subject before a rotation that would revoke the token.
pub async fn owner(pool: &PgPool, token_hash: &[u8]) -> Result<Option<Uuid>> {
    let query = "SELECT user_id FROM refresh_tokens WHERE token_hash = $1";
    let row = sqlx::query(query)
        .bind(token_hash)
        .fetch_optional(pool)
        .instrument(db_span("SELECT", "refresh_tokens owner"))
        .await
        .context("failed to look up refresh token owner")?;
    Ok(row.map(|row| row.get("user_id")))
}

/// Revoke every live token a user holds. Used on logout and password reset.
pub async fn revoke_all(pool: &PgPool, user_id: Uuid) -> Result<u64> {
    let query = "UPDATE refresh_tokens SET revoked_at = NOW()
         WHERE user_id = $1 AND revoked_at IS NULL";
    let result = sqlx::query(query)
        .bind(user_id)
        .execute(pool)
        .instrument(db_span("UPDATE", "refresh_tokens revoke all"))
        .await
        .context("failed to revoke refresh tokens")?;
    Ok(result.rows_affected())
}

/// Delete rows past their expiry. Revoked rows are kept until then so a
/// replayed token stays distinguishable from an unknown one.
pub async fn delete_expired(pool: &PgPool) -> Result<u64> {
    let query = "DELETE FROM refresh_tokens WHERE expires_at <= NOW()";
    let result = sqlx::query(query)
        .execute(pool)
        .instrument(db_span("DELETE", "refresh_tokens expired"))
        .await
        .context("failed to delete expired refresh tokens")?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn live_token_rotates_only_once() {
        let now = Utc::now();
        let expires = now + Duration::hours(1);
        assert_eq!(classify(None, expires, now), TokenState::Live);
        // After consumption the stored row carries revoked_at; presenting the
        // same token again must not count as live.
        assert_eq!(classify(Some(now), expires, now), TokenState::Revoked);
    }

    #[test]
    fn expired_token_is_not_live() {
        let now = Utc::now();
        assert_eq!(
            classify(None, now - Duration::seconds(1), now),
            TokenState::Expired
        );
        assert_eq!(classify(None, now, now), TokenState::Expired);
    }

    #[test]
    fn revocation_outranks_expiry() {
        let now = Utc::now();
        assert_eq!(
            classify(Some(now - Duration::hours(2)), now - Duration::hours(1), now),
            TokenState::Revoked
        );
    }
}
