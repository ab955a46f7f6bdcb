//! Per-role user profiles. One profile per (user, role), created on demand.

use anyhow::{Context, Result};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::db_span;

pub const STATUS_ACTIVE: &str = "active";

#[derive(Debug, Clone)]
pub struct ProfileRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub role_id: Uuid,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub status: String,
}

impl ProfileRecord {
    fn from_row(row: &sqlx::postgres::PgRow) -> Self {
        Self {
            id: row.get("id"),
            user_id: row.get("user_id"),
            role_id: row.get("role_id"),
            first_name: row.get("first_name"),
            last_name: row.get("last_name"),
            status: row.get("status"),
        }
    }

    /// A profile counts as filled in once both name parts are present.
    pub fn is_complete(&self) -> bool {
        matches!(
            (&self.first_name, &self.last_name),
            (Some(first), Some(last)) if !first.is_empty() && !last.is_empty()
        )
    }

    /// Only active profiles authorize password-based login.
    pub fn is_active(&self) -> bool {
        self.status == STATUS_ACTIVE
    }
}

const PROFILE_COLUMNS: &str = "id, user_id, role_id, first_name, last_name, status";

/// Find-or-create as a single upsert so two concurrent logins for the same
/// (user, role) converge on one row.
pub async fn find_or_create(pool: &PgPool, user_id: Uuid, role_id: Uuid) -> Result<ProfileRecord> {
    let query = format!(
        "INSERT INTO user_profiles (user_id, role_id)
         VALUES ($1, $2)
         ON CONFLICT (user_id, role_id) DO UPDATE SET updated_at = NOW()
         RETURNING {PROFILE_COLUMNS}"
    );
    let row = sqlx::query(&query)
        .bind(user_id)
        .bind(role_id)
        .fetch_one(pool)
        .instrument(db_span("INSERT", "user_profiles upsert"))
        .await
        .context("failed to find or create profile")?;
    Ok(ProfileRecord::from_row(&row))
}

/// Plain lookup, used where an absent profile is an error rather than an
/// invitation to create one.
pub async fn find(pool: &PgPool, user_id: Uuid, role_id: Uuid) -> Result<Option<ProfileRecord>> {
    let query = format!(
        "SELECT {PROFILE_COLUMNS} FROM user_profiles WHERE user_id = $1 AND role_id = $2"
    );
    let row = sqlx::query(&query)
        .bind(user_id)
        .bind(role_id)
        .fetch_optional(pool)
        .instrument(db_span("SELECT", "user_profiles by user and role"))
        .await
        .context("failed to look up profile")?;
    Ok(row.map(|row| ProfileRecord::from_row(&row)))
}

pub async fn ids_for_user(pool: &PgPool, user_id: Uuid) -> Result<Vec<Uuid>> {
    let query = "SELECT id FROM user_profiles WHERE user_id = $1 ORDER BY created_at";
    let rows = sqlx::query(query)
        .bind(user_id)
        .fetch_all(pool)
        .instrument(db_span("SELECT", "user_profiles ids"))
        .await
        .context("failed to list profile ids")?;
    Ok(rows.iter().map(|row| row.get("id")).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(first: Option<&str>, last: Option<&str>, status: &str) -> ProfileRecord {
        ProfileRecord {
            id: Uuid::nil(),
            user_id: Uuid::nil(),
            role_id: Uuid::nil(),
            first_name: first.map(String::from),
            last_name: last.map(String::from),
            status: status.to_string(),
        }
    }

    #[test]
    fn completeness_requires_both_names() {
        assert!(profile(Some("Ada"), Some("Lovelace"), STATUS_ACTIVE).is_complete());
        assert!(!profile(Some("Ada"), None, STATUS_ACTIVE).is_complete());
        assert!(!profile(None, Some("Lovelace"), STATUS_ACTIVE).is_complete());
        assert!(!profile(Some(""), Some("Lovelace"), STATUS_ACTIVE).is_complete());
        assert!(!profile(None, None, STATUS_ACTIVE).is_complete());
    }

    #[test]
    fn only_active_profiles_authorize() {
        assert!(profile(None, None, "active").is_active());
        assert!(!profile(None, None, "suspended").is_active());
        assert!(!profile(None, None, "pending").is_active());
        assert!(!profile(None, None, "").is_active());
    }
}
