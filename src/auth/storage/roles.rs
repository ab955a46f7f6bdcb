//! Roles, permissions and the user-role join table.

use anyhow::{Context, Result};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::db_span;

#[derive(Debug, Clone)]
pub struct RoleRecord {
    pub id: Uuid,
    pub name: String,
}

pub async fn find_by_name(pool: &PgPool, name: &str) -> Result<Option<RoleRecord>> {
    let query = "SELECT id, name FROM roles WHERE name = $1";
    let row = sqlx::query(query)
        .bind(name)
        .fetch_optional(pool)
        .instrument(db_span("SELECT", "roles by name"))
        .await
        .context("failed to look up role")?;
    Ok(row.map(|row| RoleRecord {
        id: row.get("id"),
        name: row.get("name"),
    }))
}

/// Grant a role; already-granted is a no-op, not an error.
pub async fn grant(pool: &PgPool, user_id: Uuid, role_id: Uuid) -> Result<()> {
    let query = "INSERT INTO user_roles (user_id, role_id)
         VALUES ($1, $2)
         ON CONFLICT (user_id, role_id) DO NOTHING";
    sqlx::query(query)
        .bind(user_id)
        .bind(role_id)
        .execute(pool)
        .instrument(db_span("INSERT", "user_roles"))
        .await
        .context("failed to grant role")?;
    Ok(())
}

pub async fn names_for_user(pool: &PgPool, user_id: Uuid) -> Result<Vec<String>> {
    let query = "SELECT r.name FROM roles r
         JOIN user_roles ur ON ur.role_id = r.id
         WHERE ur.user_id = $1
         ORDER BY r.name";
    let rows = sqlx::query(query)
        .bind(user_id)
        .fetch_all(pool)
        .instrument(db_span("SELECT", "roles for user"))
        .await
        .context("failed to list user roles")?;
    Ok(rows.iter().map(|row| row.get("name")).collect())
}

pub async fn has_role(pool: &PgPool, user_id: Uuid, role_id: Uuid) -> Result<bool> {
    let query = "SELECT 1 AS present FROM user_roles WHERE user_id = $1 AND role_id = $2";
    let row = sqlx::query(query)
        .bind(user_id)
        .bind(role_id)
        .fetch_optional(pool)
        .instrument(db_span("SELECT", "user_roles membership"))
        .await
        .context("failed to check role membership")?;
    Ok(row.is_some())
}

/// Distinct permission names across all of the user's roles.
pub async fn permissions_for_user(pool: &PgPool, user_id: Uuid) -> Result<Vec<String>> {
    let query = "SELECT DISTINCT p.name FROM permissions p
         JOIN role_permissions rp ON rp.permission_id = p.id
         JOIN user_roles ur ON ur.role_id = rp.role_id
         WHERE ur.user_id = $1
         ORDER BY p.name";
    let rows = sqlx::query(query)
        .bind(user_id)
        .fetch_all(pool)
        .instrument(db_span("SELECT", "permissions for user"))
        .await
        .context("failed to list user permissions")?;
    Ok(rows.iter().map(|row| row.get("name")).collect())
}
