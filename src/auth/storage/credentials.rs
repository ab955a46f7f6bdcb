//! Provider credentials: one row per (provider, identifier) pair linking an
//! external identity or password hash to a user.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::Instrument;
use uuid::Uuid;

use super::db_span;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthProvider {
    Phone,
    Email,
    Google,
    Apple,
    Password,
}

impl AuthProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Phone => "phone",
            Self::Email => "email",
            Self::Google => "google",
            Self::Apple => "apple",
            Self::Password => "password",
        }
    }
}

impl std::fmt::Display for AuthProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Free-form provider metadata kept alongside the credential. `email_history`
/// records every distinct address the provider has reported for this
/// credential, oldest first; revisiting an earlier address adds no new entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub email_history: Vec<EmailHistoryEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_private_email: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub real_user_status: Option<String>,
    /// PHC string for password credentials; never exposed through the API.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailHistoryEntry {
    pub email: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CredentialRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub provider: String,
    pub identifier: String,
    pub metadata: CredentialMetadata,
}

impl CredentialRecord {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self> {
        let metadata: serde_json::Value = row.get("metadata");
        let metadata = serde_json::from_value(metadata)
            .context("credential metadata is not in the expected shape")?;
        Ok(Self {
            id: row.get("id"),
            user_id: row.get("user_id"),
            provider: row.get("provider"),
            identifier: row.get("identifier"),
            metadata,
        })
    }
}

const CREDENTIAL_COLUMNS: &str = "id, user_id, provider, identifier, metadata";

/// Credential-first lookup: the provider's stable subject is the key, not the
/// email, so provider-side email changes never orphan the account.
pub async fn find_by_provider_identifier(
    pool: &PgPool,
    provider: AuthProvider,
    identifier: &str,
) -> Result<Option<CredentialRecord>> {
    let query = format!(
        "SELECT {CREDENTIAL_COLUMNS} FROM auth_credentials
         WHERE provider = $1 AND identifier = $2"
    );
    let row = sqlx::query(&query)
        .bind(provider.as_str())
        .bind(identifier)
        .fetch_optional(pool)
        .instrument(db_span("SELECT", "auth_credentials by provider identifier"))
        .await
        .context("failed to look up credential")?;
    row.map(|row| CredentialRecord::from_row(&row)).transpose()
}

pub async fn find_for_user(
    pool: &PgPool,
    user_id: Uuid,
    provider: AuthProvider,
) -> Result<Option<CredentialRecord>> {
    let query = format!(
        "SELECT {CREDENTIAL_COLUMNS} FROM auth_credentials
         WHERE user_id = $1 AND provider = $2"
    );
    let row = sqlx::query(&query)
        .bind(user_id)
        .bind(provider.as_str())
        .fetch_optional(pool)
        .instrument(db_span("SELECT", "auth_credentials for user"))
        .await
        .context("failed to look up user credential")?;
    row.map(|row| CredentialRecord::from_row(&row)).transpose()
}

pub async fn insert(
    pool: &PgPool,
    user_id: Uuid,
    provider: AuthProvider,
    identifier: &str,
    metadata: &CredentialMetadata,
) -> Result<CredentialRecord, sqlx::Error> {
    let metadata =
        serde_json::to_value(metadata).map_err(|err| sqlx::Error::Encode(Box::new(err)))?;
    let query = format!(
        "INSERT INTO auth_credentials (user_id, provider, identifier, metadata)
         VALUES ($1, $2, $3, $4)
         RETURNING {CREDENTIAL_COLUMNS}"
    );
    let row = sqlx::query(&query)
        .bind(user_id)
        .bind(provider.as_str())
        .bind(identifier)
        .bind(metadata)
        .fetch_one(pool)
        .instrument(db_span("INSERT", "auth_credentials"))
        .await?;
    CredentialRecord::from_row(&row).map_err(|err| sqlx::Error::Decode(err.into()))
}

/// Insert-or-replace keyed on (user, provider): a re-link refreshes the stored
/// identifier and metadata instead of leaving the stale row behind.
pub async fn upsert(
    pool: &PgPool,
    user_id: Uuid,
    provider: AuthProvider,
    identifier: &str,
    metadata: &CredentialMetadata,
) -> Result<CredentialRecord> {
    let metadata =
        serde_json::to_value(metadata).context("failed to serialize credential metadata")?;
    let query = format!(
        "INSERT INTO auth_credentials (user_id, provider, identifier, metadata)
         VALUES ($1, $2, $3, $4)
         ON CONFLICT (user_id, provider) DO UPDATE
         SET identifier = EXCLUDED.identifier,
             metadata = EXCLUDED.metadata,
             updated_at = NOW()
         RETURNING {CREDENTIAL_COLUMNS}"
    );
    let row = sqlx::query(&query)
        .bind(user_id)
        .bind(provider.as_str())
        .bind(identifier)
        .bind(metadata)
        .fetch_one(pool)
        .instrument(db_span("INSERT", "auth_credentials upsert"))
        .await
        .context("failed to upsert credential")?;
    CredentialRecord::from_row(&row)
}

pub async fn update_metadata(
    tx: &mut Transaction<'_, Postgres>,
    credential_id: Uuid,
    metadata: &CredentialMetadata,
) -> Result<()> {
    let metadata =
        serde_json::to_value(metadata).context("failed to serialize credential metadata")?;
    let query = "UPDATE auth_credentials SET metadata = $2, updated_at = NOW() WHERE id = $1";
    sqlx::query(query)
        .bind(credential_id)
        .bind(metadata)
        .execute(&mut **tx)
        .instrument(db_span("UPDATE", "auth_credentials metadata"))
        .await
        .context("failed to update credential metadata")?;
    Ok(())
}

/// Non-transactional metadata replacement, used for password hash updates.
pub async fn set_metadata(
    pool: &PgPool,
    credential_id: Uuid,
    metadata: &CredentialMetadata,
) -> Result<()> {
    let metadata =
        serde_json::to_value(metadata).context("failed to serialize credential metadata")?;
    let query = "UPDATE auth_credentials SET metadata = $2, updated_at = NOW() WHERE id = $1";
    sqlx::query(query)
        .bind(credential_id)
        .bind(metadata)
        .execute(pool)
        .instrument(db_span("UPDATE", "auth_credentials metadata"))
        .await
        .context("failed to update credential metadata")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_serializes_lowercase() {
        let json = serde_json::to_string(&AuthProvider::Google).unwrap();
        assert_eq!(json, "\"google\"");
        assert_eq!(AuthProvider::Apple.to_string(), "apple");
        assert_eq!(AuthProvider::Phone.to_string(), "phone");
        assert_eq!(AuthProvider::Email.to_string(), "email");
    }

    #[test]
    fn metadata_omits_empty_fields() {
        let metadata = CredentialMetadata::default();
        let json = serde_json::to_value(&metadata).unwrap();
        assert_eq!(json, serde_json::json!({}));
    }

    #[test]
    fn metadata_round_trips_history() {
        let metadata = CredentialMetadata {
            email: Some("new@example.com".into()),
            email_history: vec![EmailHistoryEntry {
                email: "old@example.com".into(),
                recorded_at: Utc::now(),
            }],
            is_private_email: Some(false),
            real_user_status: Some("likely_real".into()),
            password_hash: None,
        };
        let json = serde_json::to_value(&metadata).unwrap();
        let back: CredentialMetadata = serde_json::from_value(json).unwrap();
        assert_eq!(back.email.as_deref(), Some("new@example.com"));
        assert_eq!(back.email_history.len(), 1);
        assert_eq!(back.email_history[0].email, "old@example.com");
    }

    #[test]
    fn metadata_tolerates_unknown_shape_defaults() {
        let back: CredentialMetadata = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(back.email.is_none());
        assert!(back.email_history.is_empty());
    }
}
