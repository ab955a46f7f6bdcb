//! Application roles and the role/profile binding step that runs on every
//! registration and first login.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::auth::error::AuthError;
use crate::auth::storage::{profiles, roles};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppRole {
    SuperAdmin,
    Client,
    Staff,
    Rider,
    Driver,
}

impl AppRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SuperAdmin => "super_admin",
            Self::Client => "client",
            Self::Staff => "staff",
            Self::Rider => "rider",
            Self::Driver => "driver",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "super_admin" => Some(Self::SuperAdmin),
            "client" => Some(Self::Client),
            "staff" => Some(Self::Staff),
            "rider" => Some(Self::Rider),
            "driver" => Some(Self::Driver),
            _ => None,
        }
    }

    /// Roles a caller may claim through open self-registration. Staff and
    /// admin accounts are provisioned out of band.
    pub fn self_registrable(self) -> bool {
        matches!(self, Self::Client | Self::Rider | Self::Driver)
    }
}

impl std::fmt::Display for AppRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of binding a user to a role.
#[derive(Debug, Clone)]
pub struct RoleBinding {
    pub role_id: Uuid,
    pub profile_id: Uuid,
    pub profile_complete: bool,
}

/// Make sure the user carries the role and has a profile for it. Regranting
/// an existing role is a no-op, and the profile upsert means concurrent
/// logins converge on a single profile row.
pub async fn ensure_role_and_profile(
    pool: &PgPool,
    user_id: Uuid,
    role: AppRole,
) -> Result<RoleBinding, AuthError> {
    let role_record = roles::find_by_name(pool, role.as_str())
        .await?
        .ok_or_else(|| AuthError::not_found(format!("Role {role} is not configured")))?;

    let newly_granted = !roles::has_role(pool, user_id, role_record.id).await?;
    roles::grant(pool, user_id, role_record.id).await?;
    if newly_granted {
        info!(%user_id, role = role.as_str(), "granted role");
    }

    let profile = profiles::find_or_create(pool, user_id, role_record.id).await?;

    Ok(RoleBinding {
        role_id: role_record.id,
        profile_id: profile.id,
        profile_complete: profile.is_complete(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_names_round_trip() {
        for role in [
            AppRole::SuperAdmin,
            AppRole::Client,
            AppRole::Staff,
            AppRole::Rider,
            AppRole::Driver,
        ] {
            assert_eq!(AppRole::parse(role.as_str()), Some(role));
        }
        assert_eq!(AppRole::parse("janitor"), None);
    }

    #[test]
    fn serde_uses_snake_case() {
        assert_eq!(
            serde_json::to_string(&AppRole::SuperAdmin).unwrap(),
            "\"super_admin\""
        );
    }

    #[test]
    fn privileged_roles_are_not_self_registrable() {
        assert!(!AppRole::SuperAdmin.self_registrable());
        assert!(!AppRole::Staff.self_registrable());
        assert!(AppRole::Rider.self_registrable());
        assert!(AppRole::Driver.self_registrable());
        assert!(AppRole::Client.self_registrable());
    }
}
