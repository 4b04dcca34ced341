//! Access grants of external consumers to APIs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Access level of a grant. Ordered: read < write < admin.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum AccessLevel {
    Read,
    Write,
    Admin,
}

impl AccessLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            AccessLevel::Read => "read",
            AccessLevel::Write => "write",
            AccessLevel::Admin => "admin",
        }
    }

    /// Whether a grant at this level satisfies `required`.
    pub fn satisfies(self, required: AccessLevel) -> bool {
        self >= required
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for an access level outside read/write/admin.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid access level '{0}': expected read, write or admin")]
pub struct InvalidAccessLevel(pub String);

impl FromStr for AccessLevel {
    type Err = InvalidAccessLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(AccessLevel::Read),
            "write" => Ok(AccessLevel::Write),
            "admin" => Ok(AccessLevel::Admin),
            other => Err(InvalidAccessLevel(other.to_string())),
        }
    }
}

/// Represents a row of `api_user_access`.
///
/// Revocation is soft: `is_active` drops to false and `revoked_at` is stamped, the row stays so
/// usage history remains attributable.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
pub struct ApiUserAccess {
    pub id: Uuid,
    pub api_id: Uuid,
    pub consumer_id: String,
    pub access_level: AccessLevel,
    pub granted_by: String,
    pub granted_at: DateTime<Utc>,
    pub is_active: bool,
    pub revoked_at: Option<DateTime<Utc>>,
}

/// Request body for granting access.
///
/// `access_level` arrives as text so an unknown level is reported as a validation error
/// instead of a deserialization failure.
#[derive(Debug, Clone, Deserialize)]
pub struct GrantAccessRequest {
    pub api_id: Uuid,
    pub consumer_id: String,
    pub access_level: String,
    pub granted_by: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_levels_only() {
        assert_eq!("read".parse(), Ok(AccessLevel::Read));
        assert_eq!("write".parse(), Ok(AccessLevel::Write));
        assert_eq!("admin".parse(), Ok(AccessLevel::Admin));
        assert_eq!(
            "superuser".parse::<AccessLevel>(),
            Err(InvalidAccessLevel("superuser".into()))
        );
        assert!("Admin".parse::<AccessLevel>().is_err());
    }

    #[test]
    fn levels_are_ordered() {
        assert!(AccessLevel::Admin.satisfies(AccessLevel::Write));
        assert!(AccessLevel::Write.satisfies(AccessLevel::Read));
        assert!(!AccessLevel::Read.satisfies(AccessLevel::Write));
    }
}
