//! Account roles and the management hierarchy between them.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    User,
    Admin,
    SuperAdmin,
}

/// Roles accepted on `/api/admin/*`.
pub const ADMIN_ROLES: &[Role] = &[Role::Admin, Role::SuperAdmin];

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Admin => "ADMIN",
            Self::SuperAdmin => "SUPER_ADMIN",
        }
    }

    #[must_use]
    pub const fn is_admin(self) -> bool {
        matches!(self, Self::Admin | Self::SuperAdmin)
    }

    /// `SUPER_ADMIN` manages everyone, `ADMIN` manages only `USER` accounts.
    #[must_use]
    pub const fn can_manage(self, target: Self) -> bool {
        match self {
            Self::SuperAdmin => true,
            Self::Admin => matches!(target, Self::User),
            Self::User => false,
        }
    }

    /// Whether this role may hand out `role` (on invites or role changes).
    #[must_use]
    pub const fn can_assign(self, role: Self) -> bool {
        match self {
            Self::SuperAdmin => true,
            Self::Admin => matches!(role, Self::User),
            Self::User => false,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "USER" => Ok(Self::User),
            "ADMIN" => Ok(Self::Admin),
            "SUPER_ADMIN" => Ok(Self::SuperAdmin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_str() {
        for role in [Role::User, Role::Admin, Role::SuperAdmin] {
            assert_eq!(role.as_str().parse::<Role>(), Ok(role));
        }
        assert!("admin".parse::<Role>().is_err());
        assert!("".parse::<Role>().is_err());
    }

    #[test]
    fn serializes_upper_case() {
        assert_eq!(
            serde_json::to_string(&Role::SuperAdmin).ok().as_deref(),
            Some("\"SUPER_ADMIN\"")
        );
        assert_eq!(
            serde_json::from_str::<Role>("\"ADMIN\"").ok(),
            Some(Role::Admin)
        );
    }

    #[test]
    fn management_hierarchy() {
        assert!(Role::SuperAdmin.can_manage(Role::SuperAdmin));
        assert!(Role::SuperAdmin.can_manage(Role::Admin));
        assert!(Role::Admin.can_manage(Role::User));
        assert!(!Role::Admin.can_manage(Role::Admin));
        assert!(!Role::Admin.can_manage(Role::SuperAdmin));
        assert!(!Role::User.can_manage(Role::User));
    }

    #[test]
    fn assignment_rules() {
        assert!(Role::SuperAdmin.can_assign(Role::Admin));
        assert!(Role::Admin.can_assign(Role::User));
        assert!(!Role::Admin.can_assign(Role::Admin));
        assert!(!Role::User.can_assign(Role::User));
    }

    #[test]
    fn admin_roles() {
        assert!(ADMIN_ROLES.contains(&Role::Admin));
        assert!(ADMIN_ROLES.contains(&Role::SuperAdmin));
        assert!(!ADMIN_ROLES.contains(&Role::User));
        assert!(Role::Admin.is_admin());
        assert!(!Role::User.is_admin());
    }
}
