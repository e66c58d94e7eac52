use serde::{Deserialize, Serialize};
use std::fmt;

/// Role as supplied by the auth collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Startup,
    FacilityAdmin,
    ResourceAdmin,
}

impl Role {
    pub fn is_admin(&self) -> bool {
        matches!(self, Role::FacilityAdmin | Role::ResourceAdmin)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Startup => "startup",
            Role::FacilityAdmin => "facility_admin",
            Role::ResourceAdmin => "resource_admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "startup" => Ok(Role::Startup),
            "facility_admin" => Ok(Role::FacilityAdmin),
            "resource_admin" => Ok(Role::ResourceAdmin),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// User aggregate: identity, role and the nominal token allocation.
///
/// Invariants:
/// - `tokens_given` is the only stored token figure; consumption and the
///   remaining balance are always derived from bookings (see `ledger`)
/// - Users are never removed while bookings reference them
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub name: String,
    pub role: Role,
    pub tokens_given: u64,
}

impl User {
    pub fn new(id: String, name: String, role: Role) -> Self {
        User {
            id,
            name,
            role,
            tokens_given: 0,
        }
    }

    pub fn with_tokens(id: String, name: String, role: Role, tokens_given: u64) -> Self {
        User {
            id,
            name,
            role,
            tokens_given,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }

    /// Raise the allocation. Returns the new allocation.
    pub fn grant(&mut self, amount: u64) -> u64 {
        self.tokens_given = self.tokens_given.saturating_add(amount);
        self.tokens_given
    }

    /// Lower the allocation.
    ///
    /// Returns Err if the allocation would drop below zero.
    pub fn revoke(&mut self, amount: u64) -> Result<u64, String> {
        if self.tokens_given < amount {
            return Err(format!(
                "Allocation too small: have {}, removing {}",
                self.tokens_given, amount
            ));
        }
        self.tokens_given -= amount;
        Ok(self.tokens_given)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_creation() {
        let user = User::new("acme".to_string(), "Acme".to_string(), Role::Startup);
        assert_eq!(user.tokens_given, 0);
        assert!(!user.is_admin());
    }

    #[test]
    fn test_admin_roles() {
        assert!(Role::FacilityAdmin.is_admin());
        assert!(Role::ResourceAdmin.is_admin());
        assert!(!Role::Startup.is_admin());
    }

    #[test]
    fn test_grant_and_revoke() {
        let mut user = User::with_tokens("acme".to_string(), "Acme".to_string(), Role::Startup, 40);
        assert_eq!(user.grant(10), 50);
        assert_eq!(user.revoke(20), Ok(30));
        assert!(user.revoke(31).is_err());
        assert_eq!(user.tokens_given, 30); // unchanged
    }

    #[test]
    fn test_role_parse() {
        assert_eq!("facility_admin".parse::<Role>(), Ok(Role::FacilityAdmin));
        assert!("amc_admin".parse::<Role>().is_err());
    }
}
