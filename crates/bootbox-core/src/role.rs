//! Node Role

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Role a node plays for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Holds the one-time token and answers claims
    Issuer,
    /// Discovers the issuer and claims the token
    Claimant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Issuer => write!(f, "issuer"),
            Role::Claimant => write!(f, "claimant"),
        }
    }
}

/// Returned when a role string is neither `issuer` nor `claimant`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role '{0}', expected 'issuer' or 'claimant'")]
pub struct ParseRoleError(pub String);

impl FromStr for Role {
    type Err = ParseRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "issuer" | "bootbox" => Ok(Role::Issuer),
            "claimant" | "worker" => Ok(Role::Claimant),
            other => Err(ParseRoleError(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse() {
        assert_eq!("issuer".parse::<Role>(), Ok(Role::Issuer));
        assert_eq!(" Claimant ".parse::<Role>(), Ok(Role::Claimant));
        assert_eq!("worker".parse::<Role>(), Ok(Role::Claimant));
        assert!("leader".parse::<Role>().is_err());
    }

    #[test]
    fn test_role_display_matches_parse() {
        for role in [Role::Issuer, Role::Claimant] {
            assert_eq!(role.to_string().parse::<Role>(), Ok(role));
        }
    }
}
