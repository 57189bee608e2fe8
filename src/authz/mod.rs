//! Authorization module - permission matrix, ownership overrides and principals
//!
//! This module implements the PetConnect access model:
//! - Closed `Role` / `Resource` / `Action` enums
//! - A static permission matrix (`matrix`)
//! - Ordered ownership override rules evaluated before the matrix (`evaluator`)
//! - Request principals resolved from the JWT subject (`principal`)

mod evaluator;
mod matrix;
mod principal;

pub use evaluator::{
    can_global, can_on_own_resource, check_permission, AccessControl, OverrideRule,
    PolicyEvaluator,
};
pub use matrix::{allowed_actions, effective_permissions};
pub use principal::{ensure_owner_or_role, Principal, ResourceContext};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Raised when a string does not name a member of one of the closed enums.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid {kind}: {value:?}")]
pub struct InvalidEnumInput {
    pub kind: &'static str,
    pub value: String,
}

impl InvalidEnumInput {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Privilege tier held by an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Default for every newly created account
    #[default]
    User,
    Moderator,
    Admin,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::User, Role::Moderator, Role::Admin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Moderator => "moderator",
            Role::Admin => "admin",
        }
    }
}

impl FromStr for Role {
    type Err = InvalidEnumInput;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "moderator" => Ok(Role::Moderator),
            "admin" => Ok(Role::Admin),
            other => Err(InvalidEnumInput::new("role", other)),
        }
    }
}

/// Protected collection of records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Users,
    Pets,
    Matches,
    AuditLogs,
}

impl Resource {
    pub const ALL: [Resource; 4] = [
        Resource::Users,
        Resource::Pets,
        Resource::Matches,
        Resource::AuditLogs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::Users => "users",
            Resource::Pets => "pets",
            Resource::Matches => "matches",
            Resource::AuditLogs => "audit_logs",
        }
    }
}

impl FromStr for Resource {
    type Err = InvalidEnumInput;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "users" => Ok(Resource::Users),
            "pets" => Ok(Resource::Pets),
            "matches" => Ok(Resource::Matches),
            "audit_logs" => Ok(Resource::AuditLogs),
            other => Err(InvalidEnumInput::new("resource", other)),
        }
    }
}

/// Operation category checked against the matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Read,
    Update,
    Delete,
    Block,
    Unblock,
}

impl Action {
    pub const ALL: [Action; 6] = [
        Action::Create,
        Action::Read,
        Action::Update,
        Action::Delete,
        Action::Block,
        Action::Unblock,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Read => "read",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::Block => "block",
            Action::Unblock => "unblock",
        }
    }
}

impl FromStr for Action {
    type Err = InvalidEnumInput;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Action::Create),
            "read" => Ok(Action::Read),
            "update" => Ok(Action::Update),
            "delete" => Ok(Action::Delete),
            "block" => Ok(Action::Block),
            "unblock" => Ok(Action::Unblock),
            other => Err(InvalidEnumInput::new("action", other)),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_role_is_user() {
        assert_eq!(Role::default(), Role::User);
    }

    #[test]
    fn test_parse_round_trips_as_str() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        for resource in Resource::ALL {
            assert_eq!(resource.as_str().parse::<Resource>().unwrap(), resource);
        }
        for action in Action::ALL {
            assert_eq!(action.as_str().parse::<Action>().unwrap(), action);
        }
    }

    #[test]
    fn test_unknown_values_are_rejected() {
        let err = "superuser".parse::<Role>().unwrap_err();
        assert_eq!(err.kind, "role");
        assert_eq!(err.value, "superuser");

        assert!("Pets".parse::<Resource>().is_err());
        assert!("approve".parse::<Action>().is_err());
        assert!("".parse::<Role>().is_err());
    }

    #[test]
    fn test_serde_uses_wire_names() {
        assert_eq!(serde_json::to_string(&Resource::AuditLogs).unwrap(), "\"audit_logs\"");
        assert_eq!(serde_json::to_string(&Role::Moderator).unwrap(), "\"moderator\"");
        let action: Action = serde_json::from_str("\"unblock\"").unwrap();
        assert_eq!(action, Action::Unblock);
        assert!(serde_json::from_str::<Role>("\"root\"").is_err());
    }
}
