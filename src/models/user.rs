use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::audit::Auditable;
use crate::authz::{Action, InvalidEnumInput, Resource, Role};
use crate::errors::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    #[default]
    Active,
    Blocked,
    Pending,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Blocked => "blocked",
            UserStatus::Pending => "pending",
        }
    }
}

impl FromStr for UserStatus {
    type Err = InvalidEnumInput;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(UserStatus::Active),
            "blocked" => Ok(UserStatus::Blocked),
            "pending" => Ok(UserStatus::Pending),
            other => Err(InvalidEnumInput::new("user status", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub status: UserStatus,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Auditable for User {
    fn resource() -> Resource {
        Resource::Users
    }

    fn record_id(&self) -> String {
        self.id.to_string()
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbUser {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub status: String,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl DbUser {
    pub const COLUMNS: &'static str =
        "id, name, email, password_hash, role, status, last_login, created_at, updated_at, deleted_at";
}

impl TryFrom<DbUser> for User {
    type Error = AppError;

    fn try_from(value: DbUser) -> Result<Self, Self::Error> {
        let id = Uuid::parse_str(&value.id)
            .map_err(|e| AppError::internal(format!("invalid user id {}: {}", value.id, e)))?;
        let role = value
            .role
            .parse::<Role>()
            .map_err(|e| AppError::internal(format!("user {id}: {e}")))?;
        let status = value
            .status
            .parse::<UserStatus>()
            .map_err(|e| AppError::internal(format!("user {id}: {e}")))?;

        Ok(User {
            id,
            name: value.name,
            email: value.email,
            role,
            status,
            last_login: value.last_login,
            created_at: value.created_at,
            updated_at: value.updated_at,
            deleted_at: value.deleted_at,
        })
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RegisterRequest {
    #[schema(example = "Ada Lovelace")]
    pub name: String,
    #[schema(example = "ada@example.com")]
    pub email: String,
    #[schema(example = "S3cureP@ssw0rd")]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LoginRequest {
    #[schema(example = "ada@example.com")]
    pub email: String,
    #[schema(example = "S3cureP@ssw0rd")]
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuthResponse {
    pub token: String,
    pub user: User,
}

/// Admin provisioning of an account with an explicit role
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UserCreateRequest {
    #[schema(example = "Grace Hopper")]
    pub name: String,
    #[schema(example = "grace@example.com")]
    pub email: String,
    #[schema(example = "S3cureP@ssw0rd")]
    pub password: String,
    pub role: Option<Role>,
}

#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct UserUpdateRequest {
    #[schema(example = "Ada King")]
    pub name: Option<String>,
    pub role: Option<Role>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct UserListQuery {
    pub role: Option<Role>,
    pub status: Option<UserStatus>,
    /// Case-insensitive match against name or email
    pub q: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PermissionSet {
    pub resource: Resource,
    pub actions: Vec<Action>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EffectivePermissions {
    pub user_id: Uuid,
    pub role: Role,
    pub permissions: Vec<PermissionSet>,
}
