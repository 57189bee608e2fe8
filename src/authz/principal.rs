use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{Resource, Role};
use crate::app::AppState;
use crate::errors::{AppError, AppResult};
use crate::jwt::AuthUser;
use crate::models::user::UserStatus;

/// Principal represents the authenticated account with its current role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: Uuid,
    pub role: Role,
    pub status: UserStatus,
}

impl Principal {
    pub fn new(user_id: Uuid, role: Role, status: UserStatus) -> Self {
        Self {
            user_id,
            role,
            status,
        }
    }

    pub fn actor_id(&self) -> String {
        self.user_id.to_string()
    }

    /// Loads role and status fresh from the store, so role changes apply on the next request.
    pub async fn load(pool: &SqlitePool, user_id: Uuid) -> AppResult<Self> {
        let row: Option<(String, String)> = sqlx::query_as(
            "SELECT role, status FROM users WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(user_id.to_string())
        .fetch_optional(pool)
        .await?;

        let (role, status) = row.ok_or_else(|| AppError::unauthorized("account not found"))?;

        // stored values outside the enums never degrade into a default role
        let role: Role = role
            .parse()
            .map_err(|err| AppError::internal(format!("user {user_id}: {err}")))?;
        let status: UserStatus = status
            .parse()
            .map_err(|err| AppError::internal(format!("user {user_id}: {err}")))?;

        Ok(Self::new(user_id, role, status))
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Principal {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let auth = AuthUser::from_request_parts(parts, state).await?;
        let principal = Principal::load(&state.pool, auth.user_id).await?;

        if principal.status == UserStatus::Blocked {
            tracing::warn!(user_id = %principal.user_id, "request from blocked account rejected");
            return Err(AppError::forbidden("account is blocked"));
        }

        Ok(principal)
    }
}

/// The record a decision is about, with the ids of the accounts that own it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceContext {
    pub resource: Resource,
    pub record_id: Option<String>,
    pub owners: Vec<Uuid>,
}

impl ResourceContext {
    pub fn new(resource: Resource) -> Self {
        Self {
            resource,
            record_id: None,
            owners: Vec::new(),
        }
    }

    pub fn with_record(mut self, record_id: impl ToString) -> Self {
        self.record_id = Some(record_id.to_string());
        self
    }

    pub fn owned_by(mut self, owner: Uuid) -> Self {
        self.owners.push(owner);
        self
    }

    pub fn is_owner(&self, user_id: Uuid) -> bool {
        self.owners.contains(&user_id)
    }
}

/// Instance scope for mutations on someone else's record: the actor must own it
/// or hold one of the listed roles.
pub fn ensure_owner_or_role(principal: &Principal, is_owner: bool, roles: &[Role]) -> AppResult<()> {
    if is_owner || roles.contains(&principal.role) {
        return Ok(());
    }

    Err(AppError::forbidden(format!(
        "{} may only modify records it owns",
        principal.role
    )))
}
