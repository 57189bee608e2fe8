use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use uuid::Uuid;

use crate::app::AppState;
use crate::audit::{audit_change, audit_removal};
use crate::authz::{Action, Principal, Resource, ResourceContext, Role};
use crate::errors::{AppError, AppResult, ValidJson};
use crate::models::user::{DbUser, User, UserCreateRequest, UserListQuery, UserStatus, UserUpdateRequest};
use crate::routes::{authorize, authorize_scoped};
use crate::utils::{contains_pattern, hash_password, normalize_email, utc_now};

#[utoipa::path(
    get,
    path = "/users",
    tag = "Users",
    params(UserListQuery),
    responses(
        (status = 200, description = "List accounts", body = [User]),
        (status = 403, description = "Role may not read users")
    )
)]
pub async fn list_users(
    State(state): State<AppState>,
    principal: Principal,
    Query(query): Query<UserListQuery>,
) -> AppResult<Json<Vec<User>>> {
    authorize(&state, &principal, Action::Read, &ResourceContext::new(Resource::Users))?;

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
        "SELECT {} FROM users WHERE deleted_at IS NULL",
        DbUser::COLUMNS
    ));
    if let Some(role) = query.role {
        qb.push(" AND role = ").push_bind(role.as_str());
    }
    if let Some(status) = query.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(q) = query.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        let pattern = contains_pattern(q);
        qb.push(" AND (lower(name) LIKE ")
            .push_bind(pattern.clone())
            .push(r" ESCAPE '\' OR lower(email) LIKE ")
            .push_bind(pattern)
            .push(r" ESCAPE '\')");
    }
    qb.push(" ORDER BY created_at DESC");

    let users = qb
        .build_query_as::<DbUser>()
        .fetch_all(&state.pool)
        .await?
        .into_iter()
        .map(User::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(users))
}

#[utoipa::path(
    get,
    path = "/users/{id}",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User id")),
    responses(
        (status = 200, description = "Account detail", body = User),
        (status = 404, description = "Account not found")
    )
)]
pub async fn get_user(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> AppResult<Json<User>> {
    let ctx = ResourceContext::new(Resource::Users).with_record(id).owned_by(id);
    authorize(&state, &principal, Action::Read, &ctx)?;

    Ok(Json(fetch_user(&state.pool, id).await?))
}

#[utoipa::path(
    post,
    path = "/users",
    tag = "Users",
    request_body = UserCreateRequest,
    responses(
        (status = 201, description = "Account provisioned", body = User),
        (status = 403, description = "Role may not create users"),
        (status = 409, description = "Email already in use")
    )
)]
pub async fn create_user(
    State(state): State<AppState>,
    principal: Principal,
    ValidJson(payload): ValidJson<UserCreateRequest>,
) -> AppResult<(StatusCode, Json<User>)> {
    authorize(&state, &principal, Action::Create, &ResourceContext::new(Resource::Users))?;

    let role = payload.role.unwrap_or_default();
    let user = insert_user(&state.pool, &payload.name, &payload.email, &payload.password, role).await?;
    audit_change(state.audit.as_ref(), principal.actor_id(), Action::Create, None, &user);

    tracing::info!(user_id = %user.id, role = %user.role, "account provisioned");
    Ok((StatusCode::CREATED, Json(user)))
}

#[utoipa::path(
    put,
    path = "/users/{id}",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User id")),
    request_body = UserUpdateRequest,
    responses(
        (status = 200, description = "Account updated", body = User),
        (status = 403, description = "Not permitted")
    )
)]
pub async fn update_user(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
    ValidJson(payload): ValidJson<UserUpdateRequest>,
) -> AppResult<Json<User>> {
    let ctx = ResourceContext::new(Resource::Users).with_record(id).owned_by(id);
    authorize_scoped(&state, &principal, Action::Update, &ctx, &[Role::Admin])?;

    // assigning a role is provisioning, not a profile edit
    if payload.role.is_some() {
        let provisioning = ResourceContext::new(Resource::Users).with_record(id);
        authorize(&state, &principal, Action::Create, &provisioning)?;
    }

    let old = fetch_user(&state.pool, id).await?;
    let mut user = old.clone();

    if let Some(name) = payload.name {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::bad_request("name must not be empty"));
        }
        user.name = name;
    }
    if let Some(role) = payload.role {
        user.role = role;
    }
    user.updated_at = utc_now();

    sqlx::query("UPDATE users SET name = ?, role = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL")
        .bind(&user.name)
        .bind(user.role.as_str())
        .bind(user.updated_at)
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;

    audit_change(state.audit.as_ref(), principal.actor_id(), Action::Update, Some(&old), &user);
    if old.role != user.role {
        tracing::info!(user_id = %id, from = %old.role, to = %user.role, "role changed");
    }

    Ok(Json(user))
}

#[utoipa::path(
    delete,
    path = "/users/{id}",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User id")),
    responses(
        (status = 204, description = "Account soft deleted"),
        (status = 403, description = "Role may not delete users")
    )
)]
pub async fn delete_user(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let ctx = ResourceContext::new(Resource::Users).with_record(id);
    authorize(&state, &principal, Action::Delete, &ctx)?;
    if id == principal.user_id {
        return Err(AppError::bad_request("an account cannot delete itself"));
    }

    let user = fetch_user(&state.pool, id).await?;
    let now = utc_now();
    sqlx::query("UPDATE users SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL")
        .bind(now)
        .bind(now)
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;

    audit_removal(state.audit.as_ref(), principal.actor_id(), Action::Delete, &user);
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/users/{id}/block",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User id")),
    responses(
        (status = 200, description = "Account blocked", body = User),
        (status = 403, description = "Role may not block users")
    )
)]
pub async fn block_user(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> AppResult<Json<User>> {
    set_status(&state, &principal, id, Action::Block, UserStatus::Blocked).await
}

#[utoipa::path(
    post,
    path = "/users/{id}/unblock",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User id")),
    responses(
        (status = 200, description = "Account reactivated", body = User),
        (status = 403, description = "Role may not unblock users")
    )
)]
pub async fn unblock_user(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> AppResult<Json<User>> {
    set_status(&state, &principal, id, Action::Unblock, UserStatus::Active).await
}

async fn set_status(
    state: &AppState,
    principal: &Principal,
    id: Uuid,
    action: Action,
    status: UserStatus,
) -> AppResult<Json<User>> {
    let ctx = ResourceContext::new(Resource::Users).with_record(id);
    authorize(state, principal, action, &ctx)?;
    if id == principal.user_id {
        return Err(AppError::bad_request(format!("an account cannot {action} itself")));
    }

    let old = fetch_user(&state.pool, id).await?;
    let mut user = old.clone();
    user.status = status;
    user.updated_at = utc_now();

    sqlx::query("UPDATE users SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(user.updated_at)
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;

    audit_change(state.audit.as_ref(), principal.actor_id(), action, Some(&old), &user);
    Ok(Json(user))
}

/// Creates an active account. Shared by self-registration and admin provisioning.
pub(crate) async fn insert_user(
    pool: &SqlitePool,
    name: &str,
    email: &str,
    password: &str,
    role: Role,
) -> AppResult<User> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("name must not be empty"));
    }
    let email = normalize_email(email)?;
    ensure_email_available(pool, &email).await?;

    let password_hash = hash_password(password)?;
    let now = utc_now();
    let user_id = Uuid::new_v4();

    sqlx::query(
        "INSERT INTO users (id, name, email, password_hash, role, status, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(user_id.to_string())
    .bind(name)
    .bind(&email)
    .bind(password_hash)
    .bind(role.as_str())
    .bind(UserStatus::Active.as_str())
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .map_err(|err| {
        // a concurrent insert won the race past the availability check
        let duplicate = err.as_database_error().is_some_and(|db| db.is_unique_violation());
        if duplicate {
            AppError::conflict("email already in use")
        } else {
            AppError::from(err)
        }
    })?;

    fetch_user(pool, user_id).await
}

async fn ensure_email_available(pool: &SqlitePool, email: &str) -> AppResult<()> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM users WHERE email = ? AND deleted_at IS NULL")
        .bind(email)
        .fetch_one(pool)
        .await?;

    if count > 0 {
        return Err(AppError::conflict("email already in use"));
    }

    Ok(())
}

pub(crate) async fn fetch_db_user(pool: &SqlitePool, user_id: Uuid) -> AppResult<DbUser> {
    sqlx::query_as::<_, DbUser>(&format!(
        "SELECT {} FROM users WHERE id = ? AND deleted_at IS NULL",
        DbUser::COLUMNS
    ))
    .bind(user_id.to_string())
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("user not found"))
}

pub(crate) async fn fetch_user(pool: &SqlitePool, user_id: Uuid) -> AppResult<User> {
    fetch_db_user(pool, user_id).await?.try_into()
}
