use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use crate::app::AppState;
use crate::audit::audit_change;
use crate::authz::{effective_permissions, Action, Principal, Role};
use crate::errors::{AppError, AppResult, ValidJson};
use crate::models::user::{
    AuthResponse, DbUser, EffectivePermissions, LoginRequest, PermissionSet, RegisterRequest, User, UserStatus,
};
use crate::routes::users::{fetch_user, insert_user};
use crate::utils::{utc_now, verify_password};

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    message: String,
}

#[utoipa::path(
    post,
    path = "/auth/register",
    tag = "Auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User registered", body = AuthResponse),
        (status = 400, description = "Invalid name, email or password"),
        (status = 409, description = "Email already in use")
    )
)]
pub async fn register(
    State(state): State<AppState>,
    ValidJson(payload): ValidJson<RegisterRequest>,
) -> AppResult<(StatusCode, Json<AuthResponse>)> {
    // self-registration always yields the default role
    let user = insert_user(&state.pool, &payload.name, &payload.email, &payload.password, Role::default()).await?;
    audit_change(state.audit.as_ref(), user.id.to_string(), Action::Create, None, &user);

    let token = state.jwt.encode(user.id)?;
    tracing::info!(user_id = %user.id, "user registered");

    Ok((StatusCode::CREATED, Json(AuthResponse { token, user })))
}

#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "Auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials"),
        (status = 403, description = "Account is blocked")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    ValidJson(payload): ValidJson<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    let email = payload.email.trim().to_lowercase();
    let db_user = sqlx::query_as::<_, DbUser>(&format!(
        "SELECT {} FROM users WHERE email = ? AND deleted_at IS NULL",
        DbUser::COLUMNS
    ))
    .bind(&email)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::unauthorized("invalid credentials"))?;

    if !verify_password(&payload.password, &db_user.password_hash)? {
        return Err(AppError::unauthorized("invalid credentials"));
    }

    let mut user: User = db_user.try_into()?;
    if user.status == UserStatus::Blocked {
        tracing::warn!(user_id = %user.id, "login attempt on blocked account");
        return Err(AppError::forbidden("account is blocked"));
    }

    let now = utc_now();
    sqlx::query("UPDATE users SET last_login = ? WHERE id = ?")
        .bind(now)
        .bind(user.id.to_string())
        .execute(&state.pool)
        .await?;
    user.last_login = Some(now);

    let token = state.jwt.encode(user.id)?;
    Ok(Json(AuthResponse { token, user }))
}

#[utoipa::path(
    get,
    path = "/auth/me",
    tag = "Auth",
    responses((status = 200, description = "Current user", body = User))
)]
pub async fn me(State(state): State<AppState>, principal: Principal) -> AppResult<Json<User>> {
    Ok(Json(fetch_user(&state.pool, principal.user_id).await?))
}

#[utoipa::path(
    post,
    path = "/auth/logout",
    tag = "Auth",
    responses((status = 200, description = "Logout acknowledged", body = MessageResponse))
)]
pub async fn logout(_principal: Principal) -> AppResult<Json<MessageResponse>> {
    Ok(Json(MessageResponse {
        message: "Logged out".to_string(),
    }))
}

#[utoipa::path(
    get,
    path = "/auth/permissions",
    tag = "Auth",
    responses((status = 200, description = "Matrix row for the caller's role", body = EffectivePermissions))
)]
pub async fn permissions(principal: Principal) -> AppResult<Json<EffectivePermissions>> {
    let permissions = effective_permissions(principal.role)
        .into_iter()
        .map(|(resource, actions)| PermissionSet { resource, actions })
        .collect();

    Ok(Json(EffectivePermissions {
        user_id: principal.user_id,
        role: principal.role,
        permissions,
    }))
}
