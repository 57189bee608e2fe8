use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use uuid::Uuid;

use crate::app::AppState;
use crate::audit::{audit_change, audit_removal};
use crate::authz::{Action, Principal, Resource, ResourceContext, Role};
use crate::errors::{AppError, AppResult, ValidJson};
use crate::models::pet::PetStatus;
use crate::models::pet_match::{
    DbPetMatch, MatchCreateRequest, MatchListQuery, MatchStatus, MatchUpdateRequest, PetMatch,
};
use crate::routes::pets::fetch_pet;
use crate::routes::{authorize, authorize_scoped};
use crate::utils::utc_now;

#[utoipa::path(
    get,
    path = "/matches",
    tag = "Matches",
    params(MatchListQuery),
    responses((status = 200, description = "List matches", body = [PetMatch]))
)]
pub async fn list_matches(
    State(state): State<AppState>,
    principal: Principal,
    Query(query): Query<MatchListQuery>,
) -> AppResult<Json<Vec<PetMatch>>> {
    authorize(&state, &principal, Action::Read, &ResourceContext::new(Resource::Matches))?;

    let mut qb: QueryBuilder<Sqlite> =
        QueryBuilder::new(format!("SELECT {} FROM matches WHERE 1 = 1", DbPetMatch::COLUMNS));
    if let Some(status) = query.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(pet_id) = query.pet_id {
        let pet_id = pet_id.to_string();
        qb.push(" AND (lost_pet_id = ")
            .push_bind(pet_id.clone())
            .push(" OR found_pet_id = ")
            .push_bind(pet_id)
            .push(")");
    }
    qb.push(" ORDER BY confidence_score DESC, created_at DESC");

    let matches = qb
        .build_query_as::<DbPetMatch>()
        .fetch_all(&state.pool)
        .await?
        .into_iter()
        .map(PetMatch::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(matches))
}

#[utoipa::path(
    get,
    path = "/matches/{id}",
    tag = "Matches",
    params(("id" = Uuid, Path, description = "Match id")),
    responses(
        (status = 200, description = "Match detail", body = PetMatch),
        (status = 404, description = "Match not found")
    )
)]
pub async fn get_match(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> AppResult<Json<PetMatch>> {
    let pet_match = fetch_match(&state.pool, id).await?;
    let ctx = match_context(&state.pool, &pet_match).await?;
    authorize(&state, &principal, Action::Read, &ctx)?;

    Ok(Json(pet_match))
}

#[utoipa::path(
    post,
    path = "/matches",
    tag = "Matches",
    request_body = MatchCreateRequest,
    responses(
        (status = 201, description = "Match recorded", body = PetMatch),
        (status = 400, description = "Pets are not a lost/found pair"),
        (status = 403, description = "Role may not create matches"),
        (status = 409, description = "Pair already matched")
    )
)]
pub async fn create_match(
    State(state): State<AppState>,
    principal: Principal,
    ValidJson(payload): ValidJson<MatchCreateRequest>,
) -> AppResult<(StatusCode, Json<PetMatch>)> {
    authorize(&state, &principal, Action::Create, &ResourceContext::new(Resource::Matches))?;
    payload.validate()?;

    let lost = fetch_pet(&state.pool, payload.lost_pet_id).await?;
    let found = fetch_pet(&state.pool, payload.found_pet_id).await?;
    if lost.status != PetStatus::Lost {
        return Err(AppError::bad_request("lost_pet_id must reference a lost report"));
    }
    if found.status != PetStatus::Found {
        return Err(AppError::bad_request("found_pet_id must reference a found report"));
    }

    let existing: i64 =
        sqlx::query_scalar("SELECT COUNT(1) FROM matches WHERE lost_pet_id = ? AND found_pet_id = ?")
            .bind(lost.id.to_string())
            .bind(found.id.to_string())
            .fetch_one(&state.pool)
            .await?;
    if existing > 0 {
        return Err(AppError::conflict("these pets are already matched"));
    }

    let now = utc_now();
    let match_id = Uuid::new_v4();

    sqlx::query(
        "INSERT INTO matches (id, lost_pet_id, found_pet_id, confidence_score, status, created_by, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(match_id.to_string())
    .bind(lost.id.to_string())
    .bind(found.id.to_string())
    .bind(payload.confidence_score)
    .bind(MatchStatus::Pending.as_str())
    .bind(principal.user_id.to_string())
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let pet_match = fetch_match(&state.pool, match_id).await?;
    audit_change(state.audit.as_ref(), principal.actor_id(), Action::Create, None, &pet_match);

    Ok((StatusCode::CREATED, Json(pet_match)))
}

#[utoipa::path(
    put,
    path = "/matches/{id}",
    tag = "Matches",
    params(("id" = Uuid, Path, description = "Match id")),
    request_body = MatchUpdateRequest,
    responses(
        (status = 200, description = "Match status changed", body = PetMatch),
        (status = 403, description = "Not a party to the match and not a moderator")
    )
)]
pub async fn update_match(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
    ValidJson(payload): ValidJson<MatchUpdateRequest>,
) -> AppResult<Json<PetMatch>> {
    let old = fetch_match(&state.pool, id).await?;
    let ctx = match_context(&state.pool, &old).await?;
    authorize_scoped(&state, &principal, Action::Update, &ctx, &[Role::Moderator, Role::Admin])?;

    let mut pet_match = old.clone();
    pet_match.status = payload.status;
    pet_match.updated_at = utc_now();

    sqlx::query("UPDATE matches SET status = ?, updated_at = ? WHERE id = ?")
        .bind(pet_match.status.as_str())
        .bind(pet_match.updated_at)
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;

    audit_change(state.audit.as_ref(), principal.actor_id(), Action::Update, Some(&old), &pet_match);
    Ok(Json(pet_match))
}

#[utoipa::path(
    delete,
    path = "/matches/{id}",
    tag = "Matches",
    params(("id" = Uuid, Path, description = "Match id")),
    responses(
        (status = 204, description = "Match removed"),
        (status = 403, description = "Role may not delete matches")
    )
)]
pub async fn delete_match(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let pet_match = fetch_match(&state.pool, id).await?;
    let ctx = match_context(&state.pool, &pet_match).await?;
    authorize(&state, &principal, Action::Delete, &ctx)?;

    sqlx::query("DELETE FROM matches WHERE id = ?")
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;

    audit_removal(state.audit.as_ref(), principal.actor_id(), Action::Delete, &pet_match);
    Ok(StatusCode::NO_CONTENT)
}

/// A match belongs to the owners of both of its pets.
async fn match_context(pool: &SqlitePool, pet_match: &PetMatch) -> AppResult<ResourceContext> {
    let owners: Vec<String> = sqlx::query_scalar("SELECT owner_id FROM pets WHERE id IN (?, ?)")
        .bind(pet_match.lost_pet_id.to_string())
        .bind(pet_match.found_pet_id.to_string())
        .fetch_all(pool)
        .await?;

    let mut ctx = ResourceContext::new(Resource::Matches).with_record(pet_match.id);
    for owner in owners {
        let owner = Uuid::parse_str(&owner)
            .map_err(|e| AppError::internal(format!("invalid owner id {owner}: {e}")))?;
        ctx = ctx.owned_by(owner);
    }
    Ok(ctx)
}

async fn fetch_match(pool: &SqlitePool, match_id: Uuid) -> AppResult<PetMatch> {
    sqlx::query_as::<_, DbPetMatch>(&format!(
        "SELECT {} FROM matches WHERE id = ?",
        DbPetMatch::COLUMNS
    ))
    .bind(match_id.to_string())
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("match not found"))?
    .try_into()
}
