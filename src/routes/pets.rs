use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use uuid::Uuid;

use crate::app::AppState;
use crate::audit::{audit_change, audit_removal};
use crate::authz::{Action, Principal, Resource, ResourceContext, Role};
use crate::errors::{parse_json, AppError, AppResult, ValidJson};
use crate::models::pet::{
    DbPet, Pet, PetCreateRequest, PetFilters, PetListResponse, PetStatus, PetUpdateRequest, UnblockPetRequest,
};
use crate::routes::users::fetch_user;
use crate::routes::{authorize, authorize_scoped};
use crate::utils::{contains_pattern, utc_now};

#[utoipa::path(
    get,
    path = "/pets",
    tag = "Pets",
    params(PetFilters),
    responses((status = 200, description = "Newest reports first", body = PetListResponse))
)]
pub async fn list_pets(
    State(state): State<AppState>,
    Query(filters): Query<PetFilters>,
) -> AppResult<Json<PetListResponse>> {
    let mut qb: QueryBuilder<Sqlite> =
        QueryBuilder::new(format!("SELECT {} FROM pets WHERE 1 = 1", DbPet::COLUMNS));

    match filters.status {
        Some(status) => {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        // blocked listings stay hidden unless asked for explicitly
        None => {
            qb.push(" AND status != ").push_bind(PetStatus::Blocked.as_str());
        }
    }
    if let Some(pet_type) = filters.pet_type.as_deref().filter(|v| !v.is_empty()) {
        qb.push(" AND type = ").push_bind(pet_type.to_string());
    }
    if let Some(breed) = filters.breed.as_deref().filter(|v| !v.is_empty()) {
        qb.push(" AND lower(breed) LIKE ")
            .push_bind(contains_pattern(breed))
            .push(r" ESCAPE '\'");
    }
    if let Some(location) = filters.location.as_deref().filter(|v| !v.is_empty()) {
        qb.push(" AND lower(location) LIKE ")
            .push_bind(contains_pattern(location))
            .push(r" ESCAPE '\'");
    }
    if let Some(owner_id) = filters.owner_id {
        qb.push(" AND owner_id = ").push_bind(owner_id.to_string());
    }
    if let Some(after) = filters.reported_after {
        qb.push(" AND reported_date >= ").push_bind(after);
    }
    if let Some(before) = filters.reported_before {
        qb.push(" AND reported_date <= ").push_bind(before);
    }

    qb.push(" ORDER BY reported_date DESC LIMIT ")
        .push_bind(filters.page_size())
        .push(" OFFSET ")
        .push_bind(filters.page_offset());

    let pets = qb
        .build_query_as::<DbPet>()
        .fetch_all(&state.pool)
        .await?
        .into_iter()
        .map(Pet::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    let count = pets.len();
    Ok(Json(PetListResponse {
        pets,
        count,
        message: format!("Found {count} pets"),
    }))
}

#[utoipa::path(
    get,
    path = "/pets/{id}",
    tag = "Pets",
    params(("id" = Uuid, Path, description = "Pet id")),
    responses(
        (status = 200, description = "Pet detail", body = Pet),
        (status = 404, description = "Pet not found")
    )
)]
pub async fn get_pet(State(state): State<AppState>, Path(id): Path<Uuid>) -> AppResult<Json<Pet>> {
    Ok(Json(fetch_pet(&state.pool, id).await?))
}

#[utoipa::path(
    post,
    path = "/pets",
    tag = "Pets",
    request_body = PetCreateRequest,
    responses(
        (status = 201, description = "Report created", body = Pet),
        (status = 400, description = "Validation failed"),
        (status = 403, description = "Role may not create pets")
    )
)]
pub async fn create_pet(
    State(state): State<AppState>,
    principal: Principal,
    ValidJson(payload): ValidJson<PetCreateRequest>,
) -> AppResult<(StatusCode, Json<Pet>)> {
    authorize(&state, &principal, Action::Create, &ResourceContext::new(Resource::Pets))?;
    payload.validate()?;

    let owner = fetch_user(&state.pool, principal.user_id).await?;
    let owner_name = payload.owner_name.clone().filter(|v| !v.trim().is_empty()).unwrap_or(owner.name);
    let owner_email = payload.owner_email.clone().filter(|v| !v.trim().is_empty()).unwrap_or(owner.email);

    let now = utc_now();
    let pet_id = Uuid::new_v4();

    sqlx::query(
        r#"
        INSERT INTO pets (id, name, type, breed, color, gender, size, age, description, status, owner_id, owner_name, owner_email, location, lat, lng, reported_date, image_url, microchipped, collar, distinctive_features, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(pet_id.to_string())
    .bind(payload.name.trim())
    .bind(payload.pet_type.trim())
    .bind(payload.breed.trim())
    .bind(&payload.color)
    .bind(&payload.gender)
    .bind(&payload.size)
    .bind(&payload.age)
    .bind(&payload.description)
    .bind(payload.status.as_str())
    .bind(principal.user_id.to_string())
    .bind(&owner_name)
    .bind(&owner_email)
    .bind(payload.location.trim())
    .bind(payload.coordinates.lat)
    .bind(payload.coordinates.lng)
    .bind(now)
    .bind(&payload.image_url)
    .bind(payload.microchipped)
    .bind(payload.collar)
    .bind(&payload.distinctive_features)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let pet = fetch_pet(&state.pool, pet_id).await?;
    audit_change(state.audit.as_ref(), principal.actor_id(), Action::Create, None, &pet);

    Ok((StatusCode::CREATED, Json(pet)))
}

#[utoipa::path(
    put,
    path = "/pets/{id}",
    tag = "Pets",
    params(("id" = Uuid, Path, description = "Pet id")),
    request_body = PetUpdateRequest,
    responses(
        (status = 200, description = "Report updated", body = Pet),
        (status = 403, description = "Not the owner and not a moderator"),
        (status = 404, description = "Pet not found"),
        (status = 409, description = "Listing is blocked")
    )
)]
pub async fn update_pet(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
    ValidJson(payload): ValidJson<PetUpdateRequest>,
) -> AppResult<Json<Pet>> {
    let old = fetch_pet(&state.pool, id).await?;
    let ctx = pet_context(&old);
    authorize_scoped(&state, &principal, Action::Update, &ctx, &[Role::Moderator, Role::Admin])?;
    payload.validate()?;

    if old.status == PetStatus::Blocked {
        if payload.status.is_some() {
            return Err(AppError::conflict("a blocked listing must be unblocked first"));
        }
        // while blocked, only moderation roles may touch the listing
        if !matches!(principal.role, Role::Moderator | Role::Admin) {
            tracing::warn!(user_id = %principal.user_id, pet_id = %id, "edit of blocked listing refused");
            return Err(AppError::conflict("a blocked listing cannot be edited by its owner"));
        }
    }

    let mut pet = old.clone();
    payload.apply(&mut pet);
    pet.updated_at = utc_now();

    sqlx::query(
        r#"
        UPDATE pets SET name = ?, type = ?, breed = ?, color = ?, gender = ?, size = ?, age = ?, description = ?,
            status = ?, location = ?, lat = ?, lng = ?, image_url = ?, microchipped = ?, collar = ?,
            distinctive_features = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&pet.name)
    .bind(&pet.pet_type)
    .bind(&pet.breed)
    .bind(&pet.color)
    .bind(&pet.gender)
    .bind(&pet.size)
    .bind(&pet.age)
    .bind(&pet.description)
    .bind(pet.status.as_str())
    .bind(&pet.location)
    .bind(pet.coordinates.lat)
    .bind(pet.coordinates.lng)
    .bind(&pet.image_url)
    .bind(pet.microchipped)
    .bind(pet.collar)
    .bind(&pet.distinctive_features)
    .bind(pet.updated_at)
    .bind(id.to_string())
    .execute(&state.pool)
    .await?;

    audit_change(state.audit.as_ref(), principal.actor_id(), Action::Update, Some(&old), &pet);
    Ok(Json(pet))
}

#[utoipa::path(
    delete,
    path = "/pets/{id}",
    tag = "Pets",
    params(("id" = Uuid, Path, description = "Pet id")),
    responses(
        (status = 204, description = "Report deleted"),
        (status = 403, description = "Role may not delete pets"),
        (status = 404, description = "Pet not found")
    )
)]
pub async fn delete_pet(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let pet = fetch_pet(&state.pool, id).await?;
    authorize_scoped(&state, &principal, Action::Delete, &pet_context(&pet), &[Role::Admin])?;

    let affected = sqlx::query("DELETE FROM pets WHERE id = ?")
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;
    if affected.rows_affected() == 0 {
        return Err(AppError::not_found("pet not found"));
    }

    audit_removal(state.audit.as_ref(), principal.actor_id(), Action::Delete, &pet);
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/pets/{id}/block",
    tag = "Pets",
    params(("id" = Uuid, Path, description = "Pet id")),
    responses(
        (status = 200, description = "Listing blocked", body = Pet),
        (status = 403, description = "Role may not block pets"),
        (status = 409, description = "Already blocked")
    )
)]
pub async fn block_pet(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Pet>> {
    let old = fetch_pet(&state.pool, id).await?;
    authorize(&state, &principal, Action::Block, &pet_context(&old))?;

    if old.status == PetStatus::Blocked {
        return Err(AppError::conflict("pet is already blocked"));
    }

    let pet = set_pet_status(&state.pool, &old, PetStatus::Blocked).await?;
    audit_change(state.audit.as_ref(), principal.actor_id(), Action::Block, Some(&old), &pet);
    tracing::info!(pet_id = %id, user_id = %principal.user_id, "pet listing blocked");

    Ok(Json(pet))
}

#[utoipa::path(
    post,
    path = "/pets/{id}/unblock",
    tag = "Pets",
    params(("id" = Uuid, Path, description = "Pet id")),
    request_body = UnblockPetRequest,
    responses(
        (status = 200, description = "Listing restored", body = Pet),
        (status = 403, description = "Role may not unblock pets"),
        (status = 409, description = "Not blocked")
    )
)]
pub async fn unblock_pet(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> AppResult<Json<Pet>> {
    let old = fetch_pet(&state.pool, id).await?;
    authorize(&state, &principal, Action::Unblock, &pet_context(&old))?;

    let request: UnblockPetRequest = if body.iter().all(u8::is_ascii_whitespace) {
        UnblockPetRequest::default()
    } else {
        parse_json(&body)?
    };
    let restored = request.status.unwrap_or(PetStatus::Lost);
    if !matches!(restored, PetStatus::Lost | PetStatus::Found) {
        return Err(AppError::bad_request("status must be lost or found"));
    }

    if old.status != PetStatus::Blocked {
        return Err(AppError::conflict("pet is not blocked"));
    }

    let pet = set_pet_status(&state.pool, &old, restored).await?;
    audit_change(state.audit.as_ref(), principal.actor_id(), Action::Unblock, Some(&old), &pet);

    Ok(Json(pet))
}

fn pet_context(pet: &Pet) -> ResourceContext {
    ResourceContext::new(Resource::Pets)
        .with_record(pet.id)
        .owned_by(pet.owner_id)
}

async fn set_pet_status(pool: &SqlitePool, pet: &Pet, status: PetStatus) -> AppResult<Pet> {
    let mut updated = pet.clone();
    updated.status = status;
    updated.updated_at = utc_now();

    sqlx::query("UPDATE pets SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(updated.updated_at)
        .bind(pet.id.to_string())
        .execute(pool)
        .await?;

    Ok(updated)
}

pub(crate) async fn fetch_pet(pool: &SqlitePool, pet_id: Uuid) -> AppResult<Pet> {
    sqlx::query_as::<_, DbPet>(&format!("SELECT {} FROM pets WHERE id = ?", DbPet::COLUMNS))
        .bind(pet_id.to_string())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("pet not found"))?
        .try_into()
}
