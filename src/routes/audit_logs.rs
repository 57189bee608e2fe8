use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;
use sqlx::{QueryBuilder, Sqlite};

use crate::app::AppState;
use crate::audit::{create_audit_record, verify_chain, AuditRecord, ChainReport};
use crate::authz::{Action, Principal, Resource, ResourceContext};
use crate::errors::{AppError, AppResult, ValidJson};
use crate::models::audit_log::{AuditLogCreateRequest, AuditLogEntry, AuditLogQuery, DbAuditLog};
use crate::models::pet::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use crate::routes::authorize;

#[utoipa::path(
    get,
    path = "/audit-logs",
    tag = "Audit",
    params(AuditLogQuery),
    responses(
        (status = 200, description = "Newest entries first", body = [AuditLogEntry]),
        (status = 403, description = "Role may not read the audit trail")
    )
)]
pub async fn list_audit_logs(
    State(state): State<AppState>,
    principal: Principal,
    Query(query): Query<AuditLogQuery>,
) -> AppResult<Json<Vec<AuditLogEntry>>> {
    authorize(&state, &principal, Action::Read, &ResourceContext::new(Resource::AuditLogs))?;

    let mut qb: QueryBuilder<Sqlite> =
        QueryBuilder::new(format!("SELECT {} FROM audit_logs WHERE 1 = 1", DbAuditLog::COLUMNS));
    if let Some(actor_id) = query.actor_id {
        qb.push(" AND actor_id = ").push_bind(actor_id);
    }
    if let Some(resource) = query.resource {
        qb.push(" AND resource = ").push_bind(resource.as_str());
    }
    if let Some(record_id) = query.record_id {
        qb.push(" AND record_id = ").push_bind(record_id);
    }
    if let Some(action) = query.action {
        qb.push(" AND action = ").push_bind(action.as_str());
    }

    let limit = query
        .limit
        .filter(|v| *v > 0)
        .map(|v| v.min(MAX_PAGE_SIZE))
        .unwrap_or(DEFAULT_PAGE_SIZE);
    let offset = query.offset.filter(|v| *v >= 0).unwrap_or(0);
    qb.push(" ORDER BY seq DESC LIMIT ")
        .push_bind(limit)
        .push(" OFFSET ")
        .push_bind(offset);

    let entries = qb
        .build_query_as::<DbAuditLog>()
        .fetch_all(&state.pool)
        .await?
        .into_iter()
        .map(AuditLogEntry::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(entries))
}

#[utoipa::path(
    post,
    path = "/audit-logs",
    tag = "Audit",
    request_body = AuditLogCreateRequest,
    responses(
        (status = 201, description = "Entry handed to the audit sink", body = AuditRecord),
        (status = 403, description = "Role may not append to the audit trail")
    )
)]
pub async fn create_audit_log(
    State(state): State<AppState>,
    principal: Principal,
    ValidJson(payload): ValidJson<AuditLogCreateRequest>,
) -> AppResult<(StatusCode, Json<AuditRecord>)> {
    let ctx = ResourceContext::new(Resource::AuditLogs).with_record(&payload.record_id);
    authorize(&state, &principal, Action::Create, &ctx)?;

    let record_id = payload.record_id.trim();
    if record_id.is_empty() {
        return Err(AppError::bad_request("record_id must not be empty"));
    }

    let note = payload.note.map(|note| json!({ "note": note }));
    let record = create_audit_record(
        state.audit.as_ref(),
        principal.actor_id(),
        payload.action,
        payload.resource,
        record_id,
        None,
        note,
    );

    Ok((StatusCode::CREATED, Json(record)))
}

#[utoipa::path(
    get,
    path = "/audit-logs/verify",
    tag = "Audit",
    responses(
        (status = 200, description = "Hash chain check", body = ChainReport),
        (status = 403, description = "Role may not read the audit trail")
    )
)]
pub async fn verify_audit_chain(
    State(state): State<AppState>,
    principal: Principal,
) -> AppResult<Json<ChainReport>> {
    authorize(&state, &principal, Action::Read, &ResourceContext::new(Resource::AuditLogs))?;

    let report = verify_chain(&state.pool).await?;
    if !report.valid {
        tracing::error!(broken_at = ?report.broken_at, "audit chain verification failed");
    }
    Ok(Json(report))
}
