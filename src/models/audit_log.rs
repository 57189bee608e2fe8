use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::audit::AuditOutcome;
use crate::authz::{Action, Resource};
use crate::errors::AppError;

/// A persisted audit record with its chain position
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AuditLogEntry {
    pub seq: i64,
    pub id: Uuid,
    pub actor_id: String,
    pub action: Action,
    pub resource: Resource,
    pub record_id: String,
    #[schema(value_type = Option<Object>)]
    pub old_value: Option<Value>,
    #[schema(value_type = Option<Object>)]
    pub new_value: Option<Value>,
    pub outcome: AuditOutcome,
    pub timestamp: DateTime<Utc>,
    pub hash: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct DbAuditLog {
    pub seq: i64,
    pub id: String,
    pub actor_id: String,
    pub action: String,
    pub resource: String,
    pub record_id: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub outcome: String,
    pub occurred_at: DateTime<Utc>,
    pub hash: String,
}

impl DbAuditLog {
    pub const COLUMNS: &'static str =
        "seq, id, actor_id, action, resource, record_id, old_value, new_value, outcome, occurred_at, hash";
}

fn parse_json(seq: i64, raw: Option<String>) -> Result<Option<Value>, AppError> {
    raw.map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(|e| AppError::internal(format!("audit row {seq}: invalid snapshot: {e}")))
}

impl TryFrom<DbAuditLog> for AuditLogEntry {
    type Error = AppError;

    fn try_from(value: DbAuditLog) -> Result<Self, Self::Error> {
        let seq = value.seq;
        let bad = |e: crate::authz::InvalidEnumInput| AppError::internal(format!("audit row {seq}: {e}"));

        let outcome = match value.outcome.as_str() {
            "allowed" => AuditOutcome::Allowed,
            "denied" => AuditOutcome::Denied,
            other => return Err(AppError::internal(format!("audit row {seq}: invalid outcome {other:?}"))),
        };

        Ok(AuditLogEntry {
            seq,
            id: Uuid::parse_str(&value.id)
                .map_err(|e| AppError::internal(format!("audit row {seq}: invalid id: {e}")))?,
            actor_id: value.actor_id,
            action: value.action.parse().map_err(bad)?,
            resource: value.resource.parse().map_err(bad)?,
            record_id: value.record_id,
            old_value: parse_json(seq, value.old_value)?,
            new_value: parse_json(seq, value.new_value)?,
            outcome,
            timestamp: value.occurred_at,
            hash: value.hash,
        })
    }
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AuditLogQuery {
    pub actor_id: Option<String>,
    pub resource: Option<Resource>,
    pub record_id: Option<String>,
    pub action: Option<Action>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Manual entry appended by an administrator
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AuditLogCreateRequest {
    pub action: Action,
    pub resource: Resource,
    #[schema(example = "00000000-0000-0000-0000-000000000000")]
    pub record_id: String,
    #[schema(example = "Owner confirmed reunion by phone")]
    pub note: Option<String>,
}
