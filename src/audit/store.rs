use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use tokio::sync::mpsc;
use utoipa::ToSchema;

use super::{AuditError, AuditRecord};

/// Result of re-hashing the stored trail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ChainReport {
    pub entries: u64,
    pub valid: bool,
    /// `seq` of the first row whose link or hash does not check out
    pub broken_at: Option<i64>,
}

fn chain_hash(prev_hash: Option<&str>, payload: &str) -> String {
    let mut hasher = Sha256::new();
    if let Some(prev) = prev_hash {
        hasher.update(prev.as_bytes());
    }
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}

/// Appends `record` to `audit_logs`, linking it to the previous row's hash.
///
/// The head read and the insert run in one `BEGIN IMMEDIATE` transaction so a
/// concurrent writer can never interleave between them.
pub async fn append_record(pool: &SqlitePool, record: &AuditRecord) -> Result<String, AuditError> {
    let payload = serde_json::to_string(record)?;
    let old_value = record.old_value.as_ref().map(serde_json::to_string).transpose()?;
    let new_value = record.new_value.as_ref().map(serde_json::to_string).transpose()?;

    let mut conn = pool.acquire().await?;
    sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

    let inserted = insert_linked(&mut *conn, record, &payload, old_value, new_value).await;
    match inserted {
        Ok(hash) => {
            sqlx::query("COMMIT").execute(&mut *conn).await?;
            Ok(hash)
        }
        Err(err) => {
            if let Err(rollback) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                tracing::warn!("audit append rollback failed: {}", rollback);
            }
            Err(err)
        }
    }
}

async fn insert_linked(
    conn: &mut SqliteConnection,
    record: &AuditRecord,
    payload: &str,
    old_value: Option<String>,
    new_value: Option<String>,
) -> Result<String, AuditError> {
    let prev_hash: Option<String> =
        sqlx::query_scalar("SELECT hash FROM audit_logs ORDER BY seq DESC LIMIT 1")
            .fetch_optional(&mut *conn)
            .await?;

    let hash = chain_hash(prev_hash.as_deref(), payload);

    sqlx::query(
        r#"
        INSERT INTO audit_logs (id, actor_id, action, resource, record_id, old_value, new_value, outcome, occurred_at, payload, prev_hash, hash)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(record.id.to_string())
    .bind(&record.actor_id)
    .bind(record.action.as_str())
    .bind(record.resource.as_str())
    .bind(&record.record_id)
    .bind(old_value)
    .bind(new_value)
    .bind(record.outcome.as_str())
    .bind(record.timestamp)
    .bind(payload)
    .bind(&prev_hash)
    .bind(&hash)
    .execute(&mut *conn)
    .await?;

    Ok(hash)
}

const APPEND_ATTEMPTS: u32 = 5;
const APPEND_BACKOFF: Duration = Duration::from_millis(50);

/// Appends with a bounded retry; only database errors are retried.
async fn append_with_retry(pool: &SqlitePool, record: &AuditRecord) -> Result<String, AuditError> {
    let mut attempt = 1;
    loop {
        match append_record(pool, record).await {
            Err(AuditError::Database(err)) if attempt < APPEND_ATTEMPTS => {
                tracing::warn!(audit_id = %record.id, attempt, "audit append failed, retrying: {}", err);
                tokio::time::sleep(APPEND_BACKOFF * attempt).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

/// Drains the channel and persists each record. A single listener keeps the chain linear.
pub async fn start_audit_listener(mut rx: mpsc::UnboundedReceiver<AuditRecord>, pool: SqlitePool) {
    tracing::info!("Audit listener started");
    while let Some(record) = rx.recv().await {
        if let Err(err) = append_with_retry(&pool, &record).await {
            tracing::error!(
                audit_id = %record.id,
                record = ?record,
                "Failed to save audit record: {}",
                err
            );
        }
    }
    tracing::info!("Audit listener stopped");
}

#[derive(FromRow)]
struct ChainRow {
    seq: i64,
    id: String,
    actor_id: String,
    action: String,
    resource: String,
    record_id: String,
    old_value: Option<String>,
    new_value: Option<String>,
    outcome: String,
    occurred_at: DateTime<Utc>,
    payload: String,
    prev_hash: Option<String>,
    hash: String,
}

impl ChainRow {
    /// The served columns must say exactly what the hashed payload says.
    fn columns_match_payload(&self) -> bool {
        let Ok(record) = serde_json::from_str::<AuditRecord>(&self.payload) else {
            return false;
        };
        let snapshot = |raw: &Option<String>| -> Option<Option<Value>> {
            match raw {
                Some(raw) => serde_json::from_str(raw).ok().map(Some),
                None => Some(None),
            }
        };

        record.id.to_string() == self.id
            && record.actor_id == self.actor_id
            && record.action.as_str() == self.action
            && record.resource.as_str() == self.resource
            && record.record_id == self.record_id
            && record.outcome.as_str() == self.outcome
            && record.timestamp == self.occurred_at
            && snapshot(&self.old_value) == Some(record.old_value)
            && snapshot(&self.new_value) == Some(record.new_value)
    }
}

/// Re-hashes every stored row in `seq` order and checks each row's columns against its payload.
pub async fn verify_chain(pool: &SqlitePool) -> Result<ChainReport, AuditError> {
    let rows: Vec<ChainRow> = sqlx::query_as(
        "SELECT seq, id, actor_id, action, resource, record_id, old_value, new_value, outcome, occurred_at, payload, prev_hash, hash FROM audit_logs ORDER BY seq ASC",
    )
    .fetch_all(pool)
    .await?;

    let mut previous: Option<String> = None;
    for row in &rows {
        let linked = row.prev_hash.as_deref() == previous.as_deref();
        let hashed = chain_hash(row.prev_hash.as_deref(), &row.payload) == row.hash;
        if !linked || !hashed || !row.columns_match_payload() {
            tracing::warn!(seq = row.seq, linked, hashed, "audit chain broken");
            return Ok(ChainReport {
                entries: rows.len() as u64,
                valid: false,
                broken_at: Some(row.seq),
            });
        }
        previous = Some(row.hash.clone());
    }

    Ok(ChainReport {
        entries: rows.len() as u64,
        valid: true,
        broken_at: None,
    })
}
