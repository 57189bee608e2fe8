//! Audit trail: immutable records of permission-checked mutations.
//!
//! Records are built here and handed to an [`AuditSink`]. Delivery is
//! fire-and-forget: a failing sink never fails the governed request, but every
//! failure is logged at `error` together with the record that was lost.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::SqlitePool;
use tokio::sync::mpsc;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::authz::{Action, Resource};

pub mod auditable;
pub mod store;

pub use auditable::Auditable;
pub use store::{append_record, start_audit_listener, verify_chain, ChainReport};

#[derive(thiserror::Error, Debug)]
pub enum AuditError {
    #[error("audit sink is closed")]
    SinkClosed,
    #[error("failed to serialize audit record: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to persist audit record: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<AuditError> for crate::errors::AppError {
    fn from(value: AuditError) -> Self {
        match value {
            AuditError::Database(err) => Self::Database(err),
            other => Self::internal(other.to_string()),
        }
    }
}

/// Whether the audited attempt passed the permission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Allowed,
    Denied,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOutcome::Allowed => "allowed",
            AuditOutcome::Denied => "denied",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AuditRecord {
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
}

/// Receives audit records. Implementations must not block the caller.
pub trait AuditSink: Send + Sync {
    fn emit(&self, record: &AuditRecord) -> Result<(), AuditError>;
}

/// Writes one log line per record and keeps nothing.
#[derive(Debug, Clone, Default)]
pub struct ConsoleSink;

impl AuditSink for ConsoleSink {
    fn emit(&self, record: &AuditRecord) -> Result<(), AuditError> {
        tracing::info!(
            outcome = record.outcome.as_str(),
            "AUDIT: user {} performed {} on {} record {}",
            record.actor_id,
            record.action,
            record.resource,
            record.record_id
        );
        Ok(())
    }
}

/// Hands records to the background listener that persists them.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<AuditRecord>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<AuditRecord>) -> Self {
        Self { tx }
    }
}

impl AuditSink for ChannelSink {
    fn emit(&self, record: &AuditRecord) -> Result<(), AuditError> {
        self.tx.send(record.clone()).map_err(|_| AuditError::SinkClosed)
    }
}

/// Where audit records go, read from `AUDIT_SINK`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditSinkKind {
    /// Log line only (reference behavior)
    Console,
    /// Durable, hash-chained rows in `audit_logs`
    Database,
}

impl AuditSinkKind {
    pub fn from_env() -> Self {
        match std::env::var("AUDIT_SINK").unwrap_or_default().to_lowercase().as_str() {
            "console" => AuditSinkKind::Console,
            _ => AuditSinkKind::Database,
        }
    }
}

/// Builds the sink; the database kind spawns its listener on the current runtime.
pub fn init_sink(kind: AuditSinkKind, pool: &SqlitePool) -> Arc<dyn AuditSink> {
    match kind {
        AuditSinkKind::Console => Arc::new(ConsoleSink),
        AuditSinkKind::Database => {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(start_audit_listener(rx, pool.clone()));
            Arc::new(ChannelSink::new(tx))
        }
    }
}

/// Builds a record stamped with the current time and emits it to `sink`.
pub fn create_audit_record(
    sink: &dyn AuditSink,
    actor_id: impl Into<String>,
    action: Action,
    resource: Resource,
    record_id: impl Into<String>,
    old_value: Option<Value>,
    new_value: Option<Value>,
) -> AuditRecord {
    let record = AuditRecord {
        id: Uuid::new_v4(),
        actor_id: actor_id.into(),
        action,
        resource,
        record_id: record_id.into(),
        old_value,
        new_value,
        outcome: AuditOutcome::Allowed,
        timestamp: Utc::now(),
    };
    deliver(sink, &record);
    record
}

/// Records a mutation attempt that the permission check rejected.
pub fn create_denied_record(
    sink: &dyn AuditSink,
    actor_id: impl Into<String>,
    action: Action,
    resource: Resource,
    record_id: impl Into<String>,
) -> AuditRecord {
    let record = AuditRecord {
        id: Uuid::new_v4(),
        actor_id: actor_id.into(),
        action,
        resource,
        record_id: record_id.into(),
        old_value: None,
        new_value: None,
        outcome: AuditOutcome::Denied,
        timestamp: Utc::now(),
    };
    deliver(sink, &record);
    record
}

/// Audits a create/update style change of `entity`, with its previous state if any.
pub fn audit_change<T: Auditable>(
    sink: &dyn AuditSink,
    actor_id: impl Into<String>,
    action: Action,
    old: Option<&T>,
    entity: &T,
) -> AuditRecord {
    create_audit_record(
        sink,
        actor_id,
        action,
        T::resource(),
        entity.record_id(),
        old.and_then(snapshot),
        snapshot(entity),
    )
}

/// Audits the removal of `entity`; only the old snapshot is kept.
pub fn audit_removal<T: Auditable>(
    sink: &dyn AuditSink,
    actor_id: impl Into<String>,
    action: Action,
    entity: &T,
) -> AuditRecord {
    create_audit_record(
        sink,
        actor_id,
        action,
        T::resource(),
        entity.record_id(),
        snapshot(entity),
        None,
    )
}

fn snapshot<T: Serialize>(entity: &T) -> Option<Value> {
    match serde_json::to_value(entity) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::error!("failed to snapshot audited entity: {}", err);
            None
        }
    }
}

fn deliver(sink: &dyn AuditSink, record: &AuditRecord) {
    if let Err(err) = sink.emit(record) {
        tracing::error!(
            audit_id = %record.id,
            actor_id = %record.actor_id,
            action = %record.action,
            resource = %record.resource,
            record_id = %record.record_id,
            record = ?record,
            "audit record not delivered: {}",
            err
        );
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{FailingSink, RecordingSink};
    use super::*;
    use serde_json::json;

    #[derive(Serialize)]
    struct Tag {
        id: u32,
        label: &'static str,
    }

    impl Auditable for Tag {
        fn resource() -> Resource {
            Resource::Pets
        }

        fn record_id(&self) -> String {
            format!("tag-{}", self.id)
        }
    }

    #[test]
    fn test_record_mirrors_inputs_and_stamps_time() {
        let sink = RecordingSink::default();
        let before = Utc::now();

        let record = create_audit_record(
            &sink,
            "u1",
            Action::Update,
            Resource::Pets,
            "p42",
            Some(json!({"status": "lost"})),
            Some(json!({"status": "blocked"})),
        );

        let after = Utc::now();
        assert_eq!(record.actor_id, "u1");
        assert_eq!(record.action, Action::Update);
        assert_eq!(record.resource, Resource::Pets);
        assert_eq!(record.record_id, "p42");
        assert_eq!(record.old_value, Some(json!({"status": "lost"})));
        assert_eq!(record.new_value, Some(json!({"status": "blocked"})));
        assert_eq!(record.outcome, AuditOutcome::Allowed);
        assert!(record.timestamp >= before && record.timestamp <= after);

        let emitted = sink.records.lock().unwrap();
        assert_eq!(emitted.as_slice(), &[record.clone()]);
    }

    #[test]
    fn test_sink_failure_does_not_fail_caller() {
        let record = create_audit_record(
            &FailingSink,
            "u1",
            Action::Delete,
            Resource::Users,
            "u2",
            None,
            None,
        );
        assert_eq!(record.record_id, "u2");
    }

    #[test]
    fn test_denied_record_has_no_snapshots() {
        let sink = RecordingSink::default();
        let record = create_denied_record(&sink, "u7", Action::Delete, Resource::Pets, "p1");

        assert_eq!(record.outcome, AuditOutcome::Denied);
        assert!(record.old_value.is_none() && record.new_value.is_none());
        assert_eq!(sink.records.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_auditable_helpers_snapshot_entities() {
        let sink = RecordingSink::default();
        let old = Tag { id: 3, label: "old" };
        let new = Tag { id: 3, label: "new" };

        let changed = audit_change(&sink, "u1", Action::Update, Some(&old), &new);
        assert_eq!(changed.record_id, "tag-3");
        assert_eq!(changed.old_value, Some(json!({"id": 3, "label": "old"})));
        assert_eq!(changed.new_value, Some(json!({"id": 3, "label": "new"})));

        let removed = audit_removal(&sink, "u1", Action::Delete, &old);
        assert_eq!(removed.old_value, Some(json!({"id": 3, "label": "old"})));
        assert!(removed.new_value.is_none());
    }

    #[tokio::test]
    async fn test_channel_sink_reports_closed_receiver() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = ChannelSink::new(tx);
        drop(rx);

        let record = AuditRecord {
            id: Uuid::new_v4(),
            actor_id: "u1".into(),
            action: Action::Create,
            resource: Resource::Pets,
            record_id: "p1".into(),
            old_value: None,
            new_value: None,
            outcome: AuditOutcome::Allowed,
            timestamp: Utc::now(),
        };
        assert!(matches!(sink.emit(&record), Err(AuditError::SinkClosed)));
    }
}
