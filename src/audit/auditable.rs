use serde::Serialize;

use crate::authz::Resource;

/// Trait for models whose changes are written to the audit trail.
/// Implement this trait on any model to audit it from old/new snapshots.
pub trait Auditable: Serialize + Send + Sync {
    /// The protected collection the model belongs to
    fn resource() -> Resource;

    /// Identifier recorded as `record_id` (usually the primary key)
    fn record_id(&self) -> String;
}
