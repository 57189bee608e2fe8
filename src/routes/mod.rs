pub mod audit_logs;
pub mod auth;
pub mod health;
pub mod matches;
pub mod pets;
pub mod users;

use crate::app::AppState;
use crate::audit::create_denied_record;
use crate::authz::{ensure_owner_or_role, Action, PolicyEvaluator, Principal, ResourceContext, Role};
use crate::errors::{AppError, AppResult};

/// Runs the permission check for `action` on `ctx`. Refused mutations are audited as denied.
pub(crate) fn authorize(
    state: &AppState,
    principal: &Principal,
    action: Action,
    ctx: &ResourceContext,
) -> AppResult<()> {
    if state.access.can(principal, action, ctx) {
        return Ok(());
    }

    tracing::warn!(
        user_id = %principal.user_id,
        role = %principal.role,
        action = %action,
        resource = %ctx.resource,
        record_id = ctx.record_id.as_deref().unwrap_or("-"),
        "permission denied"
    );
    record_denial(state, principal, action, ctx);

    Err(AppError::forbidden(format!(
        "{} may not {} {}",
        principal.role, action, ctx.resource
    )))
}

/// `authorize`, then require ownership or one of `roles` for the specific record.
pub(crate) fn authorize_scoped(
    state: &AppState,
    principal: &Principal,
    action: Action,
    ctx: &ResourceContext,
    roles: &[Role],
) -> AppResult<()> {
    authorize(state, principal, action, ctx)?;

    let is_owner = ctx.is_owner(principal.user_id);
    ensure_owner_or_role(principal, is_owner, roles).map_err(|err| {
        tracing::warn!(
            user_id = %principal.user_id,
            action = %action,
            resource = %ctx.resource,
            record_id = ctx.record_id.as_deref().unwrap_or("-"),
            "record outside actor scope"
        );
        record_denial(state, principal, action, ctx);
        err
    })
}

fn record_denial(state: &AppState, principal: &Principal, action: Action, ctx: &ResourceContext) {
    if action == Action::Read {
        return;
    }
    create_denied_record(
        state.audit.as_ref(),
        principal.actor_id(),
        action,
        ctx.resource,
        ctx.record_id.clone().unwrap_or_default(),
    );
}
