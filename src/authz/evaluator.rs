use std::sync::OnceLock;

use super::matrix::allowed_actions;
use super::principal::{Principal, ResourceContext};
use super::{Action, Resource, Role};

/// Policy evaluator trait for pluggable authorization logic
pub trait PolicyEvaluator: Send + Sync {
    /// Check if the principal may perform `action` on the record described by `ctx`
    fn can(&self, principal: &Principal, action: Action, ctx: &ResourceContext) -> bool;
}

/// A grant that applies only when the actor owns the record.
///
/// `resource: None` matches every resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverrideRule {
    pub role: Role,
    pub actions: Vec<Action>,
    pub resource: Option<Resource>,
}

impl OverrideRule {
    pub fn new(role: Role, actions: impl IntoIterator<Item = Action>) -> Self {
        Self {
            role,
            actions: actions.into_iter().collect(),
            resource: None,
        }
    }

    pub fn on(mut self, resource: Resource) -> Self {
        self.resource = Some(resource);
        self
    }

    fn grants(&self, role: Role, action: Action, resource: Resource) -> bool {
        self.role == role
            && self.actions.contains(&action)
            && self.resource.map_or(true, |r| r == resource)
    }
}

/// Access decisions over the static matrix plus ordered ownership overrides.
///
/// Evaluation order for owned records:
/// 1. override rules, first grant wins -> allow
/// 2. permission matrix
#[derive(Debug, Clone)]
pub struct AccessControl {
    overrides: Vec<OverrideRule>,
}

impl Default for AccessControl {
    fn default() -> Self {
        Self::standard()
    }
}

impl AccessControl {
    /// No overrides: owned and foreign records are decided by the matrix alone.
    pub fn matrix_only() -> Self {
        Self {
            overrides: Vec::new(),
        }
    }

    /// Users may always read and update records they own.
    pub fn standard() -> Self {
        Self::matrix_only().with_override(OverrideRule::new(
            Role::User,
            [Action::Read, Action::Update],
        ))
    }

    pub fn with_override(mut self, rule: OverrideRule) -> Self {
        self.overrides.push(rule);
        self
    }

    pub fn overrides(&self) -> &[OverrideRule] {
        &self.overrides
    }

    pub fn can_global(&self, role: Role, action: Action, resource: Resource) -> bool {
        allowed_actions(role, resource).contains(&action)
    }

    pub fn can_on_own_resource(&self, role: Role, action: Action, resource: Resource) -> bool {
        if self
            .overrides
            .iter()
            .any(|rule| rule.grants(role, action, resource))
        {
            return true;
        }

        self.can_global(role, action, resource)
    }

    pub fn check_permission(
        &self,
        role: Role,
        action: Action,
        resource: Resource,
        is_owner: bool,
    ) -> bool {
        if is_owner {
            self.can_on_own_resource(role, action, resource)
        } else {
            self.can_global(role, action, resource)
        }
    }
}

impl PolicyEvaluator for AccessControl {
    fn can(&self, principal: &Principal, action: Action, ctx: &ResourceContext) -> bool {
        let is_owner = ctx.is_owner(principal.user_id);
        let allowed = self.check_permission(principal.role, action, ctx.resource, is_owner);

        if allowed {
            tracing::debug!(
                user_id = %principal.user_id,
                role = %principal.role,
                action = %action,
                resource = %ctx.resource,
                is_owner,
                "permission granted"
            );
        } else {
            tracing::debug!(
                user_id = %principal.user_id,
                role = %principal.role,
                action = %action,
                resource = %ctx.resource,
                is_owner,
                "permission denied"
            );
        }

        allowed
    }
}

fn standard() -> &'static AccessControl {
    static STANDARD: OnceLock<AccessControl> = OnceLock::new();
    STANDARD.get_or_init(AccessControl::standard)
}

/// True iff the matrix lists `action` for `(role, resource)`.
pub fn can_global(role: Role, action: Action, resource: Resource) -> bool {
    standard().can_global(role, action, resource)
}

/// Decision for a record the actor owns, with the standard overrides applied.
pub fn can_on_own_resource(role: Role, action: Action, resource: Resource) -> bool {
    standard().can_on_own_resource(role, action, resource)
}

/// Single entry point callers use before executing a mutation.
pub fn check_permission(role: Role, action: Action, resource: Resource, is_owner: bool) -> bool {
    standard().check_permission(role, action, resource, is_owner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    use crate::models::user::UserStatus;

    fn all_combinations() -> impl Iterator<Item = (Role, Action, Resource)> {
        Role::ALL.into_iter().flat_map(|role| {
            Action::ALL.into_iter().flat_map(move |action| {
                Resource::ALL
                    .into_iter()
                    .map(move |resource| (role, action, resource))
            })
        })
    }

    #[test]
    fn test_user_override_reads_and_updates_any_owned_resource() {
        for resource in Resource::ALL {
            assert!(can_on_own_resource(Role::User, Action::Read, resource));
            assert!(can_on_own_resource(Role::User, Action::Update, resource));
        }
        // audit_logs grants the user nothing globally
        assert!(!can_global(Role::User, Action::Read, Resource::AuditLogs));
        assert!(can_on_own_resource(Role::User, Action::Read, Resource::AuditLogs));
    }

    #[test]
    fn test_owned_delete_falls_through_to_matrix() {
        assert!(!can_on_own_resource(Role::User, Action::Delete, Resource::Pets));
        assert_eq!(
            can_on_own_resource(Role::User, Action::Delete, Resource::Pets),
            can_global(Role::User, Action::Delete, Resource::Pets)
        );
    }

    #[test]
    fn test_owner_flag_only_matters_for_user_read_update() {
        for (role, action, resource) in all_combinations() {
            let owned = check_permission(role, action, resource, true);
            let foreign = check_permission(role, action, resource, false);
            let override_applies =
                role == Role::User && matches!(action, Action::Read | Action::Update);

            if !override_applies {
                assert_eq!(owned, foreign, "{role} {action} {resource}");
            }
        }
        // and the override does change at least one decision
        assert_ne!(
            check_permission(Role::User, Action::Read, Resource::AuditLogs, true),
            check_permission(Role::User, Action::Read, Resource::AuditLogs, false)
        );
    }

    #[test]
    fn test_checks_are_idempotent() {
        for (role, action, resource) in all_combinations() {
            for is_owner in [true, false] {
                let first = check_permission(role, action, resource, is_owner);
                let second = check_permission(role, action, resource, is_owner);
                assert_eq!(first, second);
            }
        }
    }

    #[test]
    fn test_documented_scenarios() {
        assert!(!check_permission(Role::User, Action::Delete, Resource::Pets, true));
        assert!(check_permission(Role::Moderator, Action::Block, Resource::Pets, false));
        assert!(!check_permission(Role::Admin, Action::Update, Resource::AuditLogs, false));
        assert!(check_permission(Role::User, Action::Read, Resource::Matches, false));
    }

    #[test]
    fn test_matrix_only_ignores_ownership() {
        let acl = AccessControl::matrix_only();
        assert!(!acl.check_permission(Role::User, Action::Read, Resource::AuditLogs, true));
    }

    #[test]
    fn test_additional_override_is_scoped_to_its_resource() {
        let acl = AccessControl::standard()
            .with_override(OverrideRule::new(Role::Moderator, [Action::Delete]).on(Resource::Pets));

        assert!(acl.can_on_own_resource(Role::Moderator, Action::Delete, Resource::Pets));
        assert!(!acl.can_on_own_resource(Role::Moderator, Action::Delete, Resource::Users));
        assert!(!acl.can_global(Role::Moderator, Action::Delete, Resource::Pets));
        assert_eq!(acl.overrides().len(), 2);
    }

    #[test]
    fn test_evaluator_derives_ownership_from_context() {
        let acl = AccessControl::standard();
        let owner = Uuid::new_v4();
        let principal = Principal::new(owner, Role::User, UserStatus::Active);

        let own = ResourceContext::new(Resource::AuditLogs).owned_by(owner);
        let foreign = ResourceContext::new(Resource::AuditLogs).owned_by(Uuid::new_v4());

        assert!(acl.can(&principal, Action::Read, &own));
        assert!(!acl.can(&principal, Action::Read, &foreign));
    }
}
