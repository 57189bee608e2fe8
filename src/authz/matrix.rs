use super::{Action, Resource, Role};

use Action::*;

/// Actions granted to `role` on `resource`.
///
/// The match is exhaustive over both enums, so adding a role or a resource
/// without filling in its cells is a compile error.
pub fn allowed_actions(role: Role, resource: Resource) -> &'static [Action] {
    match (role, resource) {
        (Role::User, Resource::Users) => &[Read, Update],
        (Role::User, Resource::Pets) => &[Create, Read, Update],
        (Role::User, Resource::Matches) => &[Read, Update],
        (Role::User, Resource::AuditLogs) => &[],

        (Role::Moderator, Resource::Users) => &[Read],
        (Role::Moderator, Resource::Pets) => &[Read, Update, Block, Unblock],
        (Role::Moderator, Resource::Matches) => &[Read, Update],
        (Role::Moderator, Resource::AuditLogs) => &[Read],

        (Role::Admin, Resource::Users) => &[Create, Read, Update, Delete, Block, Unblock],
        (Role::Admin, Resource::Pets) => &[Create, Read, Update, Delete, Block, Unblock],
        (Role::Admin, Resource::Matches) => &[Create, Read, Update, Delete],
        // admin may append and read the trail, never rewrite it
        (Role::Admin, Resource::AuditLogs) => &[Create, Read],
    }
}

/// The matrix row for `role`, one entry per resource in `Resource::ALL` order.
pub fn effective_permissions(role: Role) -> Vec<(Resource, Vec<Action>)> {
    Resource::ALL
        .iter()
        .map(|resource| (*resource, allowed_actions(role, *resource).to_vec()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> Vec<(Role, Resource, Vec<Action>)> {
        vec![
            (Role::User, Resource::Users, vec![Read, Update]),
            (Role::User, Resource::Pets, vec![Create, Read, Update]),
            (Role::User, Resource::Matches, vec![Read, Update]),
            (Role::User, Resource::AuditLogs, vec![]),
            (Role::Moderator, Resource::Users, vec![Read]),
            (Role::Moderator, Resource::Pets, vec![Read, Update, Block, Unblock]),
            (Role::Moderator, Resource::Matches, vec![Read, Update]),
            (Role::Moderator, Resource::AuditLogs, vec![Read]),
            (Role::Admin, Resource::Users, vec![Create, Read, Update, Delete, Block, Unblock]),
            (Role::Admin, Resource::Pets, vec![Create, Read, Update, Delete, Block, Unblock]),
            (Role::Admin, Resource::Matches, vec![Create, Read, Update, Delete]),
            (Role::Admin, Resource::AuditLogs, vec![Create, Read]),
        ]
    }

    #[test]
    fn test_every_cell_matches_fixture() {
        let cells = fixture();
        assert_eq!(cells.len(), Role::ALL.len() * Resource::ALL.len());

        for (role, resource, expected) in cells {
            assert_eq!(
                allowed_actions(role, resource),
                expected.as_slice(),
                "cell {role}/{resource}"
            );
        }
    }

    #[test]
    fn test_moderator_cannot_create_or_delete_pets_or_users() {
        for resource in [Resource::Pets, Resource::Users] {
            let actions = allowed_actions(Role::Moderator, resource);
            assert!(!actions.contains(&Create));
            assert!(!actions.contains(&Delete));
        }
    }

    #[test]
    fn test_admin_audit_logs_are_append_only() {
        let actions = allowed_actions(Role::Admin, Resource::AuditLogs);
        assert!(!actions.contains(&Update));
        assert!(!actions.contains(&Delete));
    }

    #[test]
    fn test_effective_permissions_follow_resource_order() {
        let row = effective_permissions(Role::Moderator);
        let resources: Vec<Resource> = row.iter().map(|(r, _)| *r).collect();
        assert_eq!(resources, Resource::ALL.to_vec());
        assert_eq!(row[3].1, vec![Read]);
    }
}
