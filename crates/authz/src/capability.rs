//! Capability-set authorization
//!
//! Maps `(Role, Resource)` to the actions that role may perform. The table is
//! mutable at runtime so grants and revocations take effect on the very next
//! check.

#![warn(missing_docs)]

use muster_core::{Action, Identity, Permission, Resource, Role, UserId};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::debug;

/// Authorization errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthzError {
    /// The evaluator denied the request
    #[error("Forbidden: {user_id} ({role}) lacks {permission}")]
    Forbidden {
        /// Requesting user
        user_id: UserId,
        /// Role the request was evaluated under
        role: Role,
        /// Capability that was required
        permission: Permission,
    },
}

/// Narrow decision seam in front of whatever evaluates permissions.
///
/// Implementations may be backed by a remote identity provider. Callers must
/// issue one check per privileged operation and must not memoize the result.
pub trait PermissionChecker: Send + Sync {
    /// Decide whether `user_id` acting as `role` may perform `action` on `resource`
    fn check(&self, user_id: &UserId, role: Role, resource: Resource, action: Action) -> bool;
}

impl<T: PermissionChecker + ?Sized> PermissionChecker for std::sync::Arc<T> {
    fn check(&self, user_id: &UserId, role: Role, resource: Resource, action: Action) -> bool {
        (**self).check(user_id, role, resource, action)
    }
}

/// Run a check and turn a denial into [`AuthzError::Forbidden`]
pub fn require<C: PermissionChecker + ?Sized>(
    checker: &C,
    identity: &Identity,
    permission: Permission,
) -> Result<(), AuthzError> {
    if checker.check(
        &identity.user_id,
        identity.role,
        permission.resource,
        permission.action,
    ) {
        Ok(())
    } else {
        debug!(
            user_id = %identity.user_id,
            role = %identity.role,
            permission = %permission,
            "Permission denied"
        );
        Err(AuthzError::Forbidden {
            user_id: identity.user_id.clone(),
            role: identity.role,
            permission,
        })
    }
}

/// In-memory capability table
#[derive(Debug, Default)]
pub struct CapabilityTable {
    grants: RwLock<HashMap<(Role, Resource), HashSet<Action>>>,
}

impl CapabilityTable {
    /// Create an empty table (denies everything)
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table with the stock role matrix
    ///
    /// | Role        | Full access                                   | Read only        |
    /// |-------------|-----------------------------------------------|------------------|
    /// | admin       | every resource                                |                  |
    /// | coordinator | location, attendance, incident, training      | user             |
    /// | volunteer   | location, attendance                          | incident, training |
    pub fn with_defaults() -> Self {
        let table = Self::new();
        let both = [Action::Read, Action::Write];

        for resource in Resource::ALL {
            table.grant_all(Role::Admin, resource, &both);
        }

        for resource in [
            Resource::Location,
            Resource::Attendance,
            Resource::Incident,
            Resource::Training,
        ] {
            table.grant_all(Role::Coordinator, resource, &both);
        }
        table.grant(Role::Coordinator, Resource::User, Action::Read);

        table.grant_all(Role::Volunteer, Resource::Location, &both);
        table.grant_all(Role::Volunteer, Resource::Attendance, &both);
        table.grant(Role::Volunteer, Resource::Incident, Action::Read);
        table.grant(Role::Volunteer, Resource::Training, Action::Read);

        table
    }

    /// Permit `action` on `resource` for `role`
    pub fn grant(&self, role: Role, resource: Resource, action: Action) {
        self.grants
            .write()
            .entry((role, resource))
            .or_default()
            .insert(action);
    }

    fn grant_all(&self, role: Role, resource: Resource, actions: &[Action]) {
        for action in actions {
            self.grant(role, resource, *action);
        }
    }

    /// Withdraw `action` on `resource` from `role`
    pub fn revoke(&self, role: Role, resource: Resource, action: Action) {
        let mut grants = self.grants.write();
        if let Some(actions) = grants.get_mut(&(role, resource)) {
            actions.remove(&action);
            if actions.is_empty() {
                grants.remove(&(role, resource));
            }
        }
    }

    /// Actions currently granted to `role` on `resource`
    pub fn actions(&self, role: Role, resource: Resource) -> HashSet<Action> {
        self.grants
            .read()
            .get(&(role, resource))
            .cloned()
            .unwrap_or_default()
    }
}

impl PermissionChecker for CapabilityTable {
    fn check(&self, _user_id: &UserId, role: Role, resource: Resource, action: Action) -> bool {
        self.grants
            .read()
            .get(&(role, resource))
            .is_some_and(|actions| actions.contains(&action))
    }
}

/// Checker that refuses every request
#[derive(Debug, Default, Clone, Copy)]
pub struct DenyAll;

impl PermissionChecker for DenyAll {
    fn check(&self, _user_id: &UserId, _role: Role, _resource: Resource, _action: Action) -> bool {
        false
    }
}
