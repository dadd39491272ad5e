//! Entity permissions and the request context they are checked against.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Identity of the caller of an API operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// Authenticated user id, if any.
    pub user: Option<String>,
    /// Roles granted to the caller.
    pub roles: BTreeSet<String>,
}

impl RequestContext {
    /// Context of an unauthenticated caller.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Context of an authenticated user.
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            user: Some(id.into()),
            roles: BTreeSet::new(),
        }
    }

    /// Grant a role.
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    /// Check if a user is attached.
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    /// Check if the caller holds `role`.
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }
}

/// Outcome of a permission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The operation may proceed.
    Granted,
    /// The operation is never available on this entity.
    NotAllowed,
    /// The operation exists but this caller may not perform it.
    Forbidden,
}

/// Permission for one operation on an entity.
#[derive(Clone)]
pub enum Permission {
    /// Anyone may perform the operation.
    Allowed,
    /// Nobody may perform the operation.
    Denied,
    /// Any authenticated caller may perform the operation.
    Authenticated,
    /// Callers holding the role may perform the operation.
    Role(String),
    /// Callers accepted by the predicate may perform the operation.
    Predicate(Arc<dyn Fn(&RequestContext) -> bool + Send + Sync>),
}

impl Permission {
    /// Create a predicate permission.
    pub fn predicate<F>(check: F) -> Self
    where
        F: Fn(&RequestContext) -> bool + Send + Sync + 'static,
    {
        Permission::Predicate(Arc::new(check))
    }

    /// Check the permission for a caller.
    pub fn check(&self, context: &RequestContext) -> Decision {
        let granted = match self {
            Permission::Allowed => true,
            Permission::Denied => return Decision::NotAllowed,
            Permission::Authenticated => context.is_authenticated(),
            Permission::Role(role) => context.has_role(role),
            Permission::Predicate(check) => check(context),
        };
        if granted {
            Decision::Granted
        } else {
            Decision::Forbidden
        }
    }
}

impl fmt::Debug for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Permission::Allowed => f.write_str("Allowed"),
            Permission::Denied => f.write_str("Denied"),
            Permission::Authenticated => f.write_str("Authenticated"),
            Permission::Role(role) => f.debug_tuple("Role").field(role).finish(),
            Permission::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// API operation subject to a permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// find, count and get by id.
    Read,
    /// insert.
    Insert,
    /// update.
    Update,
    /// delete.
    Delete,
}

/// Per-entity API permissions.
///
/// Reads are allowed and writes denied unless configured otherwise.
#[derive(Debug, Clone)]
pub struct EntityPermissions {
    pub read: Permission,
    pub insert: Permission,
    pub update: Permission,
    pub delete: Permission,
}

impl Default for EntityPermissions {
    fn default() -> Self {
        Self {
            read: Permission::Allowed,
            insert: Permission::Denied,
            update: Permission::Denied,
            delete: Permission::Denied,
        }
    }
}

impl EntityPermissions {
    /// Allow every operation to everyone.
    pub fn allow_all() -> Self {
        Self::uniform(Permission::Allowed)
    }

    /// Use the same permission for every operation.
    pub fn uniform(permission: Permission) -> Self {
        Self {
            read: permission.clone(),
            insert: permission.clone(),
            update: permission.clone(),
            delete: permission,
        }
    }

    /// Permission for an operation.
    pub fn for_operation(&self, operation: Operation) -> &Permission {
        match operation {
            Operation::Read => &self.read,
            Operation::Insert => &self.insert,
            Operation::Update => &self.update,
            Operation::Delete => &self.delete,
        }
    }

    /// Check an operation for a caller.
    pub fn check(&self, operation: Operation, context: &RequestContext) -> Decision {
        self.for_operation(operation).check(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_permissions_are_read_only() {
        let permissions = EntityPermissions::default();
        let anon = RequestContext::anonymous();
        assert_eq!(permissions.check(Operation::Read, &anon), Decision::Granted);
        assert_eq!(
            permissions.check(Operation::Insert, &anon),
            Decision::NotAllowed
        );
    }

    #[test]
    fn test_predicate_failure_is_forbidden() {
        let permissions = EntityPermissions {
            delete: Permission::predicate(|ctx| ctx.has_role("admin")),
            ..EntityPermissions::allow_all()
        };

        let user = RequestContext::user("u1");
        let admin = RequestContext::user("u2").with_role("admin");
        assert_eq!(
            permissions.check(Operation::Delete, &user),
            Decision::Forbidden
        );
        assert_eq!(
            permissions.check(Operation::Delete, &admin),
            Decision::Granted
        );
    }

    #[test]
    fn test_authenticated_and_role() {
        let anon = RequestContext::anonymous();
        assert_eq!(Permission::Authenticated.check(&anon), Decision::Forbidden);
        assert_eq!(
            Permission::Role("ops".into()).check(&RequestContext::user("a").with_role("ops")),
            Decision::Granted
        );
    }
}
