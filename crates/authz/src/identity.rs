//! Session identity resolution
//!
//! The identity provider that issues sessions lives outside this system.
//! Connections present an opaque bearer token once at handshake; the
//! resolver maps it to the `(user, role)` pair bound to that connection.

use muster_core::{config::IdentityEntry, Identity, Role, UserId};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Maps a bearer token to the identity it was issued for
pub trait IdentityResolver: Send + Sync {
    /// Resolve `token`, or `None` when it is unknown or expired
    fn resolve(&self, token: &str) -> Option<Identity>;
}

/// Token table for development and tests
#[derive(Debug, Default)]
pub struct StaticIdentityResolver {
    sessions: RwLock<HashMap<String, Identity>>,
}

impl StaticIdentityResolver {
    /// Create an empty resolver
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the `[[identities]]` configuration table
    pub fn from_entries(entries: &[IdentityEntry]) -> Self {
        let resolver = Self::new();
        for entry in entries {
            resolver.insert(
                entry.token.clone(),
                Identity::new(UserId::new(entry.user_id.clone()), entry.role),
            );
        }
        resolver
    }

    /// Issue `token` for `identity`, replacing any previous binding
    pub fn insert(&self, token: impl Into<String>, identity: Identity) {
        self.sessions.write().insert(token.into(), identity);
    }

    /// Convenience wrapper around [`insert`](Self::insert)
    pub fn with_session(self, token: &str, user_id: &str, role: Role) -> Self {
        self.insert(token, Identity::new(user_id, role));
        self
    }

    /// Invalidate a token
    pub fn remove(&self, token: &str) -> Option<Identity> {
        self.sessions.write().remove(token)
    }
}

impl IdentityResolver for StaticIdentityResolver {
    fn resolve(&self, token: &str) -> Option<Identity> {
        self.sessions.read().get(token).cloned()
    }
}

impl<T: IdentityResolver + ?Sized> IdentityResolver for std::sync::Arc<T> {
    fn resolve(&self, token: &str) -> Option<Identity> {
        (**self).resolve(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_known_and_unknown() {
        let resolver =
            StaticIdentityResolver::new().with_session("tok-a", "alice", Role::Coordinator);

        let identity = resolver.resolve("tok-a").unwrap();
        assert_eq!(identity.user_id.as_str(), "alice");
        assert_eq!(identity.role, Role::Coordinator);
        assert!(resolver.resolve("tok-b").is_none());
    }

    #[test]
    fn test_from_config_entries() {
        let entries = vec![IdentityEntry {
            token: "t1".to_string(),
            user_id: "u1".to_string(),
            role: Role::Volunteer,
        }];
        let resolver = StaticIdentityResolver::from_entries(&entries);
        assert_eq!(resolver.resolve("t1"), Some(Identity::new("u1", Role::Volunteer)));
    }

    #[test]
    fn test_removed_token_no_longer_resolves() {
        let resolver = StaticIdentityResolver::new().with_session("t", "u", Role::Admin);
        assert!(resolver.remove("t").is_some());
        assert!(resolver.resolve("t").is_none());
    }
}
