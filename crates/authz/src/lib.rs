//! Authorization - resource/action decisions for Muster
//!
//! Every privileged operation in the coordination core asks a single
//! question through [`PermissionChecker::check`]: may this user, acting in
//! this role, perform `action` on `resource`? Decisions are never cached by
//! callers; a fresh check is issued per operation because role grants can
//! change between requests.
//!
//! # Capability model
//!
//! Roles and resources are closed enumerations. A [`CapabilityTable`] maps
//! each `(Role, Resource)` pair to the set of permitted actions.
//!
//! # Examples
//!
//! ```
//! use muster_authz::{CapabilityTable, PermissionChecker};
//! use muster_core::{Action, Resource, Role, UserId};
//!
//! let table = CapabilityTable::with_defaults();
//! let user = UserId::new("vol-7");
//! assert!(table.check(&user, Role::Volunteer, Resource::Location, Action::Write));
//! assert!(!table.check(&user, Role::Volunteer, Resource::User, Action::Write));
//! ```

#![warn(missing_docs)]

pub mod capability;
pub mod identity;

pub use capability::{require, AuthzError, CapabilityTable, DenyAll, PermissionChecker};
pub use identity::{IdentityResolver, StaticIdentityResolver};
