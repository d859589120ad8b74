//! Shared identifiers and closed enumerations for the Muster coordination core.
//!
//! Roles, resources and actions are closed sets. Permission decisions are
//! expressed as `(Role, Resource) -> {Action}` lookups rather than per-role
//! behaviour, so every privileged operation funnels through a single check.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::CoreError;

/// Latitude bounds in decimal degrees (inclusive)
pub const LATITUDE_RANGE: (f64, f64) = (-90.0, 90.0);

/// Longitude bounds in decimal degrees (inclusive)
pub const LONGITUDE_RANGE: (f64, f64) = (-180.0, 180.0);

/// Stable user identifier issued by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Wrap a raw identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Incident identifier. Doubles as the broadcast room name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IncidentId(String);

impl IncidentId {
    /// Wrap a raw identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IncidentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IncidentId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Opaque identifier for one live socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Allocate a fresh random connection id
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// User role as resolved by the identity provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Platform administrator
    Admin,
    /// Incident coordinator
    Coordinator,
    /// Field volunteer
    Volunteer,
}

impl Role {
    /// Lowercase wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Coordinator => "coordinator",
            Role::Volunteer => "volunteer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "coordinator" => Ok(Role::Coordinator),
            "volunteer" => Ok(Role::Volunteer),
            other => Err(CoreError::Parse(format!("unknown role '{}'", other))),
        }
    }
}

/// Protected resource kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    /// Live volunteer positions
    Location,
    /// Daily check-in / check-out records
    Attendance,
    /// Incident records
    Incident,
    /// User accounts
    User,
    /// Training records
    Training,
}

impl Resource {
    /// Every resource kind
    pub const ALL: [Resource; 5] = [
        Resource::Location,
        Resource::Attendance,
        Resource::Incident,
        Resource::User,
        Resource::Training,
    ];

    /// Lowercase wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::Location => "location",
            Resource::Attendance => "attendance",
            Resource::Incident => "incident",
            Resource::User => "user",
            Resource::Training => "training",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resource {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Resource::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| CoreError::Parse(format!("unknown resource '{}'", s)))
    }
}

/// Operation performed on a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Observe
    Read,
    /// Create or mutate
    Write,
}

impl Action {
    /// Lowercase wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Read => "read",
            Action::Write => "write",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(Action::Read),
            "write" => Ok(Action::Write),
            other => Err(CoreError::Parse(format!("unknown action '{}'", other))),
        }
    }
}

/// A `resource:action` capability such as `location:write`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Permission {
    /// Protected resource
    pub resource: Resource,
    /// Requested operation
    pub action: Action,
}

impl Permission {
    /// Build a permission from its parts
    pub const fn new(resource: Resource, action: Action) -> Self {
        Self { resource, action }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource, self.action)
    }
}

impl FromStr for Permission {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (resource, action) = s
            .split_once(':')
            .ok_or_else(|| CoreError::Parse(format!("permission '{}' is not resource:action", s)))?;
        Ok(Self::new(resource.parse()?, action.parse()?))
    }
}

/// Identity bound to a session at handshake time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Authenticated user
    pub user_id: UserId,
    /// Role resolved for that user
    pub role: Role,
}

impl Identity {
    /// Create a new identity
    pub fn new(user_id: impl Into<UserId>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }
}

/// Geographic position in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    /// Latitude in decimal degrees
    pub latitude: f64,
    /// Longitude in decimal degrees
    pub longitude: f64,
}

impl Coordinate {
    /// Create a coordinate without validating it
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check both axes are finite and within WGS84 bounds
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (LATITUDE_RANGE.0..=LATITUDE_RANGE.1).contains(&self.latitude)
            && (LONGITUDE_RANGE.0..=LONGITUDE_RANGE.1).contains(&self.longitude)
    }

    /// Validate bounds, returning the offending pair on failure
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(CoreError::InvalidCoordinate {
                latitude: self.latitude,
                longitude: self.longitude,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_permission_round_trip() {
        let perm: Permission = "location:write".parse().unwrap();
        assert_eq!(perm, Permission::new(Resource::Location, Action::Write));
        assert_eq!(perm.to_string(), "location:write");
    }

    #[test]
    fn test_permission_rejects_garbage() {
        assert!("location".parse::<Permission>().is_err());
        assert!("location:delete".parse::<Permission>().is_err());
        assert!("vehicles:read".parse::<Permission>().is_err());
    }

    #[test]
    fn test_role_parse_is_case_insensitive() {
        assert_eq!("Volunteer".parse::<Role>().unwrap(), Role::Volunteer);
        assert!("guest".parse::<Role>().is_err());
    }

    #[test]
    fn test_coordinate_edges() {
        assert!(Coordinate::new(90.0, 180.0).is_valid());
        assert!(Coordinate::new(-90.0, -180.0).is_valid());
        assert!(!Coordinate::new(90.0001, 0.0).is_valid());
        assert!(!Coordinate::new(0.0, -180.5).is_valid());
        assert!(!Coordinate::new(f64::NAN, 0.0).is_valid());
        assert!(!Coordinate::new(0.0, f64::INFINITY).is_valid());
    }

    #[test]
    fn test_connection_ids_are_unique() {
        assert_ne!(ConnectionId::generate(), ConnectionId::generate());
    }

    proptest! {
        #[test]
        fn prop_in_range_coordinates_validate(lat in -90.0f64..=90.0, lon in -180.0f64..=180.0) {
            prop_assert!(Coordinate::new(lat, lon).validate().is_ok());
        }

        #[test]
        fn prop_out_of_range_latitude_rejected(
            lat in 90.000_001f64..1_000.0,
            lon in -180.0f64..=180.0,
        ) {
            prop_assert!(Coordinate::new(lat, lon).validate().is_err());
            prop_assert!(Coordinate::new(-lat, lon).validate().is_err());
        }
    }
}
