//! Core functionality for the Muster volunteer-coordination platform.
//!
//! This crate provides the identifiers, closed enumerations, configuration
//! and logging shared by the authorization, attendance and broadcast crates.

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use config::{
    AttendanceConfig, BroadcastConfig, Config, IdentityEntry, LoggingConfig, ServerConfig,
};
pub use error::{CoreError, Result};
pub use types::{
    Action, ConnectionId, Coordinate, Identity, IncidentId, Permission, Resource, Role, UserId,
    LATITUDE_RANGE, LONGITUDE_RANGE,
};
