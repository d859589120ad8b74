//! Broadcast error types
//!
//! Every error here is scoped to the single event that caused it. None is
//! fatal to the process or to the connection that triggered it.

use muster_attendance::AttendanceError;
use muster_core::{ConnectionId, Coordinate, IncidentId, UserId};
use thiserror::Error;

/// Connection registry errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Connection id not registered; treat as already gone
    #[error("Unknown connection: {0}")]
    NotFound(ConnectionId),

    /// A live connection already holds this id
    #[error("Connection id already registered: {0}")]
    DuplicateConnection(ConnectionId),
}

/// Per-recipient delivery failures. Logged and skipped, never escalated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// Recipient unregistered
    #[error("Recipient {0} is gone")]
    Gone(ConnectionId),

    /// Recipient's outbound queue is full
    #[error("Outbound queue full for {0}")]
    QueueFull(ConnectionId),

    /// Recipient's writer has shut down
    #[error("Outbound queue closed for {0}")]
    Closed(ConnectionId),
}

/// Room subscription errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscriptionError {
    /// Action was neither `follow` nor `unfollow`
    #[error("Invalid action")]
    InvalidAction(String),

    /// Requester lacks `location:read`
    #[error("Forbidden")]
    Forbidden {
        /// Requesting user
        user_id: UserId,
        /// Room requested
        incident_id: IncidentId,
    },

    /// Connection not registered; treat as already gone
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),
}

/// Location publish errors
#[derive(Debug, Error)]
pub enum PublishError {
    /// Connection not registered; dropped silently
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    /// Latitude or longitude outside WGS84 bounds
    #[error("Invalid coordinates: lat={}, lon={}", .0.latitude, .0.longitude)]
    InvalidCoordinates(Coordinate),

    /// Sender lacks `location:write`
    #[error("Forbidden")]
    Forbidden(UserId),

    /// Sender has no open check-in today
    #[error("Not on duty")]
    NotOnDuty(UserId),

    /// Duty status could not be determined; the gate fails closed
    #[error("Attendance lookup failed: {0}")]
    Attendance(#[from] AttendanceError),
}

impl PublishError {
    /// Whether the sender should be told about this failure
    pub fn is_reported(&self) -> bool {
        !matches!(self, PublishError::UnknownConnection(_))
    }
}

/// WebSocket gateway errors
#[derive(Debug, Error)]
pub enum GatewayError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket protocol error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Frame could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Handshake carried no valid session token
    #[error("Unauthenticated handshake")]
    Unauthenticated,

    /// Registry rejected the connection
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}
