//! Real-time channel wire format
//!
//! Every frame is a JSON object tagged by `type`:
//!
//! | Dir   | `type`              | Body                                                |
//! |-------|---------------------|-----------------------------------------------------|
//! | C → S | `subscribe_request` | `incidentId`, `action` (`follow`/`unfollow`)        |
//! | C → S | `location_update`   | `latitude`, `longitude`, `timestamp`, `incidentId?` |
//! | S → C | `ack`               | `message` (sent once after handshake)               |
//! | S → C | `subscribe_ack`     | `incidentId`, `action` (`followed`/`unfollowed`)    |
//! | S → C | `location_update`   | `userId`, coordinates, `timestamp`, `incidentId`    |
//! | S → C | `error`             | `message`                                           |

use chrono::{DateTime, Utc};
use muster_core::{Coordinate, IncidentId, UserId};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::SubscriptionError;

/// Frames sent by clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Follow or unfollow an incident's room
    SubscribeRequest(SubscribeRequest),
    /// Position sample from the sender
    LocationUpdate(LocationUpdate),
}

/// Subscription change request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeRequest {
    /// Target room
    pub incident_id: IncidentId,
    /// Raw action; validated by [`SubscriptionAction::from_str`]
    pub action: String,
}

/// Location sample as submitted by a volunteer's device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationUpdate {
    /// Latitude in decimal degrees
    pub latitude: f64,
    /// Longitude in decimal degrees
    pub longitude: f64,
    /// Device-side capture time
    pub timestamp: DateTime<Utc>,
    /// Incident the sample is tagged to, if the device knows it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incident_id: Option<IncidentId>,
}

impl LocationUpdate {
    /// Position carried by this sample
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }
}

/// Frames sent by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Connection acknowledgment
    Ack {
        /// Human-readable status message
        message: String,
    },
    /// Subscription change confirmed
    SubscribeAck(SubscribeAck),
    /// Fan-out of a volunteer's position
    LocationUpdate(LocationBroadcast),
    /// Request rejected; the connection stays usable
    Error {
        /// Human-readable reason
        message: String,
    },
}

impl ServerMessage {
    /// Build an `error` frame
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }
}

/// Validated subscription action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionAction {
    /// Join the room
    Follow,
    /// Leave the room
    Unfollow,
}

impl SubscriptionAction {
    /// Past-tense form echoed in [`SubscribeAck`]
    pub fn acknowledged(&self) -> AckAction {
        match self {
            SubscriptionAction::Follow => AckAction::Followed,
            SubscriptionAction::Unfollow => AckAction::Unfollowed,
        }
    }
}

impl FromStr for SubscriptionAction {
    type Err = SubscriptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "follow" => Ok(SubscriptionAction::Follow),
            "unfollow" => Ok(SubscriptionAction::Unfollow),
            other => Err(SubscriptionError::InvalidAction(other.to_string())),
        }
    }
}

/// Action echoed back to the subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckAction {
    /// Now a member
    Followed,
    /// No longer a member
    Unfollowed,
}

/// Confirmation of a subscription change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeAck {
    /// Room affected
    pub incident_id: IncidentId,
    /// Resulting action
    pub action: AckAction,
}

/// Location sample as fanned out to room members
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationBroadcast {
    /// Volunteer the sample belongs to
    pub user_id: UserId,
    /// Latitude in decimal degrees
    pub latitude: f64,
    /// Longitude in decimal degrees
    pub longitude: f64,
    /// Device-side capture time
    pub timestamp: DateTime<Utc>,
    /// Room the sample was broadcast to
    pub incident_id: IncidentId,
}
