//! Location update publisher
//!
//! Gate order for every sample:
//! 1. Resolve the sender's identity from the connection registry
//! 2. Reject coordinates outside WGS84 bounds
//! 3. Require `location:write`
//! 4. Require an open check-in for the current UTC day
//! 5. Pick the room and fan out
//!
//! A sample that fails any gate is never broadcast. Authorization and duty
//! status are re-evaluated on every sample.

use chrono::{DateTime, Utc};
use muster_attendance::DutyRoster;
use muster_authz::PermissionChecker;
use muster_core::{Action, ConnectionId, IncidentId, Resource, UserId};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::deployment::DeploymentResolver;
use crate::error::PublishError;
use crate::protocol::{LocationBroadcast, LocationUpdate, ServerMessage};
use crate::registry::ConnectionRegistry;
use crate::rooms::RoomSubscriptionManager;

/// Result of a successful publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    /// Room the sample was broadcast to
    pub room: IncidentId,
    /// Subscribers the sample was enqueued for
    pub delivered: usize,
}

/// Validates location samples and fans them out to incident rooms
pub struct LocationPublisher {
    registry: Arc<ConnectionRegistry>,
    rooms: Arc<RoomSubscriptionManager>,
    authz: Arc<dyn PermissionChecker>,
    roster: Arc<dyn DutyRoster>,
    deployments: Arc<dyn DeploymentResolver>,
    default_room: IncidentId,
}

impl LocationPublisher {
    /// Wire a publisher from its collaborators
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        rooms: Arc<RoomSubscriptionManager>,
        authz: Arc<dyn PermissionChecker>,
        roster: Arc<dyn DutyRoster>,
        deployments: Arc<dyn DeploymentResolver>,
        default_room: IncidentId,
    ) -> Self {
        Self {
            registry,
            rooms,
            authz,
            roster,
            deployments,
            default_room,
        }
    }

    /// Validate `update` from `connection_id` and broadcast it.
    pub fn publish(
        &self,
        connection_id: ConnectionId,
        update: &LocationUpdate,
        now: DateTime<Utc>,
    ) -> Result<PublishReceipt, PublishError> {
        let identity = self
            .registry
            .lookup(connection_id)
            .map_err(|_| PublishError::UnknownConnection(connection_id))?;

        let coordinate = update.coordinate();
        coordinate
            .validate()
            .map_err(|_| PublishError::InvalidCoordinates(coordinate))?;

        if !self.authz.check(
            &identity.user_id,
            identity.role,
            Resource::Location,
            Action::Write,
        ) {
            debug!(user_id = %identity.user_id, role = %identity.role, "Location write denied");
            return Err(PublishError::Forbidden(identity.user_id));
        }

        match self.roster.is_on_duty(&identity.user_id, now) {
            Ok(true) => {}
            Ok(false) => return Err(PublishError::NotOnDuty(identity.user_id)),
            Err(e) => {
                warn!(user_id = %identity.user_id, error = %e, "Duty lookup failed");
                return Err(PublishError::Attendance(e));
            }
        }

        let room = self.target_room(&identity.user_id, update);
        let payload = ServerMessage::LocationUpdate(LocationBroadcast {
            user_id: identity.user_id.clone(),
            latitude: update.latitude,
            longitude: update.longitude,
            timestamp: update.timestamp,
            incident_id: room.clone(),
        });

        let report = self.rooms.broadcast(&room, payload);
        debug!(
            user_id = %identity.user_id,
            incident_id = %room,
            delivered = report.delivered,
            dropped = report.dropped,
            "Location broadcast"
        );

        Ok(PublishReceipt {
            room,
            delivered: report.delivered,
        })
    }

    /// The sample's own tag wins, then the active deployment, then the default room.
    fn target_room(&self, user_id: &UserId, update: &LocationUpdate) -> IncidentId {
        update
            .incident_id
            .clone()
            .or_else(|| self.deployments.current_incident(user_id))
            .unwrap_or_else(|| self.default_room.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deployment::{NoDeployments, StaticDeployments};
    use chrono::TimeZone;
    use muster_attendance::{AttendanceError, AttendanceStateMachine, MemoryAttendanceStore};
    use muster_authz::{CapabilityTable, DenyAll};
    use muster_core::{Identity, Role};
    use tokio::sync::mpsc;

    struct BrokenRoster;

    impl DutyRoster for BrokenRoster {
        fn is_on_duty(
            &self,
            _user_id: &UserId,
            _now: DateTime<Utc>,
        ) -> muster_attendance::Result<bool> {
            Err(AttendanceError::Corrupt("disk on fire".to_string()))
        }
    }

    struct Harness {
        registry: Arc<ConnectionRegistry>,
        rooms: Arc<RoomSubscriptionManager>,
        attendance: AttendanceStateMachine,
    }

    impl Harness {
        fn new() -> Self {
            let registry = Arc::new(ConnectionRegistry::new());
            let rooms = RoomSubscriptionManager::new(Arc::clone(&registry));
            let attendance = AttendanceStateMachine::new(Arc::new(MemoryAttendanceStore::new()));
            Self {
                registry,
                rooms,
                attendance,
            }
        }

        fn publisher(
            &self,
            authz: Arc<dyn PermissionChecker>,
            roster: Arc<dyn DutyRoster>,
            deployments: Arc<dyn DeploymentResolver>,
        ) -> LocationPublisher {
            LocationPublisher::new(
                Arc::clone(&self.registry),
                Arc::clone(&self.rooms),
                authz,
                roster,
                deployments,
                IncidentId::new("global"),
            )
        }

        fn standard(&self) -> LocationPublisher {
            self.publisher(
                Arc::new(CapabilityTable::with_defaults()),
                Arc::new(self.attendance.clone()),
                Arc::new(NoDeployments),
            )
        }

        fn connect(&self, user: &str) -> (ConnectionId, mpsc::Receiver<ServerMessage>) {
            let id = ConnectionId::generate();
            let (tx, rx) = mpsc::channel(16);
            self.registry
                .register(id, Identity::new(user, Role::Volunteer), tx)
                .unwrap();
            (id, rx)
        }

        fn follow(&self, user: &str, room: &str) -> (ConnectionId, mpsc::Receiver<ServerMessage>) {
            let (id, mut rx) = self.connect(user);
            self.rooms.subscribe(id, &IncidentId::new(room)).unwrap();
            rx.try_recv().unwrap();
            (id, rx)
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap()
    }

    fn sample(lat: f64, lon: f64, incident: Option<&str>) -> LocationUpdate {
        LocationUpdate {
            latitude: lat,
            longitude: lon,
            timestamp: now(),
            incident_id: incident.map(IncidentId::new),
        }
    }

    #[test]
    fn test_unknown_connection() {
        let h = Harness::new();
        let ghost = ConnectionId::generate();
        let err = h.standard().publish(ghost, &sample(1.0, 1.0, None), now()).unwrap_err();
        assert!(matches!(err, PublishError::UnknownConnection(id) if id == ghost));
        assert!(!err.is_reported());
    }

    #[test]
    fn test_invalid_coordinates_rejected_before_anything_else() {
        let h = Harness::new();
        let (sender, _rx) = h.connect("u");
        let (_a, mut rx_a) = h.follow("a", "42");

        // Not on duty either; coordinates are checked first.
        let err = h
            .standard()
            .publish(sender, &sample(91.0, 0.0, Some("42")), now())
            .unwrap_err();
        assert!(matches!(err, PublishError::InvalidCoordinates(_)));
        assert!(rx_a.try_recv().is_err());
    }

    #[test]
    fn test_non_finite_coordinates_rejected() {
        let h = Harness::new();
        let (sender, _rx) = h.connect("u");
        let (_a, mut rx_a) = h.follow("a", "42");
        h.attendance.check_in(&UserId::new("u"), now()).unwrap();

        for (lat, lon) in [(f64::NAN, 0.0), (0.0, f64::INFINITY)] {
            let err = h
                .standard()
                .publish(sender, &sample(lat, lon, Some("42")), now())
                .unwrap_err();
            assert!(matches!(err, PublishError::InvalidCoordinates(_)));
        }
        assert!(rx_a.try_recv().is_err());
    }

    #[test]
    fn test_forbidden_never_broadcasts() {
        let h = Harness::new();
        let (sender, _rx) = h.connect("u");
        let (_a, mut rx_a) = h.follow("a", "42");
        h.attendance.check_in(&UserId::new("u"), now()).unwrap();

        let publisher = h.publisher(
            Arc::new(DenyAll),
            Arc::new(h.attendance.clone()),
            Arc::new(NoDeployments),
        );
        let err = publisher
            .publish(sender, &sample(1.0, 1.0, Some("42")), now())
            .unwrap_err();

        assert!(matches!(err, PublishError::Forbidden(_)));
        assert!(rx_a.try_recv().is_err());
    }

    #[test]
    fn test_not_on_duty_never_broadcasts() {
        let h = Harness::new();
        let (sender, _rx) = h.connect("u");
        let (_a, mut rx_a) = h.follow("a", "42");

        let err = h
            .standard()
            .publish(sender, &sample(1.0, 1.0, Some("42")), now())
            .unwrap_err();

        assert!(matches!(err, PublishError::NotOnDuty(u) if u.as_str() == "u"));
        assert_eq!(h.rooms.broadcasts_total(), 0);
        assert!(rx_a.try_recv().is_err());
    }

    #[test]
    fn test_duty_lookup_failure_fails_closed() {
        let h = Harness::new();
        let (sender, _rx) = h.connect("u");
        let publisher = h.publisher(
            Arc::new(CapabilityTable::with_defaults()),
            Arc::new(BrokenRoster),
            Arc::new(NoDeployments),
        );

        let err = publisher
            .publish(sender, &sample(1.0, 1.0, None), now())
            .unwrap_err();
        assert!(matches!(err, PublishError::Attendance(_)));
        assert_eq!(h.rooms.broadcasts_total(), 0);
    }

    #[test]
    fn test_room_selection_order() {
        let h = Harness::new();
        let (sender, _rx) = h.connect("u");
        h.attendance.check_in(&UserId::new("u"), now()).unwrap();

        let deployments = Arc::new(StaticDeployments::new());
        let publisher = h.publisher(
            Arc::new(CapabilityTable::with_defaults()),
            Arc::new(h.attendance.clone()),
            deployments.clone(),
        );

        let receipt = publisher.publish(sender, &sample(1.0, 1.0, None), now()).unwrap();
        assert_eq!(receipt.room, IncidentId::new("global"));

        deployments.assign(UserId::new("u"), IncidentId::new("deployed"));
        let receipt = publisher.publish(sender, &sample(1.0, 1.0, None), now()).unwrap();
        assert_eq!(receipt.room, IncidentId::new("deployed"));

        let receipt = publisher
            .publish(sender, &sample(1.0, 1.0, Some("tagged")), now())
            .unwrap();
        assert_eq!(receipt.room, IncidentId::new("tagged"));
    }

    #[test]
    fn test_on_duty_sample_reaches_room() {
        let h = Harness::new();
        let (sender, _rx) = h.connect("u");
        let (_a, mut rx_a) = h.follow("a", "42");
        h.attendance.check_in(&UserId::new("u"), now()).unwrap();

        let receipt = h
            .standard()
            .publish(sender, &sample(14.5995, 120.9842, Some("42")), now())
            .unwrap();
        assert_eq!(receipt.delivered, 1);

        match rx_a.try_recv().unwrap() {
            ServerMessage::LocationUpdate(b) => {
                assert_eq!(b.user_id.as_str(), "u");
                assert_eq!(b.incident_id, IncidentId::new("42"));
                assert_eq!(b.latitude, 14.5995);
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_samples_from_one_sender_arrive_in_order() {
        let h = Harness::new();
        let (sender, _rx) = h.connect("u");
        let (_a, mut rx_a) = h.follow("a", "42");
        h.attendance.check_in(&UserId::new("u"), now()).unwrap();
        let publisher = h.standard();

        for i in 0..10 {
            publisher
                .publish(sender, &sample(i as f64, 0.0, Some("42")), now())
                .unwrap();
        }

        let received: Vec<f64> = std::iter::from_fn(|| rx_a.try_recv().ok())
            .map(|m| match m {
                ServerMessage::LocationUpdate(b) => b.latitude,
                other => panic!("unexpected frame: {:?}", other),
            })
            .collect();
        assert_eq!(received, (0..10).map(|i| i as f64).collect::<Vec<_>>());
    }
}
