//! Room subscription manager
//!
//! Maintains, per incident, the set of connections following that incident.
//! Membership and the reverse index (connection → joined rooms) live behind
//! one lock. Mutations take it exclusively and broadcasts take it shared for
//! the whole fan-out, so a broadcast sees the membership either before or
//! after a concurrent change, never in between.
//!
//! Lock order is always rooms → registry.
//!
//! Rooms are created on first follow and removed when their last member
//! leaves. A missing room behaves exactly like an empty one.

use muster_core::{ConnectionId, IncidentId};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::SubscriptionError;
use crate::protocol::{ServerMessage, SubscribeAck, SubscriptionAction};
use crate::registry::{ConnectionRegistry, DisconnectListener};

#[derive(Default)]
struct Membership {
    rooms: HashMap<IncidentId, HashSet<ConnectionId>>,
    joined: HashMap<ConnectionId, HashSet<IncidentId>>,
}

impl Membership {
    fn insert(&mut self, connection_id: ConnectionId, incident_id: &IncidentId) -> bool {
        let added = self
            .rooms
            .entry(incident_id.clone())
            .or_default()
            .insert(connection_id);
        self.joined
            .entry(connection_id)
            .or_default()
            .insert(incident_id.clone());
        added
    }

    fn remove(&mut self, connection_id: ConnectionId, incident_id: &IncidentId) -> bool {
        let removed = match self.rooms.get_mut(incident_id) {
            Some(members) => {
                let removed = members.remove(&connection_id);
                if members.is_empty() {
                    self.rooms.remove(incident_id);
                }
                removed
            }
            None => false,
        };

        if let Some(joined) = self.joined.get_mut(&connection_id) {
            joined.remove(incident_id);
            if joined.is_empty() {
                self.joined.remove(&connection_id);
            }
        }
        removed
    }
}

/// Outcome of a fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Members the payload was enqueued for
    pub delivered: usize,
    /// Members skipped because their delivery failed
    pub dropped: usize,
}

/// Per-incident room membership built on the connection registry
pub struct RoomSubscriptionManager {
    registry: Arc<ConnectionRegistry>,
    membership: RwLock<Membership>,
    broadcasts: AtomicU64,
}

impl RoomSubscriptionManager {
    /// Create a manager and hook it into `registry`'s disconnect cascade
    pub fn new(registry: Arc<ConnectionRegistry>) -> Arc<Self> {
        let manager = Arc::new(Self {
            registry: Arc::clone(&registry),
            membership: RwLock::new(Membership::default()),
            broadcasts: AtomicU64::new(0),
        });
        let listener: Arc<dyn DisconnectListener> = manager.clone();
        registry.add_listener(Arc::downgrade(&listener));
        manager
    }

    /// Apply a validated follow/unfollow
    pub fn apply(
        &self,
        connection_id: ConnectionId,
        incident_id: &IncidentId,
        action: SubscriptionAction,
    ) -> Result<bool, SubscriptionError> {
        match action {
            SubscriptionAction::Follow => self.subscribe(connection_id, incident_id),
            SubscriptionAction::Unfollow => self.unsubscribe(connection_id, incident_id),
        }
    }

    /// Add `connection_id` to the room and confirm with `subscribe_ack`.
    ///
    /// The caller must already have authorized `location:read`. Returns
    /// whether the connection was newly added; a repeat follow is a no-op
    /// that is still acknowledged.
    pub fn subscribe(
        &self,
        connection_id: ConnectionId,
        incident_id: &IncidentId,
    ) -> Result<bool, SubscriptionError> {
        let mut membership = self.membership.write();

        // Checked under the membership lock so a concurrent unregister either
        // precedes this (and we refuse) or follows it (and its drop cleans up).
        if !self.registry.contains(connection_id) {
            return Err(SubscriptionError::UnknownConnection(connection_id));
        }

        let added = membership.insert(connection_id, incident_id);
        debug!(
            connection_id = %connection_id,
            incident_id = %incident_id,
            added,
            "Followed room"
        );
        self.confirm(connection_id, incident_id, SubscriptionAction::Follow);
        Ok(added)
    }

    /// Remove `connection_id` from the room and confirm with `subscribe_ack`.
    ///
    /// Returns whether the connection was a member.
    pub fn unsubscribe(
        &self,
        connection_id: ConnectionId,
        incident_id: &IncidentId,
    ) -> Result<bool, SubscriptionError> {
        let mut membership = self.membership.write();

        if !self.registry.contains(connection_id) {
            return Err(SubscriptionError::UnknownConnection(connection_id));
        }

        let removed = membership.remove(connection_id, incident_id);
        debug!(
            connection_id = %connection_id,
            incident_id = %incident_id,
            removed,
            "Unfollowed room"
        );
        self.confirm(connection_id, incident_id, SubscriptionAction::Unfollow);
        Ok(removed)
    }

    // Sent while the membership lock is held so the ack precedes any
    // broadcast that observes the new membership.
    fn confirm(
        &self,
        connection_id: ConnectionId,
        incident_id: &IncidentId,
        action: SubscriptionAction,
    ) {
        let ack = ServerMessage::SubscribeAck(SubscribeAck {
            incident_id: incident_id.clone(),
            action: action.acknowledged(),
        });
        if let Err(e) = self.registry.deliver(connection_id, ack) {
            warn!(connection_id = %connection_id, error = %e, "Subscription ack not delivered");
        }
    }

    /// Enqueue `payload` for every current member of the room.
    ///
    /// A failed delivery to one member is logged and skipped; it never delays
    /// or fails delivery to the others.
    pub fn broadcast(&self, incident_id: &IncidentId, payload: ServerMessage) -> BroadcastReport {
        let membership = self.membership.read();
        let mut report = BroadcastReport::default();
        self.broadcasts.fetch_add(1, Ordering::Relaxed);

        let Some(members) = membership.rooms.get(incident_id) else {
            return report;
        };

        for connection_id in members {
            match self.registry.deliver(*connection_id, payload.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(
                        connection_id = %connection_id,
                        incident_id = %incident_id,
                        error = %e,
                        "Dropped broadcast to subscriber"
                    );
                    report.dropped += 1;
                }
            }
        }

        report
    }

    /// Remove `connection_id` from every room. Returns how many it left.
    pub fn drop_connection(&self, connection_id: ConnectionId) -> usize {
        let mut membership = self.membership.write();
        let Some(joined) = membership.joined.remove(&connection_id) else {
            return 0;
        };

        for incident_id in &joined {
            if let Some(members) = membership.rooms.get_mut(incident_id) {
                members.remove(&connection_id);
                if members.is_empty() {
                    membership.rooms.remove(incident_id);
                }
            }
        }

        debug!(connection_id = %connection_id, rooms = joined.len(), "Dropped from rooms");
        joined.len()
    }

    /// Current members of a room
    pub fn members(&self, incident_id: &IncidentId) -> Vec<ConnectionId> {
        self.membership
            .read()
            .rooms
            .get(incident_id)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Whether `connection_id` follows `incident_id`
    pub fn is_member(&self, connection_id: ConnectionId, incident_id: &IncidentId) -> bool {
        self.membership
            .read()
            .rooms
            .get(incident_id)
            .is_some_and(|m| m.contains(&connection_id))
    }

    /// Rooms `connection_id` currently follows
    pub fn rooms_of(&self, connection_id: ConnectionId) -> Vec<IncidentId> {
        self.membership
            .read()
            .joined
            .get(&connection_id)
            .map(|r| r.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of non-empty rooms
    pub fn room_count(&self) -> usize {
        self.membership.read().rooms.len()
    }

    /// Fan-outs attempted since startup, including ones to empty rooms
    pub fn broadcasts_total(&self) -> u64 {
        self.broadcasts.load(Ordering::Relaxed)
    }
}

impl DisconnectListener for RoomSubscriptionManager {
    fn on_disconnect(&self, connection_id: ConnectionId) {
        self.drop_connection(connection_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::AckAction;
    use muster_core::{Identity, Role};
    use tokio::sync::mpsc;

    struct Fixture {
        registry: Arc<ConnectionRegistry>,
        rooms: Arc<RoomSubscriptionManager>,
    }

    impl Fixture {
        fn new() -> Self {
            let registry = Arc::new(ConnectionRegistry::new());
            let rooms = RoomSubscriptionManager::new(Arc::clone(&registry));
            Self { registry, rooms }
        }

        fn connect(&self, user: &str) -> (ConnectionId, mpsc::Receiver<ServerMessage>) {
            let id = ConnectionId::generate();
            let (tx, rx) = mpsc::channel(16);
            self.registry
                .register(id, Identity::new(user, Role::Volunteer), tx)
                .unwrap();
            (id, rx)
        }
    }

    fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[test]
    fn test_subscribe_acks_and_is_idempotent() {
        let fx = Fixture::new();
        let (c, mut rx) = fx.connect("a");
        let room = IncidentId::new("incident_42");

        assert!(fx.rooms.subscribe(c, &room).unwrap());
        assert!(!fx.rooms.subscribe(c, &room).unwrap());
        assert_eq!(fx.rooms.members(&room), vec![c]);

        let acks = drain(&mut rx);
        assert_eq!(acks.len(), 2);
        assert_eq!(
            acks[0],
            ServerMessage::SubscribeAck(SubscribeAck {
                incident_id: room.clone(),
                action: AckAction::Followed
            })
        );
    }

    #[test]
    fn test_unsubscribe_non_member_is_noop() {
        let fx = Fixture::new();
        let (c, mut rx) = fx.connect("a");
        let room = IncidentId::new("7");

        assert!(!fx.rooms.unsubscribe(c, &room).unwrap());
        assert_eq!(fx.rooms.room_count(), 0);
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [ServerMessage::SubscribeAck(SubscribeAck { action: AckAction::Unfollowed, .. })]
        ));
    }

    #[test]
    fn test_last_member_leaving_removes_room() {
        let fx = Fixture::new();
        let (c, _rx) = fx.connect("a");
        let room = IncidentId::new("7");

        fx.rooms.subscribe(c, &room).unwrap();
        assert_eq!(fx.rooms.room_count(), 1);
        assert!(fx.rooms.unsubscribe(c, &room).unwrap());
        assert_eq!(fx.rooms.room_count(), 0);
        assert!(fx.rooms.members(&room).is_empty());
    }

    #[test]
    fn test_subscribe_unknown_connection() {
        let fx = Fixture::new();
        let ghost = ConnectionId::generate();
        assert_eq!(
            fx.rooms.subscribe(ghost, &IncidentId::new("1")),
            Err(SubscriptionError::UnknownConnection(ghost))
        );
        assert_eq!(fx.rooms.room_count(), 0);
    }

    #[test]
    fn test_broadcast_reaches_members_only() {
        let fx = Fixture::new();
        let room = IncidentId::new("42");
        let (a, mut rx_a) = fx.connect("a");
        let (b, mut rx_b) = fx.connect("b");
        let (_c, mut rx_c) = fx.connect("c");

        fx.rooms.subscribe(a, &room).unwrap();
        fx.rooms.subscribe(b, &room).unwrap();
        drain(&mut rx_a);
        drain(&mut rx_b);

        let report = fx.rooms.broadcast(&room, ServerMessage::error("ping"));
        assert_eq!(report, BroadcastReport { delivered: 2, dropped: 0 });
        assert_eq!(drain(&mut rx_a), vec![ServerMessage::error("ping")]);
        assert_eq!(drain(&mut rx_b), vec![ServerMessage::error("ping")]);
        assert!(drain(&mut rx_c).is_empty());
    }

    #[test]
    fn test_broadcast_to_absent_room_is_empty() {
        let fx = Fixture::new();
        let report = fx.rooms.broadcast(&IncidentId::new("nobody"), ServerMessage::error("x"));
        assert_eq!(report, BroadcastReport::default());
        assert_eq!(fx.rooms.broadcasts_total(), 1);
    }

    #[test]
    fn test_broken_subscriber_does_not_block_others() {
        let fx = Fixture::new();
        let room = IncidentId::new("42");
        let (a, rx_a) = fx.connect("a");
        let (b, mut rx_b) = fx.connect("b");

        fx.rooms.subscribe(a, &room).unwrap();
        fx.rooms.subscribe(b, &room).unwrap();
        drop(rx_a);
        drain(&mut rx_b);

        let report = fx.rooms.broadcast(&room, ServerMessage::error("ping"));
        assert_eq!(report, BroadcastReport { delivered: 1, dropped: 1 });
        assert_eq!(drain(&mut rx_b), vec![ServerMessage::error("ping")]);
    }

    #[test]
    fn test_unregister_cascades_to_every_room() {
        let fx = Fixture::new();
        let (c, mut rx) = fx.connect("a");
        let r1 = IncidentId::new("incident_42");
        let r2 = IncidentId::new("incident_43");

        fx.rooms.subscribe(c, &r1).unwrap();
        fx.rooms.subscribe(c, &r2).unwrap();
        assert_eq!(fx.rooms.rooms_of(c).len(), 2);

        fx.registry.unregister(c);

        assert!(!fx.rooms.is_member(c, &r1));
        assert!(!fx.rooms.is_member(c, &r2));
        assert!(fx.rooms.rooms_of(c).is_empty());
        assert_eq!(fx.rooms.room_count(), 0);

        drain(&mut rx);
        assert_eq!(fx.rooms.broadcast(&r1, ServerMessage::error("x")).delivered, 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_drop_connection_directly() {
        let fx = Fixture::new();
        let (c, _rx) = fx.connect("a");
        let (d, _rx_d) = fx.connect("d");
        let room = IncidentId::new("incident_42");

        fx.rooms.subscribe(c, &room).unwrap();
        fx.rooms.subscribe(d, &room).unwrap();

        assert_eq!(fx.rooms.drop_connection(c), 1);
        assert_eq!(fx.rooms.drop_connection(c), 0);
        assert_eq!(fx.rooms.members(&room), vec![d]);
    }
}
