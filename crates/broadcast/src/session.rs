//! Broadcast hub and per-connection session actor
//!
//! The hub wires the registry, the rooms and the publisher together. Each
//! connection gets one [`Session`] that drains an ordered inbound queue, so
//! frames from the same connection are processed strictly in arrival order
//! while different connections proceed independently.

use chrono::{DateTime, Utc};
use muster_attendance::DutyRoster;
use muster_authz::PermissionChecker;
use muster_core::{Action, BroadcastConfig, ConnectionId, Identity, IncidentId, Resource};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::deployment::DeploymentResolver;
use crate::error::{PublishError, RegistryError, SubscriptionError};
use crate::protocol::{
    ClientMessage, LocationUpdate, ServerMessage, SubscribeRequest, SubscriptionAction,
};
use crate::publisher::LocationPublisher;
use crate::registry::ConnectionRegistry;
use crate::rooms::RoomSubscriptionManager;

/// Shared state behind every session
pub struct BroadcastHub {
    registry: Arc<ConnectionRegistry>,
    rooms: Arc<RoomSubscriptionManager>,
    publisher: LocationPublisher,
    authz: Arc<dyn PermissionChecker>,
    config: BroadcastConfig,
}

impl BroadcastHub {
    /// Build a hub from its external collaborators
    pub fn new(
        config: BroadcastConfig,
        authz: Arc<dyn PermissionChecker>,
        roster: Arc<dyn DutyRoster>,
        deployments: Arc<dyn DeploymentResolver>,
    ) -> Arc<Self> {
        let registry = Arc::new(ConnectionRegistry::new());
        let rooms = RoomSubscriptionManager::new(Arc::clone(&registry));
        let publisher = LocationPublisher::new(
            Arc::clone(&registry),
            Arc::clone(&rooms),
            Arc::clone(&authz),
            roster,
            deployments,
            IncidentId::new(config.default_room.clone()),
        );

        Arc::new(Self {
            registry,
            rooms,
            publisher,
            authz,
            config,
        })
    }

    /// Connection registry shared by every session
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Room membership
    pub fn rooms(&self) -> &Arc<RoomSubscriptionManager> {
        &self.rooms
    }

    /// Location publisher
    pub fn publisher(&self) -> &LocationPublisher {
        &self.publisher
    }

    /// Register an authenticated connection.
    ///
    /// Returns the new id and the receiving half of its bounded outbound queue.
    pub fn connect(
        &self,
        identity: Identity,
    ) -> Result<(ConnectionId, mpsc::Receiver<ServerMessage>), RegistryError> {
        let connection_id = ConnectionId::generate();
        let (tx, rx) = mpsc::channel(self.config.outbound_queue_capacity);
        self.registry.register(connection_id, identity, tx)?;
        Ok((connection_id, rx))
    }

    /// Unregister `connection_id`, leaving every room it followed
    pub fn disconnect(&self, connection_id: ConnectionId) -> bool {
        self.registry.unregister(connection_id)
    }

    /// Start the session actor for `connection_id`.
    ///
    /// Frames pushed into the returned sender are handled one at a time in
    /// the order they were sent. The actor stops when the sender is dropped.
    pub fn spawn_session(
        self: &Arc<Self>,
        connection_id: ConnectionId,
    ) -> (mpsc::Sender<ClientMessage>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(self.config.inbound_queue_capacity);
        let session = Session::new(Arc::clone(self), connection_id);
        let handle = tokio::spawn(session.run(rx));
        (tx, handle)
    }
}

/// Sequential processor for one connection's inbound frames
pub struct Session {
    hub: Arc<BroadcastHub>,
    connection_id: ConnectionId,
}

impl Session {
    /// Bind a session to an already registered connection
    pub fn new(hub: Arc<BroadcastHub>, connection_id: ConnectionId) -> Self {
        Self { hub, connection_id }
    }

    /// Drain `inbound` until every sender is gone
    pub async fn run(self, mut inbound: mpsc::Receiver<ClientMessage>) {
        while let Some(message) = inbound.recv().await {
            self.handle(message, Utc::now());
        }
        debug!(connection_id = %self.connection_id, "Session inbound closed");
    }

    /// Handle one frame as of `now`
    pub fn handle(&self, message: ClientMessage, now: DateTime<Utc>) {
        match message {
            ClientMessage::SubscribeRequest(request) => self.on_subscribe(request),
            ClientMessage::LocationUpdate(update) => self.on_location(update, now),
        }
    }

    fn on_subscribe(&self, request: SubscribeRequest) {
        let result = request
            .action
            .parse::<SubscriptionAction>()
            .and_then(|action| self.change_subscription(&request.incident_id, action));

        match result {
            Ok(_) => {}
            Err(SubscriptionError::UnknownConnection(_)) => {
                debug!(
                    connection_id = %self.connection_id,
                    "Subscription from gone connection dropped"
                );
            }
            Err(e) => {
                debug!(
                    connection_id = %self.connection_id,
                    incident_id = %request.incident_id,
                    error = %e,
                    "Subscription rejected"
                );
                self.reply(ServerMessage::error(e.to_string()));
            }
        }
    }

    fn change_subscription(
        &self,
        incident_id: &IncidentId,
        action: SubscriptionAction,
    ) -> Result<bool, SubscriptionError> {
        let identity = self
            .hub
            .registry
            .lookup(self.connection_id)
            .map_err(|_| SubscriptionError::UnknownConnection(self.connection_id))?;

        // Leaving a room needs no capability.
        if action == SubscriptionAction::Follow
            && !self.hub.authz.check(
                &identity.user_id,
                identity.role,
                Resource::Location,
                Action::Read,
            )
        {
            return Err(SubscriptionError::Forbidden {
                user_id: identity.user_id,
                incident_id: incident_id.clone(),
            });
        }

        self.hub.rooms.apply(self.connection_id, incident_id, action)
    }

    fn on_location(&self, update: LocationUpdate, now: DateTime<Utc>) {
        match self.hub.publisher.publish(self.connection_id, &update, now) {
            Ok(_) => {}
            Err(e) if e.is_reported() => {
                self.log_rejection(&e);
                self.reply(ServerMessage::error(e.to_string()));
            }
            Err(_) => {
                debug!(connection_id = %self.connection_id, "Sample from gone connection dropped");
            }
        }
    }

    fn log_rejection(&self, error: &PublishError) {
        match error {
            PublishError::Attendance(_) => {
                warn!(
                    connection_id = %self.connection_id,
                    error = %error,
                    "Location sample rejected"
                )
            }
            _ => debug!(
                connection_id = %self.connection_id,
                error = %error,
                "Location sample rejected"
            ),
        }
    }

    fn reply(&self, message: ServerMessage) {
        if let Err(e) = self.hub.registry.deliver(self.connection_id, message) {
            debug!(connection_id = %self.connection_id, error = %e, "Reply not delivered");
        }
    }
}
