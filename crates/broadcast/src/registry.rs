//! Connection registry
//!
//! Owns every live connection: the identity bound at handshake and the
//! sending half of its outbound queue. Rooms refer to connections by id only.
//!
//! Unregistering is idempotent and always notifies disconnect listeners, so
//! room cleanup runs even if the registry entry was already gone.

use muster_core::{ConnectionId, Identity};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Weak;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info};

use crate::error::{DeliveryError, RegistryError};
use crate::protocol::ServerMessage;

/// Sending half of a connection's outbound queue
pub type Outbound = mpsc::Sender<ServerMessage>;

/// Receives the cascading side effect of [`ConnectionRegistry::unregister`]
pub trait DisconnectListener: Send + Sync {
    /// Forget every reference to `connection_id`
    fn on_disconnect(&self, connection_id: ConnectionId);
}

struct ConnectionEntry {
    identity: Identity,
    outbound: Outbound,
}

/// Registry of live connections
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, ConnectionEntry>>,
    listeners: RwLock<Vec<Weak<dyn DisconnectListener>>>,
}

impl ConnectionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to disconnect notifications
    pub fn add_listener(&self, listener: Weak<dyn DisconnectListener>) {
        self.listeners.write().push(listener);
    }

    /// Bind `identity` to `connection_id`
    pub fn register(
        &self,
        connection_id: ConnectionId,
        identity: Identity,
        outbound: Outbound,
    ) -> Result<(), RegistryError> {
        let mut connections = self.connections.write();
        if connections.contains_key(&connection_id) {
            return Err(RegistryError::DuplicateConnection(connection_id));
        }

        info!(
            connection_id = %connection_id,
            user_id = %identity.user_id,
            role = %identity.role,
            "Connection registered"
        );
        connections.insert(connection_id, ConnectionEntry { identity, outbound });
        Ok(())
    }

    /// Remove `connection_id` and drop it from every room.
    ///
    /// Returns whether a live entry was removed.
    pub fn unregister(&self, connection_id: ConnectionId) -> bool {
        // Release the table before notifying; listeners may call back in.
        let removed = self.connections.write().remove(&connection_id).is_some();

        let listeners: Vec<_> = {
            let mut listeners = self.listeners.write();
            listeners.retain(|l| l.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in listeners {
            listener.on_disconnect(connection_id);
        }

        if removed {
            info!(connection_id = %connection_id, "Connection unregistered");
        } else {
            debug!(connection_id = %connection_id, "Unregister of unknown connection ignored");
        }
        removed
    }

    /// Identity bound to `connection_id`
    pub fn lookup(&self, connection_id: ConnectionId) -> Result<Identity, RegistryError> {
        self.connections
            .read()
            .get(&connection_id)
            .map(|entry| entry.identity.clone())
            .ok_or(RegistryError::NotFound(connection_id))
    }

    /// Whether `connection_id` is live
    pub fn contains(&self, connection_id: ConnectionId) -> bool {
        self.connections.read().contains_key(&connection_id)
    }

    /// Enqueue `message` for `connection_id` without waiting
    pub fn deliver(
        &self,
        connection_id: ConnectionId,
        message: ServerMessage,
    ) -> Result<(), DeliveryError> {
        let connections = self.connections.read();
        let entry = connections
            .get(&connection_id)
            .ok_or(DeliveryError::Gone(connection_id))?;

        entry.outbound.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::QueueFull(connection_id),
            TrySendError::Closed(_) => DeliveryError::Closed(connection_id),
        })
    }

    /// Number of live connections
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    /// Whether no connection is live
    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }
}
