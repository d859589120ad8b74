//! Broadcast - incident-scoped real-time location fan-out
//!
//! Volunteers' devices stream position samples over a WebSocket; coordinators
//! follow incident rooms and receive every sample published into them.
//!
//! # Components
//!
//! - [`ConnectionRegistry`]: live connections and the identity bound at handshake
//! - [`RoomSubscriptionManager`]: per-incident membership and fan-out
//! - [`LocationPublisher`]: authorization and duty gates in front of fan-out
//! - [`BroadcastHub`] / [`Session`]: one sequential actor per connection
//! - [`WsGateway`]: handshake authentication and socket plumbing
//!
//! # Guarantees
//!
//! - A sample is broadcast only if its sender holds `location:write` and is
//!   checked in for the current UTC day, both evaluated per sample
//! - Frames from one connection are handled in arrival order
//! - A broadcast observes room membership either before or after a concurrent
//!   change, never in between
//! - One slow or broken subscriber never blocks delivery to the rest
//!
//! Delivery is best-effort to currently connected subscribers. There is no
//! replay and no cross-process fan-out.

#![warn(missing_docs)]

pub mod deployment;
pub mod error;
pub mod gateway;
pub mod protocol;
pub mod publisher;
pub mod registry;
pub mod rooms;
pub mod session;

pub use deployment::{DeploymentResolver, NoDeployments, StaticDeployments};
pub use error::{DeliveryError, GatewayError, PublishError, RegistryError, SubscriptionError};
pub use gateway::{session_token, WsGateway};
pub use protocol::{
    AckAction, ClientMessage, LocationBroadcast, LocationUpdate, ServerMessage, SubscribeAck,
    SubscribeRequest, SubscriptionAction,
};
pub use publisher::{LocationPublisher, PublishReceipt};
pub use registry::{ConnectionRegistry, DisconnectListener, Outbound};
pub use rooms::{BroadcastReport, RoomSubscriptionManager};
pub use session::{BroadcastHub, Session};
