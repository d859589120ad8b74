//! WebSocket gateway
//!
//! Authenticates each connection once at handshake, registers it with the
//! hub and then runs three cooperating pieces per connection:
//!
//! - a reader that decodes frames into the session's inbound queue
//! - the session actor that handles them in order
//! - a writer that drains the bounded outbound queue onto the socket
//!
//! When the socket closes, queued frames are finished, the connection is
//! unregistered (which drops it from every room) and the writer exits once
//! its queue has no senders left.

use futures_util::{SinkExt, StreamExt};
use muster_authz::IdentityResolver;
use muster_core::Identity;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{header, StatusCode};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use url::form_urlencoded;

use crate::error::GatewayError;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::session::BroadcastHub;

const ACK_MESSAGE: &str = "Connected to Muster location feed";
const MALFORMED_MESSAGE: &str = "Malformed message";

/// Accepts WebSocket connections and binds them to the broadcast hub
pub struct WsGateway {
    hub: Arc<BroadcastHub>,
    identities: Arc<dyn IdentityResolver>,
}

impl WsGateway {
    /// Create a gateway over `hub`, resolving handshake tokens with `identities`
    pub fn new(hub: Arc<BroadcastHub>, identities: Arc<dyn IdentityResolver>) -> Self {
        Self { hub, identities }
    }

    /// Bind `addr` and serve until the process exits
    pub async fn run(self: Arc<Self>, addr: SocketAddr) -> Result<(), GatewayError> {
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already-bound listener
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<(), GatewayError> {
        info!(addr = %listener.local_addr()?, "WebSocket gateway listening");

        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let gateway = Arc::clone(&self);
                    tokio::spawn(async move {
                        match gateway.handle_connection(stream, peer_addr).await {
                            Ok(()) => {}
                            Err(GatewayError::Unauthenticated) => {
                                info!(peer = %peer_addr, "Rejected unauthenticated handshake");
                            }
                            Err(e) => {
                                warn!(peer = %peer_addr, error = %e, "WebSocket connection error")
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    async fn handle_connection(
        &self,
        stream: TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<(), GatewayError> {
        let mut identity: Option<Identity> = None;
        let handshake = accept_hdr_async(stream, |request: &Request, response: Response| {
            match session_token(request).and_then(|token| self.identities.resolve(&token)) {
                Some(resolved) => {
                    identity = Some(resolved);
                    Ok(response)
                }
                None => Err(unauthorized()),
            }
        })
        .await;

        let ws_stream = match handshake {
            Ok(ws_stream) => ws_stream,
            Err(_) if identity.is_none() => return Err(GatewayError::Unauthenticated),
            Err(e) => return Err(e.into()),
        };
        let identity = identity.ok_or(GatewayError::Unauthenticated)?;
        let user_id = identity.user_id.clone();

        let (connection_id, mut outbound_rx) = self.hub.connect(identity)?;
        info!(
            peer = %peer_addr,
            connection_id = %connection_id,
            user_id = %user_id,
            "WebSocket session opened"
        );

        let registry = Arc::clone(self.hub.registry());
        let ack = ServerMessage::Ack {
            message: ACK_MESSAGE.to_string(),
        };
        if let Err(e) = registry.deliver(connection_id, ack) {
            warn!(connection_id = %connection_id, error = %e, "Handshake ack not delivered");
        }

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let writer = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let text = match serde_json::to_string(&message) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(connection_id = %connection_id, error = %e, "Failed to encode frame");
                        continue;
                    }
                };
                if let Err(e) = ws_sender.send(Message::Text(text)).await {
                    debug!(connection_id = %connection_id, error = %e, "Socket write failed");
                    break;
                }
            }
            let _ = ws_sender.close().await;
        });

        let (inbound_tx, session) = self.hub.spawn_session(connection_id);

        while let Some(frame) = ws_receiver.next().await {
            match frame {
                Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(message) => {
                        if inbound_tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!(connection_id = %connection_id, error = %e, "Malformed frame");
                        let reply = ServerMessage::error(MALFORMED_MESSAGE);
                        if let Err(e) = registry.deliver(connection_id, reply) {
                            debug!(
                                connection_id = %connection_id,
                                error = %e,
                                "Reply not delivered"
                            );
                        }
                    }
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!(connection_id = %connection_id, error = %e, "Socket read failed");
                    break;
                }
            }
        }

        drop(inbound_tx);
        if let Err(e) = session.await {
            error!(connection_id = %connection_id, error = %e, "Session task failed");
        }
        self.hub.disconnect(connection_id);
        if let Err(e) = writer.await {
            error!(connection_id = %connection_id, error = %e, "Writer task failed");
        }

        info!(connection_id = %connection_id, user_id = %user_id, "WebSocket session closed");
        Ok(())
    }
}

/// Session token from `Authorization: Bearer <token>` or a `token` query parameter
///
/// The auth scheme matches case-insensitively and the query value is
/// percent-decoded.
pub fn session_token(request: &Request) -> Option<String> {
    let from_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split_once(' '))
        .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("Bearer"))
        .map(|(_, token)| token.trim())
        .filter(|token| !token.is_empty());

    if let Some(token) = from_header {
        return Some(token.to_string());
    }

    let query = request.uri().query()?;
    form_urlencoded::parse(query.as_bytes())
        .find(|(key, value)| key == "token" && !value.is_empty())
        .map(|(_, value)| value.into_owned())
}

fn unauthorized() -> ErrorResponse {
    let mut response = ErrorResponse::new(Some("Unauthorized".to_string()));
    *response.status_mut() = StatusCode::UNAUTHORIZED;
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(uri: &str, authorization: Option<&str>) -> Request {
        let mut builder = Request::builder().uri(uri);
        if let Some(value) = authorization {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        builder.body(()).unwrap()
    }

    #[test]
    fn test_token_from_bearer_header() {
        let req = request("/ws", Some("Bearer tok-1"));
        assert_eq!(session_token(&req).as_deref(), Some("tok-1"));
    }

    #[test]
    fn test_token_from_query() {
        let req = request("/ws?client=web&token=tok-2", None);
        assert_eq!(session_token(&req).as_deref(), Some("tok-2"));
    }

    #[test]
    fn test_header_wins_over_query() {
        let req = request("/ws?token=from-query", Some("Bearer from-header"));
        assert_eq!(session_token(&req).as_deref(), Some("from-header"));
    }

    #[test]
    fn test_missing_or_malformed_token() {
        assert!(session_token(&request("/ws", None)).is_none());
        assert!(session_token(&request("/ws?token=", None)).is_none());
        assert!(session_token(&request("/ws", Some("Basic abc"))).is_none());
    }

    #[test]
    fn test_bearer_scheme_is_case_insensitive() {
        let req = request("/ws", Some("bearer tok-3"));
        assert_eq!(session_token(&req).as_deref(), Some("tok-3"));
        let req = request("/ws", Some("BEARER tok-3"));
        assert_eq!(session_token(&req).as_deref(), Some("tok-3"));
    }

    #[test]
    fn test_query_token_is_percent_decoded() {
        let req = request("/ws?token=a%2Bb%3D%2F", None);
        assert_eq!(session_token(&req).as_deref(), Some("a+b=/"));
        let req = request("/ws?client=web&token=tok%20x", None);
        assert_eq!(session_token(&req).as_deref(), Some("tok x"));
    }

    #[test]
    fn test_unauthorized_response() {
        assert_eq!(unauthorized().status(), StatusCode::UNAUTHORIZED);
    }
}
