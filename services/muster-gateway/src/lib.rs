//! Muster gateway service
//!
//! Serves the attendance REST surface over axum and the real-time location
//! channel over WebSocket, both backed by one [`AppState`].

pub mod error;
pub mod handlers;
pub mod state;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;

pub use error::ApiError;
pub use state::AppState;

/// HTTP routes
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/attendance", get(handlers::attendance_today))
        .route("/attendance/check-in", post(handlers::check_in))
        .route("/attendance/check-out", post(handlers::check_out))
        .with_state(state)
        .layer(ServiceBuilder::new().into_inner())
}
