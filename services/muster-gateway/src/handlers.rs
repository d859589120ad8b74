use axum::{
    extract::State,
    http::{header, HeaderMap},
    response::Json,
};
use chrono::Utc;
use muster_attendance::{AttendanceRecord, AttendanceSnapshot};
use muster_authz::require;
use muster_core::{Action, Identity, Permission, Resource};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::ApiError;
use crate::state::AppState;

const ATTENDANCE_READ: Permission = Permission::new(Resource::Attendance, Action::Read);
const ATTENDANCE_WRITE: Permission = Permission::new(Resource::Attendance, Action::Write);

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "muster-gateway",
        "connections": state.hub.registry().len(),
        "rooms": state.hub.rooms().room_count(),
        "timestamp": Utc::now().to_rfc3339()
    }))
}

pub async fn attendance_today(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<AttendanceSnapshot>, ApiError> {
    let identity = authorize(&state, &headers, ATTENDANCE_READ)?;
    let snapshot = state.attendance.snapshot(&identity.user_id, Utc::now())?;
    Ok(Json(snapshot))
}

pub async fn check_in(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<AttendanceRecord>, ApiError> {
    let identity = authorize(&state, &headers, ATTENDANCE_WRITE)?;
    let record = state.attendance.check_in(&identity.user_id, Utc::now())?;
    Ok(Json(record))
}

pub async fn check_out(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<AttendanceRecord>, ApiError> {
    let identity = authorize(&state, &headers, ATTENDANCE_WRITE)?;
    let record = state.attendance.check_out(&identity.user_id, Utc::now())?;
    Ok(Json(record))
}

fn authorize(
    state: &AppState,
    headers: &HeaderMap,
    permission: Permission,
) -> Result<Identity, ApiError> {
    let identity = bearer_token(headers)
        .and_then(|token| state.identities.resolve(token))
        .ok_or(ApiError::Unauthorized)?;
    require(state.authz.as_ref(), &identity, permission)?;
    Ok(identity)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .split_once(' ')
        .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("Bearer"))
        .map(|(_, token)| token.trim())
        .filter(|token| !token.is_empty())
}
