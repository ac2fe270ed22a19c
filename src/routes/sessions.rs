//! Operator-facing session listing.

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::AppState;

/// `GET /api/sessions` — list live device sessions.
///
/// Read-only: reports which devices the relay currently holds sessions for,
/// without touching any device. Useful when an operator needs to know why a
/// device is refusing a second login elsewhere.
pub async fn list_sessions(State(state): State<AppState>) -> Json<Value> {
    let sessions = state.controller.store().list().await;
    Json(json!({ "sessions": sessions }))
}
