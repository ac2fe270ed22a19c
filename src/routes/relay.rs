//! The relay endpoint.
//!
//! `POST /relay` — single JSON endpoint the migration UI talks to. The
//! `action` field selects login, authenticated request, or logout; the
//! response is always a [`RelayResponse`] envelope, mirrored into the HTTP
//! status so callers can branch on either.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tracing::debug;

use crate::controller::RelayResponse;
use crate::AppState;

/// Request body for `POST /relay`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayRequest {
    /// One of `login`, `request`, `logout`.
    pub action: String,
    /// Device IP or hostname — the key for session storage and serialization.
    pub ip_address: String,
    /// Login only.
    pub username: Option<String>,
    /// Login only.
    pub password: Option<String>,
    /// Verify the device's TLS certificate (default false — these appliances
    /// ship self-signed certs).
    #[serde(default)]
    pub verify_tls: bool,
    /// Login only: explicit API base URL, bypassing discovery.
    pub override_url: Option<String>,
    /// Request only: endpoint path relative to the discovered base URL.
    pub endpoint: Option<String>,
    /// Request only: XML payload forwarded verbatim.
    pub body: Option<String>,
}

impl IntoResponse for RelayResponse {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

/// `POST /relay` — dispatch one relay operation.
///
/// Missing required fields yield a `400` envelope; all other failures carry
/// the distinguished statuses documented on [`RelayResponse`].
pub async fn relay(
    State(state): State<AppState>,
    Json(payload): Json<RelayRequest>,
) -> RelayResponse {
    if payload.ip_address.trim().is_empty() {
        return bad_request("ipAddress is required");
    }
    let address = payload.ip_address.trim();
    debug!(action = %payload.action, address, "relay call");

    match payload.action.as_str() {
        "login" => {
            let (Some(username), Some(password)) = (&payload.username, &payload.password) else {
                return bad_request("username and password are required for login");
            };
            state
                .controller
                .login(
                    address,
                    username,
                    password,
                    payload.verify_tls,
                    payload.override_url.as_deref(),
                )
                .await
        }
        "request" => {
            let Some(endpoint) = payload.endpoint.as_deref().filter(|e| !e.trim().is_empty())
            else {
                return bad_request("endpoint is required for request");
            };
            let body = payload.body.as_deref().unwrap_or("");
            state.controller.request(address, endpoint, body).await
        }
        "logout" => state.controller.logout(address).await,
        other => bad_request(&format!("Unknown action '{other}'")),
    }
}

fn bad_request(message: &str) -> RelayResponse {
    RelayResponse {
        ok: false,
        status: 400,
        status_text: message.to_string(),
        body: None,
        session_id: None,
    }
}
