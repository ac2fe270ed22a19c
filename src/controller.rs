//! Relay orchestration: login, authenticated request, logout.
//!
//! [`RelayController`] ties the candidate resolver, XML codec, session store,
//! and per-device gate together to satisfy one inbound call. Every operation
//! runs under the gate's exclusive slot for its device address; login is
//! additionally single-flighted so concurrent login calls share one outbound
//! attempt instead of racing the appliance's single session slot.
//!
//! ## Policies
//!
//! - Login over an existing live session returns a synthetic success without
//!   touching the device (`relay.relogin_on_existing = true` flips this to
//!   tear-down-and-relogin).
//! - A mid-session 401 or code-29 conflict deletes the session and, with
//!   `relay.auto_relogin` (default), performs exactly one silent re-login
//!   against the remembered base URL and retries the request once. Never more
//!   than once.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::candidates::resolve_candidates;
use crate::config::RelayConfig;
use crate::device::xml::{self, LoginOutcome};
use crate::device::{DeviceError, DeviceTransport};
use crate::gate::DeviceGate;
use crate::sessions::{DeviceSession, SessionStore};

/// JSON envelope returned for every relay operation, success or failure.
///
/// `status` follows HTTP semantics; the UI special-cases `401` (no/invalid
/// session), `423` (device session conflict — back off and retry), and `503`
/// (device unreachable on every candidate).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayResponse {
    pub ok: bool,
    pub status: u16,
    pub status_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl RelayResponse {
    fn ok(status: u16, status_text: &str, body: Option<String>) -> Self {
        Self {
            ok: true,
            status,
            status_text: status_text.to_string(),
            body,
            session_id: None,
        }
    }

    fn fail(status: u16, status_text: impl Into<String>, body: Option<String>) -> Self {
        Self {
            ok: false,
            status,
            status_text: status_text.into(),
            body,
            session_id: None,
        }
    }

    fn with_session(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }
}

/// Orchestrates relay operations against devices.
///
/// Cloneable — clones share the store, gate, and transport.
#[derive(Clone)]
pub struct RelayController {
    store: SessionStore,
    gate: DeviceGate,
    transport: Arc<dyn DeviceTransport>,
    policy: RelayConfig,
}

impl RelayController {
    pub fn new(
        store: SessionStore,
        gate: DeviceGate,
        transport: Arc<dyn DeviceTransport>,
        policy: RelayConfig,
    ) -> Self {
        Self {
            store,
            gate,
            transport,
            policy,
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    fn login_timeout(&self) -> Duration {
        Duration::from_millis(self.policy.login_timeout_ms)
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.policy.request_timeout_ms)
    }

    fn session_idle_timeout(&self, hint_minutes: Option<u64>) -> Duration {
        Duration::from_secs(hint_minutes.unwrap_or(self.policy.session_timeout_minutes) * 60)
    }

    /// Log in to the device at `address`, discovering the API base URL.
    ///
    /// Single-flighted per address: concurrent calls share one attempt and
    /// one outcome.
    pub async fn login(
        &self,
        address: &str,
        username: &str,
        password: &str,
        verify_tls: bool,
        override_url: Option<&str>,
    ) -> RelayResponse {
        let address_owned = address.to_string();
        let username = username.to_string();
        let password = password.to_string();
        let override_url = override_url.map(ToString::to_string);
        self.gate
            .single_flight_login(address, || async move {
                self.login_locked(
                    &address_owned,
                    &username,
                    &password,
                    verify_tls,
                    override_url.as_deref(),
                )
                .await
            })
            .await
    }

    /// Login body, executed while holding the device's exclusive slot.
    async fn login_locked(
        &self,
        address: &str,
        username: &str,
        password: &str,
        verify_tls: bool,
        override_url: Option<&str>,
    ) -> RelayResponse {
        if let Some(existing) = self.store.get(address).await {
            if self.policy.relogin_on_existing {
                info!(address, "replacing live session before re-login");
                self.best_effort_logout(&existing).await;
                self.store.delete(address).await;
            } else {
                debug!(address, "login no-op, session already live");
                return RelayResponse::ok(200, "Already logged in", None)
                    .with_session(&existing.session_id);
            }
        }

        let candidates = resolve_candidates(address, override_url);
        let envelope = xml::login_envelope(&Uuid::new_v4().to_string(), username, password);

        let mut last_url = String::new();
        let mut last_body: Option<String> = None;

        for base_url in &candidates {
            let url = format!("{base_url}/login");
            last_url = url.clone();
            debug!(address, %url, "login probe");

            let response = match self
                .transport
                .post_xml(&url, &envelope, None, verify_tls, self.login_timeout())
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    debug!(address, %url, error = %e, "login candidate failed");
                    last_body = Some(e.to_string());
                    continue;
                }
            };

            match xml::parse_login_outcome(response.status, &response.body) {
                LoginOutcome::Success {
                    session_timeout_minutes,
                } => {
                    let cookie = xml::extract_set_cookie_pairs(&response.set_cookie);
                    let session = DeviceSession::new(
                        cookie,
                        base_url.clone(),
                        username.to_string(),
                        password.to_string(),
                        verify_tls,
                        self.session_idle_timeout(session_timeout_minutes),
                    );
                    let session_id = session.session_id.clone();
                    info!(address, %base_url, "login succeeded");
                    self.store.put(address, session).await;
                    return RelayResponse::ok(200, "OK", Some(response.body))
                        .with_session(&session_id);
                }
                LoginOutcome::SessionConflict { message } => {
                    // Device-wide condition — further candidates would only
                    // hammer the stuck session.
                    warn!(address, "device reports session conflict");
                    return RelayResponse::fail(
                        423,
                        message.unwrap_or_else(|| "Device session in use".to_string()),
                        Some(response.body),
                    );
                }
                LoginOutcome::ApplicationError { code, message } => {
                    debug!(address, %url, code, "login candidate rejected");
                    last_body = Some(message.unwrap_or(response.body));
                }
                LoginOutcome::HttpError { status } => {
                    debug!(address, %url, status, "login candidate returned error status");
                    last_body = Some(response.body);
                }
            }
        }

        warn!(address, %last_url, "login failed on all candidates");
        RelayResponse::fail(
            503,
            format!("Device API unreachable (last tried {last_url})"),
            last_body,
        )
    }

    /// Forward an authenticated request to the device.
    pub async fn request(&self, address: &str, endpoint: &str, body: &str) -> RelayResponse {
        let _guard = self.gate.lock(address).await;
        self.request_locked(address, endpoint, body, false).await
    }

    /// Request body, executed while holding the device's exclusive slot.
    ///
    /// `retried` is true on the single post-relogin retry; a second auth
    /// failure then surfaces to the caller instead of looping.
    async fn request_locked(
        &self,
        address: &str,
        endpoint: &str,
        body: &str,
        retried: bool,
    ) -> RelayResponse {
        let Some(session) = self.store.get(address).await else {
            return RelayResponse::fail(401, "No session", None);
        };

        let url = join_endpoint(&session.base_url, endpoint);
        let response = match self
            .transport
            .post_xml(
                &url,
                body,
                Some(&session.cookie),
                session.verify_tls,
                self.request_timeout(),
            )
            .await
        {
            Ok(r) => r,
            // A transport failure says nothing about session validity, so it
            // surfaces directly without triggering re-login.
            Err(DeviceError::Timeout) => {
                return RelayResponse::fail(504, "Device request timed out", None);
            }
            Err(e) => {
                return RelayResponse::fail(502, e.to_string(), None);
            }
        };

        let auth_failed = response.status == 401 || xml::contains_session_conflict(&response.body);
        if auth_failed {
            warn!(address, status = response.status, retried, "session invalidated by device");
            self.store.delete(address).await;

            if !self.policy.auto_relogin || retried {
                return RelayResponse::fail(401, "Session expired", Some(response.body));
            }
            if let Err(failure) = self.relogin(address, &session).await {
                return failure;
            }
            return Box::pin(self.request_locked(address, endpoint, body, true)).await;
        }

        self.store.touch(address).await;
        let ok = (200..300).contains(&response.status);
        if ok {
            RelayResponse::ok(response.status, "OK", Some(response.body))
        } else {
            // Non-conflict device errors are the caller's to interpret.
            RelayResponse::fail(
                response.status,
                status_text(response.status),
                Some(response.body),
            )
        }
    }

    /// One silent re-login against the remembered base URL, skipping
    /// candidate discovery.
    async fn relogin(&self, address: &str, old: &DeviceSession) -> Result<(), RelayResponse> {
        info!(address, base_url = %old.base_url, "silent re-login");
        let envelope =
            xml::login_envelope(&Uuid::new_v4().to_string(), &old.username, &old.password);
        let url = format!("{}/login", old.base_url);

        let response = self
            .transport
            .post_xml(&url, &envelope, None, old.verify_tls, self.login_timeout())
            .await
            .map_err(|e| RelayResponse::fail(401, format!("Re-login failed: {e}"), None))?;

        match xml::parse_login_outcome(response.status, &response.body) {
            LoginOutcome::Success {
                session_timeout_minutes,
            } => {
                let cookie = xml::extract_set_cookie_pairs(&response.set_cookie);
                let session = DeviceSession::new(
                    cookie,
                    old.base_url.clone(),
                    old.username.clone(),
                    old.password.clone(),
                    old.verify_tls,
                    self.session_idle_timeout(session_timeout_minutes),
                );
                self.store.put(address, session).await;
                Ok(())
            }
            LoginOutcome::SessionConflict { message } => Err(RelayResponse::fail(
                423,
                message.unwrap_or_else(|| "Device session in use".to_string()),
                Some(response.body),
            )),
            _ => Err(RelayResponse::fail(
                401,
                "Session expired",
                Some(response.body),
            )),
        }
    }

    /// Log out of the device at `address`. Idempotent; never fails.
    pub async fn logout(&self, address: &str) -> RelayResponse {
        let _guard = self.gate.lock(address).await;

        // Local state goes first — freeing the device's session slot must not
        // depend on the device answering.
        let Some(session) = self.store.delete(address).await else {
            return RelayResponse::ok(200, "No session", None);
        };

        self.best_effort_logout(&session).await;
        info!(address, "logged out");
        RelayResponse::ok(200, "OK", None)
    }

    /// Send a logout for `session`, swallowing every failure.
    async fn best_effort_logout(&self, session: &DeviceSession) {
        let envelope = xml::logout_envelope(&Uuid::new_v4().to_string());
        let url = format!("{}/logout", session.base_url);
        match self
            .transport
            .post_xml(
                &url,
                &envelope,
                Some(&session.cookie),
                session.verify_tls,
                self.request_timeout(),
            )
            .await
        {
            Ok(r) if (200..300).contains(&r.status) => {}
            Ok(r) => debug!(%url, status = r.status, "device logout rejected, ignoring"),
            Err(e) => debug!(%url, error = %e, "device logout failed, ignoring"),
        }
    }
}

/// Resolve a caller-supplied endpoint path against the session's base URL,
/// collapsing a duplicated API prefix.
///
/// The stored base URL already ends with the API path (e.g. `/nbi/v1`); UI
/// code sometimes passes endpoints with that prefix repeated.
fn join_endpoint(base_url: &str, endpoint: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let mut path = endpoint.trim().to_string();
    if !path.starts_with('/') {
        path.insert(0, '/');
    }

    // Path portion of the base URL, e.g. "/nbi/v1" from "https://h:9443/nbi/v1".
    let base_path = base
        .find("://")
        .map(|i| &base[i + 3..])
        .and_then(|rest| rest.find('/').map(|i| &rest[i..]))
        .unwrap_or("");

    if !base_path.is_empty() {
        if path == base_path {
            path.clear();
        } else if let Some(stripped) = path.strip_prefix(&format!("{base_path}/")) {
            path = format!("/{stripped}");
        }
    }

    format!("{base}{path}")
}

fn status_text(status: u16) -> String {
    match status {
        400 => "Bad Request".to_string(),
        401 => "Unauthorized".to_string(),
        403 => "Forbidden".to_string(),
        404 => "Not Found".to_string(),
        423 => "Locked".to_string(),
        500 => "Internal Server Error".to_string(),
        502 => "Bad Gateway".to_string(),
        503 => "Service Unavailable".to_string(),
        504 => "Gateway Timeout".to_string(),
        other => format!("HTTP {other}"),
    }
}
