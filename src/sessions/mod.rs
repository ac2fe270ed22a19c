//! Device session storage.
//!
//! [`SessionStore`] is the single authority for the authenticated relationship
//! with each appliance: one [`DeviceSession`] per device address, created on
//! successful login and deleted on logout, conflict, or expiry. Sessions are
//! purely in-memory — a relay restart loses them by design, since the cookie
//! is only meaningful against the live device-side session, which will idle
//! out on its own.
//!
//! Expiry is checked lazily on access rather than by a background sweep; a
//! stale entry costs nothing until someone asks for it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// One authenticated relationship with a device.
#[derive(Debug, Clone)]
pub struct DeviceSession {
    /// Caller-visible identifier for this session, informational only.
    pub session_id: String,
    /// Merged `name=value` cookie pairs from the device's login response.
    /// Opaque — never parsed, only echoed back in `Cookie` headers.
    pub cookie: String,
    /// The candidate base URL that won login. Requests and logout target this
    /// URL so discovery never reruns mid-session.
    pub base_url: String,
    /// Credentials remembered for the single silent re-login after a
    /// mid-session 401/conflict.
    pub username: String,
    pub password: String,
    /// Whether outbound calls for this session verify the device's TLS cert.
    pub verify_tls: bool,
    /// Epoch milliseconds when the session was created.
    pub created_at: u64,
    /// Last time the session was used for an authenticated request.
    pub last_used_at: Instant,
    /// Idle deadline, refreshed on each use.
    pub expires_at: Instant,
    /// Idle timeout applied when refreshing `expires_at`.
    pub idle_timeout: Duration,
}

impl DeviceSession {
    /// Create a fresh session for a successful login.
    pub fn new(
        cookie: String,
        base_url: String,
        username: String,
        password: String,
        verify_tls: bool,
        idle_timeout: Duration,
    ) -> Self {
        let now = Instant::now();
        Self {
            session_id: Uuid::new_v4().to_string(),
            cookie,
            base_url,
            username,
            password,
            verify_tls,
            created_at: epoch_ms(),
            last_used_at: now,
            expires_at: now + idle_timeout,
            idle_timeout,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Summary of a live session for the operator-facing listing endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionListItem {
    pub device_address: String,
    pub session_id: String,
    pub base_url: String,
    pub created_at: u64,
    pub idle_secs: u64,
    pub expires_in_secs: u64,
}

/// Address-keyed table of live device sessions.
///
/// Cloneable — all clones share the same inner map. All mutation goes through
/// the relay controller while it holds the per-device gate, so the `RwLock`
/// only arbitrates between different addresses.
#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, DeviceSession>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the live session for `address`, if any.
    ///
    /// An expired entry is removed on the spot and reported as absent.
    pub async fn get(&self, address: &str) -> Option<DeviceSession> {
        {
            let sessions = self.sessions.read().await;
            match sessions.get(address) {
                Some(s) if !s.is_expired() => return Some(s.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        // Expired — upgrade to a write lock and drop it.
        let mut sessions = self.sessions.write().await;
        if sessions.get(address).is_some_and(DeviceSession::is_expired) {
            debug!(address, "dropping expired session");
            sessions.remove(address);
        }
        None
    }

    /// Store `session` for `address`, replacing any prior session.
    ///
    /// Returns the displaced session so the caller can best-effort log it out
    /// device-side.
    pub async fn put(&self, address: &str, session: DeviceSession) -> Option<DeviceSession> {
        self.sessions
            .write()
            .await
            .insert(address.to_string(), session)
    }

    /// Remove and return the session for `address`.
    pub async fn delete(&self, address: &str) -> Option<DeviceSession> {
        self.sessions.write().await.remove(address)
    }

    /// Refresh the idle deadline for `address` after an authenticated request.
    pub async fn touch(&self, address: &str) {
        let mut sessions = self.sessions.write().await;
        if let Some(s) = sessions.get_mut(address) {
            let now = Instant::now();
            s.last_used_at = now;
            s.expires_at = now + s.idle_timeout;
        }
    }

    /// Number of live (unexpired) sessions.
    pub async fn count(&self) -> usize {
        let sessions = self.sessions.read().await;
        sessions.values().filter(|s| !s.is_expired()).count()
    }

    /// Snapshot of live sessions for the listing endpoint.
    pub async fn list(&self) -> Vec<SessionListItem> {
        let now = Instant::now();
        let sessions = self.sessions.read().await;
        let mut items: Vec<SessionListItem> = sessions
            .iter()
            .filter(|(_, s)| !s.is_expired())
            .map(|(address, s)| SessionListItem {
                device_address: address.clone(),
                session_id: s.session_id.clone(),
                base_url: s.base_url.clone(),
                created_at: s.created_at,
                idle_secs: now.duration_since(s.last_used_at).as_secs(),
                expires_in_secs: s.expires_at.saturating_duration_since(now).as_secs(),
            })
            .collect();
        items.sort_by(|a, b| a.device_address.cmp(&b.device_address));
        items
    }
}

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(idle_timeout: Duration) -> DeviceSession {
        DeviceSession::new(
            "asCookie=XYZ".to_string(),
            "https://10.0.0.1/nbi/v1".to_string(),
            "admin".to_string(),
            "secret".to_string(),
            true,
            idle_timeout,
        )
    }

    #[tokio::test]
    async fn test_put_get_delete_roundtrip() {
        let store = SessionStore::new();
        store
            .put("10.0.0.1", session(Duration::from_secs(60)))
            .await;
        let got = store.get("10.0.0.1").await.unwrap();
        assert_eq!(got.cookie, "asCookie=XYZ");
        assert!(store.delete("10.0.0.1").await.is_some());
        assert!(store.get("10.0.0.1").await.is_none());
    }

    #[tokio::test]
    async fn test_put_replaces_and_returns_prior_session() {
        let store = SessionStore::new();
        store
            .put("10.0.0.1", session(Duration::from_secs(60)))
            .await;
        let mut next = session(Duration::from_secs(60));
        next.cookie = "asCookie=NEW".to_string();
        let displaced = store.put("10.0.0.1", next).await.unwrap();
        assert_eq!(displaced.cookie, "asCookie=XYZ");
        assert_eq!(store.count().await, 1);
    }

    #[tokio::test]
    async fn test_expired_session_dropped_lazily() {
        let store = SessionStore::new();
        store.put("10.0.0.1", session(Duration::ZERO)).await;
        assert!(store.get("10.0.0.1").await.is_none());
        assert_eq!(store.count().await, 0);
    }

    #[tokio::test]
    async fn test_touch_extends_deadline() {
        let store = SessionStore::new();
        store
            .put("10.0.0.1", session(Duration::from_millis(80)))
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        store.touch("10.0.0.1").await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        // 100ms elapsed, but touch reset the 80ms window at the 50ms mark.
        assert!(store.get("10.0.0.1").await.is_some());
    }

    #[tokio::test]
    async fn test_list_reports_live_sessions() {
        let store = SessionStore::new();
        store
            .put("10.0.0.2", session(Duration::from_secs(60)))
            .await;
        store
            .put("10.0.0.1", session(Duration::from_secs(60)))
            .await;
        let items = store.list().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].device_address, "10.0.0.1");
        assert_eq!(items[1].device_address, "10.0.0.2");
    }
}
