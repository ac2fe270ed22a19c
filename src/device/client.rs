//! HTTP transport to the appliance.
//!
//! All device traffic is `POST` with an XML body. Redirects are never
//! followed — a login response that redirects is a wrong candidate, not a
//! destination — and cookies are attached explicitly rather than via a cookie
//! store, because the relay owns cookie lifetime, not the HTTP client.
//!
//! The transport is a trait so the relay controller can be exercised against
//! a scripted fake in tests.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, COOKIE, SET_COOKIE};
use reqwest::redirect::Policy;
use tracing::debug;

/// A raw response from the device, before any XML interpretation.
#[derive(Debug, Clone)]
pub struct DeviceResponse {
    pub status: u16,
    pub body: String,
    /// Raw `Set-Cookie` header values in response order.
    pub set_cookie: Vec<String>,
}

/// Transport-level failure reaching the device at all.
///
/// HTTP error statuses are not errors at this layer — they come back as a
/// [`DeviceResponse`] for the controller to classify.
#[derive(Debug)]
pub enum DeviceError {
    /// Connection refused, DNS failure, TLS handshake failure, etc.
    Connect(String),
    /// The call exceeded its timeout budget.
    Timeout,
    /// The candidate URL could not be parsed or the request could not be built.
    InvalidUrl(String),
}

impl std::fmt::Display for DeviceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceError::Connect(e) => write!(f, "Device unreachable: {e}"),
            DeviceError::Timeout => write!(f, "Device call timed out"),
            DeviceError::InvalidUrl(u) => write!(f, "Invalid device URL: {u}"),
        }
    }
}

/// Outbound POST of an XML body to the device.
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    async fn post_xml(
        &self,
        url: &str,
        body: &str,
        cookie: Option<&str>,
        verify_tls: bool,
        timeout: Duration,
    ) -> Result<DeviceResponse, DeviceError>;
}

/// Production transport backed by two prebuilt `reqwest` clients — one that
/// verifies TLS certificates and one that accepts anything, since these
/// appliances almost universally ship self-signed certs.
pub struct HttpDeviceTransport {
    verified: reqwest::Client,
    insecure: reqwest::Client,
}

impl HttpDeviceTransport {
    pub fn new() -> Result<Self, String> {
        let verified = reqwest::Client::builder()
            .redirect(Policy::none())
            .build()
            .map_err(|e| format!("Failed to build HTTP client: {e}"))?;
        let insecure = reqwest::Client::builder()
            .redirect(Policy::none())
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| format!("Failed to build insecure HTTP client: {e}"))?;
        Ok(Self { verified, insecure })
    }
}

#[async_trait]
impl DeviceTransport for HttpDeviceTransport {
    async fn post_xml(
        &self,
        url: &str,
        body: &str,
        cookie: Option<&str>,
        verify_tls: bool,
        timeout: Duration,
    ) -> Result<DeviceResponse, DeviceError> {
        let client = if verify_tls {
            &self.verified
        } else {
            &self.insecure
        };

        let mut request = client
            .post(url)
            .timeout(timeout)
            .header(CONTENT_TYPE, "application/xml")
            .body(body.to_string());
        if let Some(cookie) = cookie {
            request = request.header(COOKIE, cookie.to_string());
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                DeviceError::Timeout
            } else if e.is_builder() {
                DeviceError::InvalidUrl(url.to_string())
            } else {
                DeviceError::Connect(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let set_cookie = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok().map(ToString::to_string))
            .collect();
        let body = response
            .text()
            .await
            .map_err(|e| DeviceError::Connect(e.to_string()))?;

        debug!(url, status, bytes = body.len(), "device response");
        Ok(DeviceResponse {
            status,
            body,
            set_cookie,
        })
    }
}
