//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables** — `NBRELAY_API_KEY`, `NBRELAY_LISTEN`
//! 2. **Config file** — path via `--config <path>`, or `nbrelay.toml` in CWD
//! 3. **Compiled defaults** — see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [server]
//! listen = "127.0.0.1:8873"
//!
//! [auth]
//! api_key = "your-secret-key"
//!
//! [relay]
//! session_timeout_minutes = 30   # default when the device sends no hint
//! login_timeout_ms = 10000       # per candidate probe
//! request_timeout_ms = 30000     # steady-state authenticated requests
//! auto_relogin = true            # one silent re-login on mid-session 401/conflict
//! relogin_on_existing = false    # login over a live session: false = no-op success
//!
//! [logging]
//! level = "info"
//! ```

use serde::Deserialize;
use std::path::Path;

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind (default `127.0.0.1:8873`). The relay sits next
    /// to the migration UI's backend, so it binds loopback by default.
    #[serde(default = "default_listen")]
    pub listen: String,
}

/// Authentication settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Pre-shared Bearer token for `/relay` and `/api/sessions`. Override with
    /// `NBRELAY_API_KEY`. Defaults to `"change-me"` which triggers a startup
    /// warning.
    #[serde(default = "default_api_key")]
    pub api_key: String,
}

/// Session and retry policy for device traffic.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Idle timeout applied to sessions when the device's login response
    /// carries no session-timeout hint (default 30).
    #[serde(default = "default_session_timeout_minutes")]
    pub session_timeout_minutes: u64,
    /// Timeout per login candidate probe in milliseconds (default 10 000).
    /// Login probes several base URLs, so each gets a shorter budget.
    #[serde(default = "default_login_timeout_ms")]
    pub login_timeout_ms: u64,
    /// Timeout for authenticated requests in milliseconds (default 30 000).
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// On a mid-session 401 or session-conflict, perform exactly one silent
    /// re-login with the remembered credentials and retry the request once
    /// (default true). When false, the caller gets a 401 and must re-issue
    /// login itself.
    #[serde(default = "default_auto_relogin")]
    pub auto_relogin: bool,
    /// When login is called for an address that already has a live session:
    /// `false` (default) returns a synthetic success without touching the
    /// device; `true` tears the old session down and logs in fresh.
    #[serde(default)]
    pub relogin_on_existing: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG` env var.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_listen() -> String {
    "127.0.0.1:8873".to_string()
}
fn default_api_key() -> String {
    "change-me".to_string()
}
fn default_session_timeout_minutes() -> u64 {
    30
}
fn default_login_timeout_ms() -> u64 {
    10_000
}
fn default_request_timeout_ms() -> u64 {
    30_000
}
fn default_auto_relogin() -> bool {
    true
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_key: default_api_key(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            session_timeout_minutes: default_session_timeout_minutes(),
            login_timeout_ms: default_login_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            auto_relogin: default_auto_relogin(),
            relogin_on_existing: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, reads that file (panics on failure). Otherwise
    /// looks for `nbrelay.toml` in the current directory, falling back to
    /// compiled defaults.
    pub fn load(path: Option<&str>) -> Self {
        let mut config: Config = if let Some(p) = path {
            let content = std::fs::read_to_string(p)
                .unwrap_or_else(|e| panic!("Failed to read config file {p}: {e}"));
            toml::from_str(&content)
                .unwrap_or_else(|e| panic!("Failed to parse config file {p}: {e}"))
        } else if Path::new("nbrelay.toml").exists() {
            let content =
                std::fs::read_to_string("nbrelay.toml").expect("Failed to read nbrelay.toml");
            toml::from_str(&content).expect("Failed to parse nbrelay.toml")
        } else {
            Config::default()
        };

        // Env var overrides
        if let Ok(key) = std::env::var("NBRELAY_API_KEY") {
            config.auth.api_key = key;
        }
        if let Ok(listen) = std::env::var("NBRELAY_LISTEN") {
            config.server.listen = listen;
        }

        config
    }
}
