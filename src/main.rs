#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # nbrelay
//!
//! Session relay for migrating firewall configuration objects off legacy
//! network-management appliances.
//!
//! The appliance exposes a stateful, cookie-authenticated XML API that a
//! browser cannot call directly (private IPs, self-signed TLS, CORS). nbrelay
//! sits next to the migration UI and mediates every call: it discovers the
//! device's API base URL, logs in and holds the cookie-bound session per
//! device address, serializes concurrent operations per device (the appliance
//! rejects concurrent sessions), and recovers from session-conflict or expiry
//! signals the device hides inside 200-OK XML bodies.
//!
//! ## API surface
//!
//! | Method | Path            | Auth | Description                           |
//! |--------|-----------------|------|---------------------------------------|
//! | GET    | `/api/health`   | No   | Liveness probe                        |
//! | GET    | `/api/sessions` | Yes  | List live device sessions             |
//! | POST   | `/relay`        | Yes  | Login / request / logout on a device  |
//!
//! ## Architecture
//!
//! ```text
//! main.rs          — entry point, clap subcommands, router setup, graceful shutdown
//! auth.rs          — Bearer token middleware, constant-time comparison
//! config.rs        — TOML + env-var configuration
//! candidates.rs    — base-URL probe order for device login
//! gate.rs          — per-device FIFO serialization + login single-flight
//! controller.rs    — login/request/logout orchestration and retry policy
//! sessions/
//!   mod.rs         — SessionStore (one session per device address, lazy expiry)
//! device/
//!   xml.rs         — XML envelopes, error-code extraction, cookie merging
//!   client.rs      — reqwest transport (no redirects, per-call TLS policy)
//! routes/
//!   health.rs      — GET /api/health
//!   sessions.rs    — GET /api/sessions
//!   relay.rs       — POST /relay
//! ```

use std::sync::Arc;
use std::time::Instant;

use axum::{
    middleware,
    routing::{get, post},
    Extension, Router,
};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use nbrelay::device::HttpDeviceTransport;
use nbrelay::{ApiKey, AppState, Config, DeviceGate, RelayController, SessionStore};

/// Session relay for legacy-appliance migrations.
#[derive(Parser)]
#[command(name = "nbrelay", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server (default when no subcommand given).
    Serve {
        /// Path to TOML config file.
        #[arg(long)]
        config: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Serve { config }) => run_server(config.as_deref()).await,
        None => run_server(None).await,
    }
}

async fn run_server(config_path: Option<&str>) {
    let config = Config::load(config_path);

    // Initialize tracing
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    info!("nbrelay v{} starting", env!("CARGO_PKG_VERSION"));
    info!("Listening on {}", config.server.listen);

    if config.auth.api_key == "change-me" {
        warn!("Using default API key — set NBRELAY_API_KEY or update config");
    }

    let transport = HttpDeviceTransport::new().expect("Failed to build device HTTP transport");
    let controller = RelayController::new(
        SessionStore::new(),
        DeviceGate::new(),
        Arc::new(transport),
        config.relay.clone(),
    );

    let state = AppState {
        config: Arc::new(config),
        start_time: Instant::now(),
        controller,
    };

    // Build router
    let public_routes = Router::new().route("/api/health", get(nbrelay::routes::health::health));

    let authed_routes = Router::new()
        .route("/relay", post(nbrelay::routes::relay::relay))
        .route(
            "/api/sessions",
            get(nbrelay::routes::sessions::list_sessions),
        )
        .layer(middleware::from_fn(nbrelay::auth::require_api_key));

    let app = Router::new()
        .merge(public_routes)
        .merge(authed_routes)
        .layer(Extension(ApiKey(state.config.auth.api_key.clone())))
        // The migration UI runs in a browser on another origin.
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    let listener = TcpListener::bind(&state.config.server.listen)
        .await
        .expect("Failed to bind");

    info!("Server ready");

    // Graceful shutdown
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("Failed to register SIGTERM");
            tokio::select! {
                _ = ctrl_c => info!("Received SIGINT"),
                _ = sigterm.recv() => info!("Received SIGTERM"),
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            info!("Received SIGINT");
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .expect("Server error");

    // No device-side cleanup on shutdown: remaining device sessions idle out
    // on their own, and the cookies die with this process.
    info!("Goodbye");
}
