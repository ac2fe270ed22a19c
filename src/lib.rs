#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::unused_async)]

//! nbrelay library — session relay between a browser migration UI and legacy
//! network appliances with cookie-authenticated XML management APIs.
//!
//! Building blocks:
//! - `candidates` — base-URL discovery order for device login
//! - `device` — XML envelopes/inspection and the outbound HTTP transport
//! - `sessions` — per-address session store
//! - `gate` — per-device serialization and login single-flight
//! - `controller` — login/request/logout orchestration
//! - `routes` — REST API route handlers
//! - `auth` — API key authentication middleware
//! - `config` — configuration loading

pub mod auth;
pub mod candidates;
pub mod config;
pub mod controller;
pub mod device;
pub mod gate;
pub mod routes;
pub mod sessions;
pub mod state;

// Re-export key types at crate root for convenience.
pub use auth::ApiKey;
pub use config::Config;
pub use controller::{RelayController, RelayResponse};
pub use gate::DeviceGate;
pub use sessions::SessionStore;
pub use state::AppState;
