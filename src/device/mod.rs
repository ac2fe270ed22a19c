//! Outbound communication with the appliance's XML API.
//!
//! - [`xml`] — envelope builders and response inspection (pure functions)
//! - [`client`] — HTTP transport with per-call TLS and timeout settings

pub mod client;
pub mod xml;

pub use client::{DeviceError, DeviceResponse, DeviceTransport, HttpDeviceTransport};
