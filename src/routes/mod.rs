//! HTTP route handlers.
//!
//! Each sub-module corresponds to an API endpoint. All handlers except
//! [`health`] require authentication via the [`crate::auth::require_api_key`]
//! middleware.

pub mod health;
pub mod relay;
pub mod sessions;
