//! HTTP middleware for the demo service.
//!
//! # Components
//!
//! - `auth` - Identity token middleware for protected routes

pub mod auth;

pub use auth::{bearer_token, require_apple_identity, IdentityExt};
