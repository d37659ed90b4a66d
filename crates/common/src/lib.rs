//! Provider-agnostic utilities shared by the identity token crates.

#![warn(clippy::pedantic)]

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for JWT utilities (size limits, header inspection, iat checks)
pub mod jwt;
