//! # Apple Auth Test Utilities
//!
//! Shared test utilities for identity token verification.
//!
//! This crate provides:
//! - Signing keypairs that publish themselves as JWKs (Ed25519, P-256)
//! - An identity token claims builder
//! - A mock key-set endpoint built on `wiremock`
//!
//! ## Usage
//!
//! ```rust,ignore
//! use apple_auth_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let keypair = TestKeypair::ed25519(1, "key-1");
//!     let jwks = MockJwksServer::start().await;
//!     jwks.serve_keys(&[&keypair]).await;
//!
//!     let token = keypair.sign(&TestIdentityTokenBuilder::new().for_user("alice").build());
//! }
//! ```

pub mod crypto_fixtures;
pub mod jwks_server;
pub mod token_builders;

// Re-export commonly used items
pub use crypto_fixtures::*;
pub use jwks_server::*;
pub use token_builders::*;
