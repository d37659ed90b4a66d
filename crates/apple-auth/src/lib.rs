//! Apple identity token verification library.
//!
//! Verifies "Sign in with Apple" identity tokens against Apple's published
//! signing keys. The key set is cached per configuration scope, refreshed
//! when it expires, and concurrent refreshes share one network call.
//!
//! # Architecture
//!
//! ```text
//! TokenVerifier -> AppleKeyStore -> EndpointCache -> JwksFetcher
//!                       |
//!                       +-> SignerRegistry -> SignerContext
//! ```
//!
//! # Modules
//!
//! - `auth` - Key-set cache, verifiers and the verification pipeline
//! - `config` - Configuration from environment
//! - `errors` - Error types with HTTP status code mapping
//! - `middleware` - Bearer token middleware
//! - `observability` - Metrics
//! - `handlers` / `routes` - Demo HTTP service

pub mod auth;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod observability;
pub mod routes;
