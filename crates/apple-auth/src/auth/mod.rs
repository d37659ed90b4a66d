//! Apple identity token verification.
//!
//! Components, leaf first:
//!
//! - `jwks` - key-set document types and the HTTP fetcher
//! - `cache` - expiring single-slot cache with coalesced refresh
//! - `signers` - per-key verifier construction
//! - `store` - per-configuration key store and its lazy scope
//! - `verifier` - the verification pipeline
//! - `claims` - decoded identity token

pub mod cache;
pub mod claims;
pub mod jwks;
pub mod signers;
pub mod store;
pub mod verifier;

pub use cache::{CachePolicy, EndpointCache, Fetch, Fetched};
pub use claims::{Audience, IdentityToken, RealUserStatus};
pub use jwks::{Jwk, JwksFetcher, KeySet};
pub use signers::{SignerContext, SignerRegistry, SkippedKey, Verifier};
pub use store::{AppleKeyStore, AuthScope};
pub use verifier::TokenVerifier;
