//! Key-set document types and the HTTP fetcher for the provider's endpoint.
//!
//! The fetcher performs exactly one GET per call. Caching, expiry and
//! request coalescing live in [`crate::auth::cache`]; retries are left to
//! the caller.
//!
//! # Security
//!
//! - Response bodies are size-limited while they are read, before JSON
//!   parsing
//! - Duplicate key IDs make the whole document invalid, so a key ID can
//!   never resolve to two different keys
//! - HTTPS should be used in production (enforced by deployment config)

use crate::auth::cache::{Fetch, Fetched};
use crate::errors::FetchError;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, CACHE_CONTROL, ETAG, IF_NONE_MATCH};
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use tracing::instrument;

/// Maximum accepted key-set document size (1 MiB).
pub const MAX_KEY_SET_BYTES: usize = 1024 * 1024;

/// Connection timeout for the key-set endpoint.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// JSON Web Key as published by the provider.
///
/// Only public parameters are modelled. Which ones are present depends on
/// `kty`: RSA keys carry `n`/`e`, EC keys `crv`/`x`/`y`, OKP keys `crv`/`x`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Jwk {
    /// Key type ("RSA", "EC" or "OKP").
    pub kty: String,

    /// Key ID - used to select the correct key for verification.
    pub kid: String,

    /// Algorithm the key is meant for (e.g. "RS256").
    #[serde(default)]
    pub alg: Option<String>,

    /// Key use ("sig" for signing).
    #[serde(default, rename = "use")]
    pub key_use: Option<String>,

    /// RSA modulus (base64url).
    #[serde(default)]
    pub n: Option<String>,

    /// RSA public exponent (base64url).
    #[serde(default)]
    pub e: Option<String>,

    /// Curve name for EC and OKP keys.
    #[serde(default)]
    pub crv: Option<String>,

    /// EC x coordinate or OKP public key (base64url).
    #[serde(default)]
    pub x: Option<String>,

    /// EC y coordinate (base64url).
    #[serde(default)]
    pub y: Option<String>,
}

#[derive(Deserialize)]
struct KeySetDocument {
    keys: Vec<Jwk>,
}

/// An immutable set of keys from one successful fetch.
///
/// Key IDs are unique and document order is preserved. A refresh replaces
/// the whole set; it is never modified in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySet {
    keys: Vec<Jwk>,
}

impl KeySet {
    /// Build a key set, rejecting duplicate key IDs.
    pub fn new(keys: Vec<Jwk>) -> Result<Self, FetchError> {
        let mut seen = HashSet::with_capacity(keys.len());
        for key in &keys {
            if !seen.insert(key.kid.as_str()) {
                return Err(FetchError::Decode(format!(
                    "duplicate key id '{}' in key set",
                    key.kid
                )));
            }
        }

        Ok(Self { keys })
    }

    /// Parse a `{"keys": [...]}` document.
    pub fn from_slice(body: &[u8]) -> Result<Self, FetchError> {
        if body.len() > MAX_KEY_SET_BYTES {
            return Err(FetchError::Decode(format!(
                "document is {} bytes, limit is {}",
                body.len(),
                MAX_KEY_SET_BYTES
            )));
        }

        let document: KeySetDocument = serde_json::from_slice(body)
            .map_err(|e| FetchError::Decode(format!("invalid key set JSON: {e}")))?;

        Self::new(document.keys)
    }

    pub fn keys(&self) -> &[Jwk] {
        &self.keys
    }

    /// Look up a key by ID.
    pub fn get(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|key| key.kid == kid)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Build the shared HTTP client used for key-set requests.
pub fn build_http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(target: "apple_auth.jwks", error = %e, "Failed to build HTTP client with custom config, using defaults");
            reqwest::Client::new()
        })
}

/// Fetches the key set from one endpoint.
///
/// Bound to a single URI for its whole life; pointing the store at a new
/// endpoint builds a new fetcher.
#[derive(Debug, Clone)]
pub struct JwksFetcher {
    uri: String,
    http_client: reqwest::Client,
}

impl JwksFetcher {
    pub fn new(uri: String, http_client: reqwest::Client) -> Self {
        Self { uri, http_client }
    }
}

#[async_trait]
impl Fetch<KeySet> for JwksFetcher {
    #[instrument(skip_all, fields(uri = %self.uri))]
    async fn fetch(&self, etag: Option<&str>) -> Result<Fetched<KeySet>, FetchError> {
        tracing::debug!(target: "apple_auth.jwks", url = %self.uri, revalidate = etag.is_some(), "Fetching key set");

        let mut request = self.http_client.get(&self.uri);
        if let Some(etag) = etag {
            request = request.header(IF_NONE_MATCH, etag);
        }

        let mut response = request.send().await.map_err(|e| {
            tracing::error!(target: "apple_auth.jwks", error = %e, "Failed to fetch key set");
            FetchError::Network(format!("request failed: {e}"))
        })?;

        let status = response.status();
        let max_age = parse_cache_control(response.headers());

        if status == StatusCode::NOT_MODIFIED {
            tracing::debug!(target: "apple_auth.jwks", "Key set not modified");
            return Ok(Fetched::NotModified { max_age });
        }

        if !status.is_success() {
            tracing::error!(
                target: "apple_auth.jwks",
                status = %status,
                "Key set endpoint returned error"
            );
            return Err(FetchError::Network(format!("unexpected status {status}")));
        }

        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|value| value.to_str().ok())
            .map(ToString::to_string);

        let body = read_limited(&mut response).await?;

        let key_set = KeySet::from_slice(&body).map_err(|e| {
            tracing::error!(target: "apple_auth.jwks", error = %e, "Failed to parse key set response");
            e
        })?;

        tracing::info!(
            target: "apple_auth.jwks",
            key_count = key_set.len(),
            max_age_secs = max_age.map(|age| age.as_secs()),
            "Key set fetched"
        );

        Ok(Fetched::Modified {
            value: key_set,
            etag,
            max_age,
        })
    }
}

/// Extract the freshness lifetime from `Cache-Control`.
///
/// `no-store` and `no-cache` yield zero (the cache clamps it to its minimum).
/// Otherwise the first parseable `max-age` wins. `None` means the response
/// said nothing usable.
pub fn parse_cache_control(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(CACHE_CONTROL)?.to_str().ok()?;

    let mut max_age = None;
    for directive in value.split(',') {
        let directive = directive.trim().to_ascii_lowercase();
        if directive == "no-store" || directive == "no-cache" {
            return Some(Duration::ZERO);
        }
        if max_age.is_none() {
            max_age = directive
                .strip_prefix("max-age=")
                .and_then(|secs| secs.trim_matches('"').parse::<u64>().ok())
                .map(Duration::from_secs);
        }
    }

    max_age
}

/// Read the response body, giving up as soon as it exceeds
/// [`MAX_KEY_SET_BYTES`].
async fn read_limited(response: &mut reqwest::Response) -> Result<Vec<u8>, FetchError> {
    let too_large = |len: u64| {
        tracing::error!(target: "apple_auth.jwks", bytes = len, "Key set response too large");
        FetchError::Decode(format!(
            "document exceeds {} bytes (at least {} received)",
            MAX_KEY_SET_BYTES, len
        ))
    };
    let limit = MAX_KEY_SET_BYTES as u64;

    if let Some(declared) = response.content_length() {
        if declared > limit {
            return Err(too_large(declared));
        }
    }

    let mut body = Vec::new();
    loop {
        let chunk = response.chunk().await.map_err(|e| {
            tracing::error!(target: "apple_auth.jwks", error = %e, "Failed to read key set body");
            FetchError::Network(format!("failed to read body: {e}"))
        })?;
        let Some(chunk) = chunk else {
            return Ok(body);
        };

        let received = body.len().saturating_add(chunk.len());
        if received > MAX_KEY_SET_BYTES {
            return Err(too_large(received as u64));
        }
        body.extend_from_slice(&chunk);
    }
}
