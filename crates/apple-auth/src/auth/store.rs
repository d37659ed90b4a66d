//! Per-configuration key store.
//!
//! [`AppleKeyStore`] owns the key-set endpoint, the optional application
//! identifier and the [`EndpointCache`] bound to that endpoint. It is built
//! lazily, once, by [`AuthScope::apple`]; separate scopes never share state.

use crate::auth::cache::{CachePolicy, EndpointCache, Fetch};
use crate::auth::jwks::{build_http_client, JwksFetcher, KeySet};
use crate::auth::signers::{SignerContext, SignerRegistry};
use crate::auth::verifier::TokenVerifier;
use crate::config::{validate_url, Config, ConfigError};
use crate::errors::AuthError;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use std::time::Duration;
use tracing::instrument;

/// Label for the key-set cache in logs and metrics.
const APPLE_CACHE: &str = "apple";

struct EndpointState {
    uri: String,
    cache: Arc<EndpointCache<KeySet>>,
}

/// Key-set endpoint, cache and audience setting for one configuration scope.
pub struct AppleKeyStore {
    endpoint: RwLock<EndpointState>,
    application_identifier: RwLock<Option<String>>,
    http_client: reqwest::Client,
    policy: CachePolicy,
    issuer: String,
    clock_skew: Duration,
}

impl AppleKeyStore {
    /// Build a store with an empty cache. Nothing is fetched until the first
    /// verification.
    pub fn new(config: &Config) -> Self {
        let http_client = build_http_client(config.jwks_http_timeout);
        let policy = CachePolicy::from_config(config);
        let cache = new_cache(&config.jwks_url, &http_client, policy);

        Self {
            endpoint: RwLock::new(EndpointState {
                uri: config.jwks_url.clone(),
                cache,
            }),
            application_identifier: RwLock::new(config.application_identifier.clone()),
            http_client,
            policy,
            issuer: config.issuer.clone(),
            clock_skew: config.jwt_clock_skew,
        }
    }

    /// Current key-set endpoint.
    pub fn endpoint(&self) -> String {
        self.endpoint
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .uri
            .clone()
    }

    /// Point the store at a new key-set endpoint.
    ///
    /// The cache is replaced by an empty one bound to `uri`, so once this
    /// returns no lookup can see keys fetched from the previous endpoint.
    /// A refresh still running against the old endpoint finishes into the
    /// discarded cache.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidUrl` if `uri` is not an absolute http(s)
    /// URL; the store is left unchanged.
    pub fn set_endpoint(&self, uri: impl Into<String>) -> Result<(), ConfigError> {
        let uri = validate_url("endpoint", &uri.into())?;

        let cache = new_cache(&uri, &self.http_client, self.policy);
        let mut endpoint = self
            .endpoint
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let previous = std::mem::replace(&mut *endpoint, EndpointState { uri, cache });
        drop(endpoint);

        tracing::info!(
            target: "apple_auth.store",
            previous = %previous.uri,
            "Key set endpoint changed, cache reset"
        );
        Ok(())
    }

    /// Expected audience used when a caller does not supply one.
    pub fn application_identifier(&self) -> Option<String> {
        self.application_identifier
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_application_identifier(&self, identifier: Option<String>) {
        *self
            .application_identifier
            .write()
            .unwrap_or_else(PoisonError::into_inner) = identifier;
    }

    /// Required `iss` claim.
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Leeway for `exp` and `iat`.
    pub fn clock_skew(&self) -> Duration {
        self.clock_skew
    }

    fn cache(&self) -> Arc<EndpointCache<KeySet>> {
        Arc::clone(
            &self
                .endpoint
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .cache,
        )
    }

    /// Current key set, fetching it if absent or expired.
    pub async fn key_set(&self) -> Result<Arc<KeySet>, AuthError> {
        Ok(self.cache().get().await?)
    }

    /// Verifiers for the current key set.
    ///
    /// # Errors
    ///
    /// - `AuthError::NetworkError` / `AuthError::DecodeError` - the refresh failed
    /// - `AuthError::NoUsableKeys` - no key in the set can verify tokens
    #[instrument(skip_all)]
    pub async fn signers(&self) -> Result<SignerContext, AuthError> {
        let key_set = self.key_set().await?;
        Ok(SignerRegistry::build(&key_set)?)
    }

    /// Refetch the key set now, regardless of expiry.
    ///
    /// On failure an unexpired cached set stays in use.
    #[instrument(skip_all)]
    pub async fn refresh(&self) -> Result<Arc<KeySet>, AuthError> {
        Ok(self.cache().force_refresh().await?)
    }

    /// Time until the cached key set expires, if one is cached and fresh.
    pub fn key_set_ttl(&self) -> Option<Duration> {
        self.cache().time_to_live()
    }

    /// Verifier backed by this store.
    pub fn verifier(&self) -> TokenVerifier<'_> {
        TokenVerifier::new(self)
    }
}

fn new_cache(
    uri: &str,
    http_client: &reqwest::Client,
    policy: CachePolicy,
) -> Arc<EndpointCache<KeySet>> {
    let fetcher: Arc<dyn Fetch<KeySet>> =
        Arc::new(JwksFetcher::new(uri.to_string(), http_client.clone()));
    Arc::new(EndpointCache::new(APPLE_CACHE, fetcher, policy))
}

/// One configuration scope and its lazily built key store.
///
/// The store is constructed on first access, exactly once even under
/// concurrent first access; later accesses take no lock.
pub struct AuthScope {
    config: Config,
    apple: OnceLock<AppleKeyStore>,
}

impl AuthScope {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            apple: OnceLock::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The scope's Apple key store, built on first call.
    pub fn apple(&self) -> &AppleKeyStore {
        self.apple.get_or_init(|| {
            tracing::info!(
                target: "apple_auth.store",
                endpoint = %self.config.jwks_url,
                "Initializing Apple key store"
            );
            AppleKeyStore::new(&self.config)
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.apple.get().is_some()
    }
}
