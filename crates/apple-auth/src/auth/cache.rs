//! Single-slot expiring cache with coalesced refresh.
//!
//! [`EndpointCache`] holds one value fetched from a remote endpoint plus its
//! expiry. Readers get the cached value without I/O while it is fresh. Once
//! it is absent or expired, the first reader starts a refresh and every
//! reader that arrives before that refresh finishes waits on the same
//! result, so N concurrent misses cost one network call.
//!
//! # Concurrency
//!
//! - The value, its expiry and the in-flight slot sit behind one mutex that
//!   is only held for check-and-swap, never across the network call
//! - The refresh runs on its own task and publishes through a
//!   `tokio::sync::watch` channel; dropping a waiting caller does not cancel it
//! - The new value is stored before waiters are released, so a reader that
//!   starts after a waiter returns sees the same or a newer value
//!
//! # Failure
//!
//! A failed refresh leaves the stored value untouched and hands the same
//! error to every waiter. An expired value is never served after a failure.

use crate::config::Config;
use crate::errors::FetchError;
use crate::observability::metrics;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::instrument;

/// Result of one fetch against the endpoint.
#[derive(Debug)]
pub enum Fetched<T> {
    /// A new document.
    Modified {
        value: T,
        /// Validator to send with the next request.
        etag: Option<String>,
        /// Provider-supplied freshness lifetime, if any.
        max_age: Option<Duration>,
    },

    /// The endpoint confirmed the cached document is still current.
    NotModified { max_age: Option<Duration> },
}

/// Source of values for an [`EndpointCache`].
#[async_trait]
pub trait Fetch<T>: Send + Sync {
    /// Fetch the current value. `etag` is the validator of the cached value,
    /// when there is one, for conditional requests.
    async fn fetch(&self, etag: Option<&str>) -> Result<Fetched<T>, FetchError>;
}

/// How long a fetched value stays fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    /// Lifetime when the response carries no `max-age`.
    pub default_ttl: Duration,
    pub min_ttl: Duration,
    pub max_ttl: Duration,
}

impl CachePolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_ttl: config.jwks_default_ttl,
            min_ttl: config.jwks_min_ttl,
            max_ttl: config.jwks_max_ttl,
        }
    }

    /// Freshness lifetime for a response, clamped to `[min_ttl, max_ttl]`.
    pub fn lifetime(&self, max_age: Option<Duration>) -> Duration {
        max_age
            .unwrap_or(self.default_ttl)
            .min(self.max_ttl)
            .max(self.min_ttl)
    }
}

type Shared<T> = Result<Arc<T>, FetchError>;
type RefreshSlot<T> = watch::Receiver<Option<Shared<T>>>;

struct CacheEntry<T> {
    value: Arc<T>,
    etag: Option<String>,
    expires_at: Instant,
}

struct CacheState<T> {
    entry: Option<CacheEntry<T>>,
    in_flight: Option<RefreshSlot<T>>,
}

/// Expiring single-value cache bound to one fetcher.
pub struct EndpointCache<T> {
    name: &'static str,
    fetcher: Arc<dyn Fetch<T>>,
    policy: CachePolicy,
    state: Arc<Mutex<CacheState<T>>>,
}

impl<T: Send + Sync + 'static> EndpointCache<T> {
    /// Create an empty cache. `name` labels logs and metrics.
    pub fn new(name: &'static str, fetcher: Arc<dyn Fetch<T>>, policy: CachePolicy) -> Self {
        Self {
            name,
            fetcher,
            policy,
            state: Arc::new(Mutex::new(CacheState {
                entry: None,
                in_flight: None,
            })),
        }
    }

    /// Get the current value, refreshing it if absent or expired.
    ///
    /// # Errors
    ///
    /// Returns the refresh's `FetchError` when the value had to be refreshed
    /// and the refresh failed. Every caller waiting on that refresh receives
    /// the same error.
    #[instrument(skip_all, fields(cache = self.name))]
    pub async fn get(&self) -> Result<Arc<T>, FetchError> {
        let slot = {
            let mut state = lock_state(&self.state);
            if let Some(entry) = state.entry.as_ref() {
                if entry.expires_at > Instant::now() {
                    metrics::record_cache_lookup(self.name, "hit");
                    return Ok(Arc::clone(&entry.value));
                }
            }
            self.join_or_start_refresh(&mut state)
        };

        await_refresh(slot).await
    }

    /// Refresh regardless of expiry, joining a refresh already in flight.
    ///
    /// A failure leaves the stored value in place, so an unexpired value
    /// keeps being served by [`EndpointCache::get`].
    #[instrument(skip_all, fields(cache = self.name))]
    pub async fn force_refresh(&self) -> Result<Arc<T>, FetchError> {
        let slot = {
            let mut state = lock_state(&self.state);
            self.join_or_start_refresh(&mut state)
        };

        await_refresh(slot).await
    }

    /// Time left before the stored value expires. `None` when nothing is
    /// stored or it has already expired.
    pub fn time_to_live(&self) -> Option<Duration> {
        let state = lock_state(&self.state);
        state
            .entry
            .as_ref()
            .and_then(|entry| entry.expires_at.checked_duration_since(Instant::now()))
            .filter(|ttl| !ttl.is_zero())
    }

    fn join_or_start_refresh(&self, state: &mut CacheState<T>) -> RefreshSlot<T> {
        if let Some(slot) = state.in_flight.as_ref() {
            // has_changed() errors once the sender is gone without clearing the slot
            if slot.has_changed().is_ok() {
                tracing::debug!(target: "apple_auth.cache", cache = self.name, "Joining in-flight refresh");
                metrics::record_cache_lookup(self.name, "coalesced");
                return slot.clone();
            }
            tracing::warn!(target: "apple_auth.cache", cache = self.name, "Previous refresh ended without a result, starting a new one");
        }

        metrics::record_cache_lookup(self.name, "miss");

        let (sender, receiver) = watch::channel(None);
        state.in_flight = Some(receiver.clone());

        let etag = state.entry.as_ref().and_then(|entry| entry.etag.clone());
        let fetcher = Arc::clone(&self.fetcher);
        let shared_state = Arc::clone(&self.state);
        let policy = self.policy;
        let name = self.name;

        tokio::spawn(async move {
            let started = Instant::now();
            let outcome = fetcher.fetch(etag.as_deref()).await;
            let result = store_outcome(&shared_state, policy, outcome);

            let status = if result.is_ok() { "success" } else { "error" };
            metrics::record_key_set_refresh(name, status, started.elapsed());

            match &result {
                Ok(_) => {
                    tracing::debug!(target: "apple_auth.cache", cache = name, "Refresh completed");
                }
                Err(e) => {
                    tracing::warn!(target: "apple_auth.cache", cache = name, error = %e, "Refresh failed");
                }
            }

            if sender.send(Some(result)).is_err() {
                tracing::trace!(target: "apple_auth.cache", cache = name, "No callers waiting on refresh");
            }
        });

        receiver
    }
}

/// Apply a fetch outcome to the cache state and produce the shared result.
///
/// Clears the in-flight slot in the same critical section, so the next
/// reader either sees the new entry or starts a fresh refresh.
fn store_outcome<T>(
    state: &Mutex<CacheState<T>>,
    policy: CachePolicy,
    outcome: Result<Fetched<T>, FetchError>,
) -> Shared<T> {
    let mut state = lock_state(state);
    state.in_flight = None;

    match outcome {
        Ok(Fetched::Modified {
            value,
            etag,
            max_age,
        }) => {
            let value = Arc::new(value);
            state.entry = Some(CacheEntry {
                value: Arc::clone(&value),
                etag,
                expires_at: expiry_after(policy.lifetime(max_age)),
            });
            Ok(value)
        }
        Ok(Fetched::NotModified { max_age }) => match state.entry.as_mut() {
            Some(entry) => {
                entry.expires_at = expiry_after(policy.lifetime(max_age));
                Ok(Arc::clone(&entry.value))
            }
            None => Err(FetchError::Decode(
                "endpoint answered not-modified but nothing is cached".to_string(),
            )),
        },
        Err(e) => Err(e),
    }
}

async fn await_refresh<T>(mut slot: RefreshSlot<T>) -> Shared<T> {
    match slot.wait_for(Option::is_some).await {
        Ok(published) => published
            .as_ref()
            .cloned()
            .unwrap_or_else(|| Err(refresh_interrupted())),
        Err(_) => Err(refresh_interrupted()),
    }
}

fn refresh_interrupted() -> FetchError {
    FetchError::Network("key set refresh ended without a result".to_string())
}

fn expiry_after(lifetime: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(lifetime).unwrap_or(now)
}

fn lock_state<T>(state: &Mutex<CacheState<T>>) -> MutexGuard<'_, CacheState<T>> {
    // Critical sections never panic midway, so a poisoned guard is still consistent
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
