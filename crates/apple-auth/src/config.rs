//! Service configuration.
//!
//! Configuration is loaded from environment variables with defaults that
//! point at Apple's production key-set endpoint. Nothing here is secret, so
//! the derived `Debug` is safe to log.

use common::jwt::{DEFAULT_CLOCK_SKEW, MAX_CLOCK_SKEW};
use reqwest::Url;
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Apple's published key-set endpoint.
pub const DEFAULT_APPLE_JWKS_URL: &str = "https://appleid.apple.com/auth/keys";

/// Issuer claim carried by every Apple identity token.
pub const DEFAULT_APPLE_ISSUER: &str = "https://appleid.apple.com";

/// Default HTTP bind address for the demo service.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Key-set lifetime when the response carries no usable `Cache-Control`.
pub const DEFAULT_JWKS_TTL: Duration = Duration::from_secs(3600);

/// Lower clamp for provider-supplied `max-age`.
pub const DEFAULT_JWKS_MIN_TTL: Duration = Duration::from_secs(60);

/// Upper clamp for provider-supplied `max-age`.
pub const DEFAULT_JWKS_MAX_TTL: Duration = Duration::from_secs(86_400);

/// Default key-set request timeout.
pub const DEFAULT_JWKS_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Identity token verification configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Demo server bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Key-set endpoint. Can be changed at runtime via `AppleKeyStore::set_endpoint`.
    pub jwks_url: String,

    /// Expected audience (the app's bundle or services ID). `None` skips the
    /// audience check unless a caller supplies one.
    pub application_identifier: Option<String>,

    /// Required `iss` claim.
    pub issuer: String,

    /// Key-set lifetime when no `max-age` is supplied.
    pub jwks_default_ttl: Duration,

    /// Minimum key-set lifetime.
    pub jwks_min_ttl: Duration,

    /// Maximum key-set lifetime.
    pub jwks_max_ttl: Duration,

    /// Key-set request timeout.
    pub jwks_http_timeout: Duration,

    /// Leeway for `exp` and `iat` checks.
    pub jwt_clock_skew: Duration,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid URL configuration: {0}")]
    InvalidUrl(String),

    #[error("Invalid duration configuration: {0}")]
    InvalidDuration(String),

    #[error("Invalid JWT clock skew configuration: {0}")]
    InvalidJwtClockSkew(String),

    #[error("Invalid key set TTL bounds: {0}")]
    InvalidTtlBounds(String),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            jwks_url: DEFAULT_APPLE_JWKS_URL.to_string(),
            application_identifier: None,
            issuer: DEFAULT_APPLE_ISSUER.to_string(),
            jwks_default_ttl: DEFAULT_JWKS_TTL,
            jwks_min_ttl: DEFAULT_JWKS_MIN_TTL,
            jwks_max_ttl: DEFAULT_JWKS_MAX_TTL,
            jwks_http_timeout: DEFAULT_JWKS_HTTP_TIMEOUT,
            jwt_clock_skew: DEFAULT_CLOCK_SKEW,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let jwks_url = vars
            .get("APPLE_JWKS_URL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_APPLE_JWKS_URL.to_string());
        let jwks_url = validate_url("APPLE_JWKS_URL", &jwks_url)?;

        let application_identifier = vars
            .get("APPLE_APPLICATION_ID")
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        let issuer = vars
            .get("APPLE_ISSUER")
            .cloned()
            .unwrap_or_else(|| DEFAULT_APPLE_ISSUER.to_string());

        let jwks_default_ttl = parse_seconds(vars, "JWKS_DEFAULT_TTL_SECONDS", DEFAULT_JWKS_TTL)?;
        let jwks_min_ttl = parse_seconds(vars, "JWKS_MIN_TTL_SECONDS", DEFAULT_JWKS_MIN_TTL)?;
        let jwks_max_ttl = parse_seconds(vars, "JWKS_MAX_TTL_SECONDS", DEFAULT_JWKS_MAX_TTL)?;

        if jwks_min_ttl > jwks_max_ttl {
            return Err(ConfigError::InvalidTtlBounds(format!(
                "JWKS_MIN_TTL_SECONDS ({}) must not exceed JWKS_MAX_TTL_SECONDS ({})",
                jwks_min_ttl.as_secs(),
                jwks_max_ttl.as_secs()
            )));
        }

        let jwks_http_timeout =
            parse_seconds(vars, "JWKS_HTTP_TIMEOUT_SECONDS", DEFAULT_JWKS_HTTP_TIMEOUT)?;
        if jwks_http_timeout.is_zero() {
            return Err(ConfigError::InvalidDuration(
                "JWKS_HTTP_TIMEOUT_SECONDS must be greater than 0".to_string(),
            ));
        }

        // Parse JWT clock skew tolerance with validation
        let jwt_clock_skew = if let Some(value_str) = vars.get("JWT_CLOCK_SKEW_SECONDS") {
            let value: u64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must be a valid positive integer, got '{}': {}",
                    value_str, e
                ))
            })?;

            if value == 0 {
                return Err(ConfigError::InvalidJwtClockSkew(
                    "JWT_CLOCK_SKEW_SECONDS must be positive, got 0".to_string(),
                ));
            }

            if value > MAX_CLOCK_SKEW.as_secs() {
                return Err(ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must not exceed {} seconds, got {}",
                    MAX_CLOCK_SKEW.as_secs(),
                    value
                )));
            }

            Duration::from_secs(value)
        } else {
            DEFAULT_CLOCK_SKEW
        };

        Ok(Config {
            bind_address,
            jwks_url,
            application_identifier,
            issuer,
            jwks_default_ttl,
            jwks_min_ttl,
            jwks_max_ttl,
            jwks_http_timeout,
            jwt_clock_skew,
        })
    }
}

/// Parse a key-set endpoint. Only absolute http(s) URLs with a host are
/// accepted; the normalized form is returned.
pub(crate) fn validate_url(name: &str, value: &str) -> Result<String, ConfigError> {
    let url = Url::parse(value).map_err(|e| {
        ConfigError::InvalidUrl(format!(
            "{} is not a valid URL, got '{}': {}",
            name, value, e
        ))
    })?;

    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(ConfigError::InvalidUrl(format!(
            "{} must be an absolute http(s) URL, got '{}'",
            name, value
        )));
    }

    Ok(url.to_string())
}

fn parse_seconds(
    vars: &HashMap<String, String>,
    name: &str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match vars.get(name) {
        Some(value_str) => value_str.parse::<u64>().map(Duration::from_secs).map_err(|e| {
            ConfigError::InvalidDuration(format!(
                "{} must be a whole number of seconds, got '{}': {}",
                name, value_str, e
            ))
        }),
        None => Ok(default),
    }
}
