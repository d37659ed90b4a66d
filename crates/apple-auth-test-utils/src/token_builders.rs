//! Builder patterns for test data construction
//!
//! Provides a fluent API for identity token claims.

use chrono::{Duration, Utc};
use serde_json::{json, Map, Value};

/// Issuer used by default in built claims.
pub const TEST_ISSUER: &str = "https://appleid.apple.com";

/// Audience used by default in built claims.
pub const TEST_AUDIENCE: &str = "com.example.app";

/// Builder for Sign in with Apple identity token claims
///
/// # Example
/// ```rust,ignore
/// let claims = TestIdentityTokenBuilder::new()
///     .for_user("001234.abcdef.0420")
///     .audience("com.example.app")
///     .expires_in(600)
///     .build();
/// ```
pub struct TestIdentityTokenBuilder {
    iss: String,
    aud: Value,
    sub: String,
    exp: i64,
    iat: i64,
    extra: Map<String, Value>,
}

impl TestIdentityTokenBuilder {
    /// Create a builder with defaults: Apple issuer, [`TEST_AUDIENCE`],
    /// issued now, valid for ten minutes
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            iss: TEST_ISSUER.to_string(),
            aud: json!(TEST_AUDIENCE),
            sub: "001234.test-subject.0420".to_string(),
            exp: (now + Duration::seconds(600)).timestamp(),
            iat: now.timestamp(),
            extra: Map::new(),
        }
    }

    /// Set the subject (Apple user identifier)
    pub fn for_user(mut self, subject: &str) -> Self {
        self.sub = subject.to_string();
        self
    }

    pub fn issuer(mut self, issuer: &str) -> Self {
        self.iss = issuer.to_string();
        self
    }

    /// Set a single-string audience
    pub fn audience(mut self, audience: &str) -> Self {
        self.aud = json!(audience);
        self
    }

    /// Set an array audience
    pub fn audiences(mut self, audiences: &[&str]) -> Self {
        self.aud = json!(audiences);
        self
    }

    /// Set expiration in seconds from now (negative for expired tokens)
    pub fn expires_in(mut self, seconds: i64) -> Self {
        self.exp = (Utc::now() + Duration::seconds(seconds)).timestamp();
        self
    }

    /// Set issued-at timestamp
    pub fn issued_at(mut self, timestamp: i64) -> Self {
        self.iat = timestamp;
        self
    }

    /// Set email and Apple's string-typed verification flag
    pub fn with_email(mut self, email: &str, verified: bool) -> Self {
        self.extra.insert("email".to_string(), json!(email));
        self.extra
            .insert("email_verified".to_string(), json!(verified.to_string()));
        self
    }

    /// Set any additional claim
    pub fn with_claim(mut self, name: &str, value: Value) -> Self {
        self.extra.insert(name.to_string(), value);
        self
    }

    /// Build the claims as a JSON value
    pub fn build(self) -> Value {
        let mut claims = self.extra;
        claims.insert("iss".to_string(), json!(self.iss));
        claims.insert("aud".to_string(), self.aud);
        claims.insert("sub".to_string(), json!(self.sub));
        claims.insert("exp".to_string(), json!(self.exp));
        claims.insert("iat".to_string(), json!(self.iat));
        Value::Object(claims)
    }
}

impl Default for TestIdentityTokenBuilder {
    fn default() -> Self {
        Self::new()
    }
}
