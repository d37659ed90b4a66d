//! Secret types for protecting bearer credentials from accidental logging.
//!
//! This module re-exports types from the [`secrecy`] crate and adds
//! [`BearerToken`], the credential pulled out of an `Authorization` header.
//! Identity tokens carry the user's subject and email, so they must never
//! reach logs in clear text.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{BearerToken, ExposeSecret};
//!
//! let token = BearerToken::from_authorization("Bearer eyJhbGciOi...").unwrap();
//!
//! // Debug output is redacted
//! assert!(!format!("{token:?}").contains("eyJ"));
//!
//! // Access requires an explicit call
//! assert_eq!(token.expose_secret(), "eyJhbGciOi...");
//! ```

// Re-export the main types from secrecy
pub use secrecy::{ExposeSecret, SecretString};

use std::fmt;

/// Authentication scheme expected in the `Authorization` header.
const BEARER_SCHEME: &str = "bearer";

/// A bearer credential extracted from an `Authorization` header.
#[derive(Clone)]
pub struct BearerToken(SecretString);

impl BearerToken {
    /// Parse an `Authorization` header value of the form `Bearer <token>`.
    ///
    /// The scheme is matched case-insensitively (RFC 9110 section 11.1).
    /// Returns `None` for any other scheme, a missing separator, or an
    /// empty credential.
    #[must_use]
    pub fn from_authorization(header_value: &str) -> Option<Self> {
        let (scheme, credential) = header_value.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case(BEARER_SCHEME) {
            return None;
        }

        let credential = credential.trim();
        if credential.is_empty() {
            return None;
        }

        Some(Self(SecretString::from(credential)))
    }
}

impl ExposeSecret<str> for BearerToken {
    fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BearerToken").field(&"[REDACTED]").finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_is_redacted() {
        let token = BearerToken::from_authorization("Bearer hunter2").unwrap();
        let debug_str = format!("{token:?}");

        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("hunter2"));
    }

    #[test]
    fn test_scheme_is_case_insensitive() {
        for header in ["Bearer abc.def.ghi", "bearer abc.def.ghi", "BEARER abc.def.ghi"] {
            let token = BearerToken::from_authorization(header).unwrap();
            assert_eq!(token.expose_secret(), "abc.def.ghi");
        }
    }

    #[test]
    fn test_surrounding_whitespace_is_ignored() {
        let token = BearerToken::from_authorization("  Bearer   abc.def.ghi  ").unwrap();
        assert_eq!(token.expose_secret(), "abc.def.ghi");
    }

    #[test]
    fn test_rejects_other_schemes() {
        assert!(BearerToken::from_authorization("Basic dXNlcjpwYXNz").is_none());
        assert!(BearerToken::from_authorization("Token abc").is_none());
    }

    #[test]
    fn test_rejects_missing_or_empty_credential() {
        assert!(BearerToken::from_authorization("").is_none());
        assert!(BearerToken::from_authorization("Bearer").is_none());
        assert!(BearerToken::from_authorization("Bearer    ").is_none());
    }

    #[test]
    fn test_clone_works() {
        let token = BearerToken::from_authorization("Bearer cloneable").unwrap();
        let cloned = token.clone();
        assert_eq!(cloned.expose_secret(), "cloneable");
    }
}
