//! Error types for identity token verification.
//!
//! Three layers:
//! - [`FetchError`] - a key-set refresh failed; shared by every caller that
//!   waited on that refresh, so it is `Clone`.
//! - [`SignerError`] - a key could not be turned into a verifier.
//! - [`AuthError`] - the outcome of one verification call.
//!
//! At the HTTP boundary every [`AuthError`] collapses to 401 Unauthorized with
//! a generic message. The precise kind is logged server-side and exposed via
//! [`AuthError::kind`] for metrics.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::jwt::JwtValidationError;
use serde::Serialize;
use thiserror::Error;

/// Key-set refresh failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Transport failure or non-success HTTP status.
    #[error("Key set request failed: {0}")]
    Network(String),

    /// Response body is not a well-formed key-set document.
    #[error("Key set document is malformed: {0}")]
    Decode(String),
}

/// Failure to construct a verifier from a key.
///
/// `UnsupportedAlgorithm` and `InvalidKeyMaterial` are per-key and non-fatal:
/// the key is skipped. `NoUsableKeys` is returned when every key was skipped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignerError {
    #[error("Unsupported key algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Invalid key material: {0}")]
    InvalidKeyMaterial(String),

    #[error("Key set contains no usable keys")]
    NoUsableKeys,
}

/// Verification failure for a single call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Missing bearer credential")]
    MissingCredential,

    #[error("Key set fetch failed: {0}")]
    NetworkError(String),

    #[error("Key set decode failed: {0}")]
    DecodeError(String),

    #[error("Key set contains no usable keys")]
    NoUsableKeys,

    #[error("Malformed token")]
    MalformedToken,

    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Token expired")]
    TokenExpired,

    #[error("Token issuer mismatch")]
    InvalidIssuer,

    #[error("Token audience mismatch")]
    AudienceMismatch,
}

impl AuthError {
    /// Bounded label for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::MissingCredential => "missing_credential",
            AuthError::NetworkError(_) => "network_error",
            AuthError::DecodeError(_) => "decode_error",
            AuthError::NoUsableKeys => "no_usable_keys",
            AuthError::MalformedToken => "malformed_token",
            AuthError::InvalidSignature => "invalid_signature",
            AuthError::TokenExpired => "token_expired",
            AuthError::InvalidIssuer => "invalid_issuer",
            AuthError::AudienceMismatch => "audience_mismatch",
        }
    }

    /// HTTP status for this error. Every kind is an authorization denial.
    pub fn status_code(&self) -> u16 {
        StatusCode::UNAUTHORIZED.as_u16()
    }

    /// True when the failure came from key distribution rather than the token.
    pub fn is_key_set_failure(&self) -> bool {
        matches!(
            self,
            AuthError::NetworkError(_) | AuthError::DecodeError(_) | AuthError::NoUsableKeys
        )
    }
}

impl From<FetchError> for AuthError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Network(reason) => AuthError::NetworkError(reason),
            FetchError::Decode(reason) => AuthError::DecodeError(reason),
        }
    }
}

impl From<SignerError> for AuthError {
    fn from(err: SignerError) -> Self {
        match err {
            SignerError::NoUsableKeys => AuthError::NoUsableKeys,
            other => AuthError::DecodeError(other.to_string()),
        }
    }
}

impl From<JwtValidationError> for AuthError {
    fn from(_: JwtValidationError) -> Self {
        AuthError::MalformedToken
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: &'static str,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        if self.is_key_set_failure() {
            tracing::warn!(target: "apple_auth.errors", error = %self, kind = self.kind(), "Verification failed on key set");
        } else {
            tracing::debug!(target: "apple_auth.errors", kind = self.kind(), "Verification rejected token");
        }

        let (code, message, challenge) = match self {
            AuthError::MissingCredential => (
                "UNAUTHORIZED",
                "Authentication required",
                "Bearer realm=\"apple-auth\"",
            ),
            _ => (
                "INVALID_TOKEN",
                "The identity token is invalid or expired",
                "Bearer realm=\"apple-auth\", error=\"invalid_token\"",
            ),
        };

        let body = ErrorResponse {
            error: ErrorDetail { code, message },
        };

        let mut response = (StatusCode::UNAUTHORIZED, Json(body)).into_response();
        if let Ok(header_value) = challenge.parse() {
            response
                .headers_mut()
                .insert("WWW-Authenticate", header_value);
        }

        response
    }
}
