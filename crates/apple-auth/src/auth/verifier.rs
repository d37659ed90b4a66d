//! Identity token verification.
//!
//! [`TokenVerifier`] runs one token through the full pipeline against an
//! [`AppleKeyStore`]:
//!
//! 1. Reject an absent token (`MissingCredential`)
//! 2. Size-check and inspect the header (no cryptography yet)
//! 3. Obtain verifiers for the current key set (may wait on a refresh)
//! 4. Verify the signature and `exp`, decode the claims
//! 5. Check `iat` and `iss`
//! 6. Enforce the audience: the per-call value wins, then the store's
//!    application identifier; with neither the check is skipped
//!
//! Every outcome is counted by kind; the token itself is never logged.

use crate::auth::claims::IdentityToken;
use crate::auth::store::AppleKeyStore;
use crate::errors::AuthError;
use crate::observability::metrics::record_token_verification;
use common::jwt::{inspect_header, validate_iat};
use common::secret::{BearerToken, ExposeSecret};
use tracing::instrument;

/// Verifies identity tokens against one key store.
#[derive(Clone, Copy)]
pub struct TokenVerifier<'a> {
    store: &'a AppleKeyStore,
}

impl<'a> TokenVerifier<'a> {
    pub fn new(store: &'a AppleKeyStore) -> Self {
        Self { store }
    }

    /// Verify raw token bytes.
    ///
    /// `application_identifier` overrides the store's configured identifier
    /// for this call only.
    ///
    /// # Errors
    ///
    /// Any [`AuthError`]; see the module docs for which step produces which.
    #[instrument(skip_all, fields(explicit_audience = application_identifier.is_some()))]
    pub async fn verify(
        &self,
        token: &[u8],
        application_identifier: Option<&str>,
    ) -> Result<IdentityToken, AuthError> {
        let result = self.verify_inner(token, application_identifier).await;

        match &result {
            Ok(_) => {
                record_token_verification("success", None);
                tracing::debug!(target: "apple_auth.verifier", "Identity token verified");
            }
            Err(e) => {
                record_token_verification("failure", Some(e.kind()));
                tracing::debug!(target: "apple_auth.verifier", kind = e.kind(), "Identity token rejected");
            }
        }

        result
    }

    /// Verify a token given as a string.
    pub async fn verify_str(
        &self,
        token: &str,
        application_identifier: Option<&str>,
    ) -> Result<IdentityToken, AuthError> {
        self.verify(token.as_bytes(), application_identifier).await
    }

    /// Verify the token carried by an `Authorization: Bearer <token>` header.
    ///
    /// An absent header, another scheme or an empty credential is
    /// `MissingCredential`.
    pub async fn verify_authorization(
        &self,
        authorization: Option<&str>,
        application_identifier: Option<&str>,
    ) -> Result<IdentityToken, AuthError> {
        let bearer = authorization.and_then(BearerToken::from_authorization);
        let token = bearer.as_ref().map_or("", |token| token.expose_secret());
        self.verify(token.as_bytes(), application_identifier).await
    }

    async fn verify_inner(
        &self,
        token: &[u8],
        application_identifier: Option<&str>,
    ) -> Result<IdentityToken, AuthError> {
        if token.iter().all(u8::is_ascii_whitespace) {
            return Err(AuthError::MissingCredential);
        }

        let token = std::str::from_utf8(token).map_err(|_| AuthError::MalformedToken)?;
        let header = inspect_header(token)?;

        let signers = self.store.signers().await?;
        let claims: IdentityToken = signers.verify(token, &header, self.store.clock_skew())?;

        validate_iat(claims.iat, self.store.clock_skew())?;

        if claims.iss != self.store.issuer() {
            tracing::debug!(
                target: "apple_auth.verifier",
                iss = %claims.iss,
                expected = %self.store.issuer(),
                "Token issuer mismatch"
            );
            return Err(AuthError::InvalidIssuer);
        }

        let expected = application_identifier
            .map(ToString::to_string)
            .or_else(|| self.store.application_identifier());

        if let Some(expected) = expected {
            if !claims.aud.includes(&expected) {
                tracing::debug!(
                    target: "apple_auth.verifier",
                    expected = %expected,
                    "Token audience mismatch"
                );
                return Err(AuthError::AudienceMismatch);
            }
        }

        Ok(claims)
    }
}
