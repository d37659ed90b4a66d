//! Identity token middleware for protected routes.
//!
//! Extracts the bearer token from the `Authorization` header, verifies it
//! with the scope's Apple key store, and injects the verified
//! [`IdentityToken`] into request extensions.

use crate::auth::IdentityToken;
use crate::errors::AuthError;
use crate::routes::AppState;
use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::IntoResponse,
};
use common::secret::BearerToken;
use std::sync::Arc;
use tracing::instrument;

/// Extract the bearer credential from request headers.
///
/// Returns `None` when the header is absent, not valid ASCII, uses another
/// scheme, or carries an empty credential.
pub fn bearer_token(headers: &HeaderMap) -> Option<BearerToken> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(BearerToken::from_authorization)
}

/// Middleware that requires a valid Apple identity token.
///
/// # Authorization Header Format
///
/// ```text
/// Authorization: Bearer <identity token>
/// ```
///
/// # Response
///
/// - Returns 401 Unauthorized with `WWW-Authenticate` if the token is missing or invalid
/// - Continues to the next handler with the `IdentityToken` in extensions otherwise
#[instrument(skip_all, name = "apple_auth.middleware.auth")]
pub async fn require_apple_identity(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, AuthError> {
    let authorization = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    if authorization.is_none() {
        tracing::debug!(target: "apple_auth.middleware", "Missing Authorization header");
    }

    let identity = state
        .auth
        .apple()
        .verifier()
        .verify_authorization(authorization, None)
        .await?;

    req.extensions_mut().insert(identity);

    Ok(next.run(req).await)
}

/// Extension trait for reading the verified identity from a request.
pub trait IdentityExt {
    /// Returns `None` if the identity middleware was not applied.
    fn identity(&self) -> Option<&IdentityToken>;
}

impl<B> IdentityExt for axum::extract::Request<B> {
    fn identity(&self) -> Option<&IdentityToken> {
        self.extensions().get::<IdentityToken>()
    }
}
