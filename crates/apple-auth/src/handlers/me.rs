//! Current user handler.
//!
//! Returns the verified identity from the Apple identity token.

use crate::auth::{IdentityToken, RealUserStatus};
use axum::{Extension, Json};
use serde::Serialize;
use tracing::instrument;

/// Response for `/v1/me`.
#[derive(Debug, Clone, Serialize)]
pub struct MeResponse {
    /// Apple's stable user identifier.
    pub sub: String,

    /// Audience values the token was issued for.
    pub aud: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_private_email: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub real_user_status: Option<RealUserStatus>,

    /// Token expiration timestamp.
    pub exp: i64,
}

impl From<IdentityToken> for MeResponse {
    fn from(identity: IdentityToken) -> Self {
        Self {
            sub: identity.sub,
            aud: identity.aud.values().to_vec(),
            email: identity.email,
            email_verified: identity.email_verified,
            is_private_email: identity.is_private_email,
            real_user_status: identity.real_user_status,
            exp: identity.exp,
        }
    }
}

/// Handler for GET /v1/me
///
/// Requires the identity middleware.
///
/// ## Response
///
/// ```json
/// {
///   "sub": "001234.abcdef0123456789.0420",
///   "aud": ["com.example.app"],
///   "email": "relay@privaterelay.appleid.com",
///   "email_verified": true,
///   "is_private_email": true,
///   "exp": 1900000000
/// }
/// ```
#[instrument(skip_all, name = "apple_auth.handlers.me")]
pub async fn get_me(Extension(identity): Extension<IdentityToken>) -> Json<MeResponse> {
    tracing::debug!(target: "apple_auth.handlers.me", "Returning verified identity");
    Json(MeResponse::from(identity))
}
