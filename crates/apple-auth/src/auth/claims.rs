//! Identity token claims.
//!
//! Built fresh from each verified token and never cached. `sub` and `email`
//! identify the user, so both are redacted in `Debug` output.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Claims carried by a Sign in with Apple identity token.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityToken {
    /// Issuer, `https://appleid.apple.com` for production tokens.
    pub iss: String,

    /// Client identifier(s) the token was issued for.
    pub aud: Audience,

    /// Stable user identifier - redacted in Debug output.
    pub sub: String,

    /// Expiration timestamp (Unix epoch seconds).
    pub exp: i64,

    /// Issued-at timestamp (Unix epoch seconds).
    pub iat: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_time: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,

    #[serde(
        default,
        deserialize_with = "flexible_bool",
        skip_serializing_if = "Option::is_none"
    )]
    pub nonce_supported: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at_hash: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub c_hash: Option<String>,

    /// User email or private relay address - redacted in Debug output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Apple sends this as either a JSON bool or the string "true"/"false".
    #[serde(
        default,
        deserialize_with = "flexible_bool",
        skip_serializing_if = "Option::is_none"
    )]
    pub email_verified: Option<bool>,

    #[serde(
        default,
        deserialize_with = "flexible_bool",
        skip_serializing_if = "Option::is_none"
    )]
    pub is_private_email: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub real_user_status: Option<RealUserStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
}

impl fmt::Debug for IdentityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityToken")
            .field("iss", &self.iss)
            .field("aud", &self.aud)
            .field("sub", &"[REDACTED]")
            .field("exp", &self.exp)
            .field("iat", &self.iat)
            .field("auth_time", &self.auth_time)
            .field("email", &self.email.as_ref().map(|_| "[REDACTED]"))
            .field("email_verified", &self.email_verified)
            .field("is_private_email", &self.is_private_email)
            .field("real_user_status", &self.real_user_status)
            .finish_non_exhaustive()
    }
}

/// The `aud` claim. JWT allows a single string or an array of strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Audience(Vec<String>);

impl Audience {
    pub fn new(values: Vec<String>) -> Self {
        Self(values)
    }

    /// True if `expected` is one of the audience values (exact match).
    pub fn includes(&self, expected: &str) -> bool {
        self.0.iter().any(|value| value == expected)
    }

    pub fn values(&self) -> &[String] {
        &self.0
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl<'de> Deserialize<'de> for Audience {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match OneOrMany::deserialize(deserializer)? {
            OneOrMany::One(value) => Self(vec![value]),
            OneOrMany::Many(values) => Self(values),
        })
    }
}

impl Serialize for Audience {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0.as_slice() {
            [single] => serializer.serialize_str(single),
            values => values.serialize(serializer),
        }
    }
}

/// Apple's assessment of whether the user is a real person.
///
/// Values Apple may add later decode as `Unknown` rather than failing the
/// whole token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u64", into = "u8")]
pub enum RealUserStatus {
    Unsupported,
    Unknown,
    LikelyReal,
}

impl From<u64> for RealUserStatus {
    fn from(value: u64) -> Self {
        match value {
            0 => Self::Unsupported,
            2 => Self::LikelyReal,
            _ => Self::Unknown,
        }
    }
}

impl From<RealUserStatus> for u8 {
    fn from(status: RealUserStatus) -> Self {
        match status {
            RealUserStatus::Unsupported => 0,
            RealUserStatus::Unknown => 1,
            RealUserStatus::LikelyReal => 2,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BoolOrString {
    Bool(bool),
    Str(String),
}

fn flexible_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<bool>, D::Error> {
    match Option::<BoolOrString>::deserialize(deserializer)? {
        None => Ok(None),
        Some(BoolOrString::Bool(value)) => Ok(Some(value)),
        Some(BoolOrString::Str(value)) => match value.as_str() {
            "true" => Ok(Some(true)),
            "false" => Ok(Some(false)),
            other => Err(serde::de::Error::custom(format!(
                "expected \"true\" or \"false\", got \"{other}\""
            ))),
        },
    }
}
