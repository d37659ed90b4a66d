//! Verifier construction from a key set.
//!
//! [`SignerRegistry::build`] turns every usable key of a [`KeySet`] into a
//! [`Verifier`] bound to one algorithm. Keys this registry cannot use are
//! skipped and recorded; only a set with no usable key at all is an error.
//!
//! Algorithm dispatch goes through the [`ALGORITHMS`] table, so supporting a
//! new algorithm means adding one row.
//!
//! # Security
//!
//! - A verifier only ever checks tokens whose header `alg` equals its own
//!   algorithm (no algorithm confusion between key families)
//! - `kid` selects exactly one verifier; an unknown `kid` fails closed

use crate::auth::jwks::{Jwk, KeySet};
use crate::errors::{AuthError, SignerError};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use common::jwt::TokenHeader;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::de::DeserializeOwned;
use std::fmt;
use std::time::Duration;

type KeyConstructor = fn(&Jwk) -> Result<DecodingKey, SignerError>;

/// One row of the algorithm table.
struct AlgorithmEntry {
    /// JOSE algorithm name as it appears in `alg`.
    name: &'static str,
    algorithm: Algorithm,
    /// Key type the algorithm requires.
    kty: &'static str,
    build: KeyConstructor,
}

const fn entry(
    name: &'static str,
    algorithm: Algorithm,
    kty: &'static str,
    build: KeyConstructor,
) -> AlgorithmEntry {
    AlgorithmEntry {
        name,
        algorithm,
        kty,
        build,
    }
}

/// Every algorithm a verifier can be built for.
const ALGORITHMS: &[AlgorithmEntry] = &[
    entry("RS256", Algorithm::RS256, "RSA", rsa_key),
    entry("RS384", Algorithm::RS384, "RSA", rsa_key),
    entry("RS512", Algorithm::RS512, "RSA", rsa_key),
    entry("PS256", Algorithm::PS256, "RSA", rsa_key),
    entry("PS384", Algorithm::PS384, "RSA", rsa_key),
    entry("PS512", Algorithm::PS512, "RSA", rsa_key),
    entry("ES256", Algorithm::ES256, "EC", p256_key),
    entry("ES384", Algorithm::ES384, "EC", p384_key),
    entry("EdDSA", Algorithm::EdDSA, "OKP", ed25519_key),
];

fn lookup(name: &str) -> Option<&'static AlgorithmEntry> {
    ALGORITHMS.iter().find(|entry| entry.name == name)
}

/// Algorithm implied by the key's type and curve when `alg` is absent.
fn infer_algorithm(jwk: &Jwk) -> Option<&'static str> {
    match (jwk.kty.as_str(), jwk.crv.as_deref()) {
        ("RSA", _) => Some("RS256"),
        ("EC", Some("P-256")) => Some("ES256"),
        ("EC", Some("P-384")) => Some("ES384"),
        ("OKP", Some("Ed25519")) => Some("EdDSA"),
        _ => None,
    }
}

fn required<'a>(
    jwk: &'a Jwk,
    field: Option<&'a String>,
    name: &str,
) -> Result<&'a str, SignerError> {
    field.map(String::as_str).ok_or_else(|| {
        SignerError::InvalidKeyMaterial(format!("key '{}' is missing '{name}'", jwk.kid))
    })
}

fn decoded_len(jwk: &Jwk, value: &str, name: &str) -> Result<usize, SignerError> {
    URL_SAFE_NO_PAD
        .decode(value)
        .map(|bytes| bytes.len())
        .map_err(|e| {
            SignerError::InvalidKeyMaterial(format!("key '{}' has invalid '{name}': {e}", jwk.kid))
        })
}

fn rsa_key(jwk: &Jwk) -> Result<DecodingKey, SignerError> {
    let n = required(jwk, jwk.n.as_ref(), "n")?;
    let e = required(jwk, jwk.e.as_ref(), "e")?;

    DecodingKey::from_rsa_components(n, e)
        .map_err(|e| SignerError::InvalidKeyMaterial(format!("key '{}': {e}", jwk.kid)))
}

fn ec_key(jwk: &Jwk, curve: &str, coordinate_len: usize) -> Result<DecodingKey, SignerError> {
    if jwk.crv.as_deref() != Some(curve) {
        return Err(SignerError::InvalidKeyMaterial(format!(
            "key '{}' curve {:?} does not match {curve}",
            jwk.kid, jwk.crv
        )));
    }

    let x = required(jwk, jwk.x.as_ref(), "x")?;
    let y = required(jwk, jwk.y.as_ref(), "y")?;
    if decoded_len(jwk, x, "x")? != coordinate_len || decoded_len(jwk, y, "y")? != coordinate_len {
        return Err(SignerError::InvalidKeyMaterial(format!(
            "key '{}' coordinates are not {coordinate_len} bytes",
            jwk.kid
        )));
    }

    DecodingKey::from_ec_components(x, y)
        .map_err(|e| SignerError::InvalidKeyMaterial(format!("key '{}': {e}", jwk.kid)))
}

fn p256_key(jwk: &Jwk) -> Result<DecodingKey, SignerError> {
    ec_key(jwk, "P-256", 32)
}

fn p384_key(jwk: &Jwk) -> Result<DecodingKey, SignerError> {
    ec_key(jwk, "P-384", 48)
}

fn ed25519_key(jwk: &Jwk) -> Result<DecodingKey, SignerError> {
    if jwk.crv.as_deref() != Some("Ed25519") {
        return Err(SignerError::InvalidKeyMaterial(format!(
            "key '{}' curve {:?} is not Ed25519",
            jwk.kid, jwk.crv
        )));
    }

    let x = required(jwk, jwk.x.as_ref(), "x")?;
    if decoded_len(jwk, x, "x")? != 32 {
        return Err(SignerError::InvalidKeyMaterial(format!(
            "key '{}' is not a 32-byte Ed25519 public key",
            jwk.kid
        )));
    }

    DecodingKey::from_ed_components(x)
        .map_err(|e| SignerError::InvalidKeyMaterial(format!("key '{}': {e}", jwk.kid)))
}

/// A public key bound to the one algorithm it verifies.
pub struct Verifier {
    kid: String,
    entry: &'static AlgorithmEntry,
    key: DecodingKey,
}

impl Verifier {
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// JOSE name of the verifier's algorithm.
    pub fn algorithm(&self) -> &'static str {
        self.entry.name
    }
}

impl fmt::Debug for Verifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Verifier")
            .field("kid", &self.kid)
            .field("algorithm", &self.entry.name)
            .finish_non_exhaustive()
    }
}

/// A key that produced no verifier, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedKey {
    pub kid: String,
    pub reason: SignerError,
}

/// Verifiers for one key-set snapshot, in key-set order.
#[derive(Debug)]
pub struct SignerContext {
    verifiers: Vec<Verifier>,
    skipped: Vec<SkippedKey>,
}

impl SignerContext {
    pub fn verifiers(&self) -> &[Verifier] {
        &self.verifiers
    }

    /// Keys that were present in the set but could not be used.
    pub fn skipped(&self) -> &[SkippedKey] {
        &self.skipped
    }

    pub fn len(&self) -> usize {
        self.verifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.verifiers.is_empty()
    }

    /// Check the token's signature and expiry and decode its claims.
    ///
    /// With a `kid` in the header only that key is tried. Without one, every
    /// verifier whose algorithm matches the header `alg` is tried in order.
    /// `leeway` is the clock-skew allowance applied to `exp`.
    ///
    /// # Errors
    ///
    /// - `AuthError::InvalidSignature` - no verifier accepted the signature
    /// - `AuthError::TokenExpired` - signature valid but `exp` has passed
    /// - `AuthError::MalformedToken` - token or claims could not be decoded
    pub fn verify<T: DeserializeOwned>(
        &self,
        token: &str,
        header: &TokenHeader,
        leeway: Duration,
    ) -> Result<T, AuthError> {
        let candidates: Vec<&Verifier> = match header.kid.as_deref() {
            Some(kid) => self.verifiers.iter().filter(|v| v.kid == kid).collect(),
            None => self
                .verifiers
                .iter()
                .filter(|v| v.entry.name == header.alg)
                .collect(),
        };

        if candidates.is_empty() {
            tracing::debug!(
                target: "apple_auth.signers",
                kid = ?header.kid,
                alg = %header.alg,
                "No verifier for token"
            );
            return Err(AuthError::InvalidSignature);
        }

        for verifier in candidates {
            if verifier.entry.name != header.alg {
                tracing::warn!(
                    target: "apple_auth.signers",
                    kid = %verifier.kid,
                    key_alg = verifier.entry.name,
                    token_alg = %header.alg,
                    "Token algorithm does not match key algorithm"
                );
                continue;
            }

            let mut validation = Validation::new(verifier.entry.algorithm);
            validation.leeway = leeway.as_secs();
            validation.validate_exp = true;
            // Audience is enforced by the caller, which knows the expected value
            validation.validate_aud = false;

            match decode::<T>(token, &verifier.key, &validation) {
                Ok(data) => return Ok(data.claims),
                Err(e) => match e.kind() {
                    ErrorKind::ExpiredSignature => return Err(AuthError::TokenExpired),
                    ErrorKind::InvalidToken
                    | ErrorKind::Base64(_)
                    | ErrorKind::Json(_)
                    | ErrorKind::Utf8(_)
                    | ErrorKind::MissingRequiredClaim(_) => {
                        tracing::debug!(target: "apple_auth.signers", error = %e, "Token could not be decoded");
                        return Err(AuthError::MalformedToken);
                    }
                    _ => {
                        tracing::debug!(
                            target: "apple_auth.signers",
                            kid = %verifier.kid,
                            error = %e,
                            "Verifier rejected token"
                        );
                    }
                },
            }
        }

        Err(AuthError::InvalidSignature)
    }
}

/// Builds a [`SignerContext`] from a key set.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignerRegistry;

impl SignerRegistry {
    /// JOSE names of every algorithm the registry can construct.
    pub fn supported_algorithms() -> impl Iterator<Item = &'static str> {
        ALGORITHMS.iter().map(|entry| entry.name)
    }

    pub fn supports(alg: &str) -> bool {
        lookup(alg).is_some()
    }

    /// Construct one verifier per usable key. Pure, no I/O.
    ///
    /// # Errors
    ///
    /// Returns `SignerError::NoUsableKeys` when every key was skipped.
    pub fn build(key_set: &KeySet) -> Result<SignerContext, SignerError> {
        let mut verifiers = Vec::with_capacity(key_set.len());
        let mut skipped = Vec::new();

        for jwk in key_set.keys() {
            match Self::build_one(jwk) {
                Ok(Some(verifier)) => verifiers.push(verifier),
                Ok(None) => {}
                Err(reason) => {
                    tracing::debug!(
                        target: "apple_auth.signers",
                        kid = %jwk.kid,
                        reason = %reason,
                        "Skipping key"
                    );
                    skipped.push(SkippedKey {
                        kid: jwk.kid.clone(),
                        reason,
                    });
                }
            }
        }

        if verifiers.is_empty() {
            tracing::warn!(
                target: "apple_auth.signers",
                key_count = key_set.len(),
                skipped = skipped.len(),
                "Key set has no usable keys"
            );
            return Err(SignerError::NoUsableKeys);
        }

        Ok(SignerContext { verifiers, skipped })
    }

    /// `Ok(None)` for keys that are not signing keys at all.
    fn build_one(jwk: &Jwk) -> Result<Option<Verifier>, SignerError> {
        if jwk.key_use.as_deref() == Some("enc") {
            return Ok(None);
        }

        let name = match jwk.alg.as_deref() {
            Some(alg) => alg,
            None => infer_algorithm(jwk).ok_or_else(|| {
                SignerError::UnsupportedAlgorithm(format!("kty {} without alg", jwk.kty))
            })?,
        };

        let entry =
            lookup(name).ok_or_else(|| SignerError::UnsupportedAlgorithm(name.to_string()))?;

        if jwk.kty != entry.kty {
            return Err(SignerError::InvalidKeyMaterial(format!(
                "key '{}' has kty {} but {} needs {}",
                jwk.kid, jwk.kty, entry.name, entry.kty
            )));
        }

        let key = (entry.build)(jwk)?;

        Ok(Some(Verifier {
            kid: jwk.kid.clone(),
            entry,
            key,
        }))
    }
}
