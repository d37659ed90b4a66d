//! Cryptographic fixtures for testing
//!
//! Provides signing keypairs that can publish themselves as JWKs and sign
//! identity tokens. Ed25519 keys are deterministic based on a seed; P-256
//! keys are freshly generated per call.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use ring::rand::SystemRandom;
use ring::signature::{EcdsaKeyPair, Ed25519KeyPair, KeyPair, ECDSA_P256_SHA256_FIXED_SIGNING};
use serde::Serialize;
use thiserror::Error;

/// Test fixture error type
#[derive(Error, Debug)]
pub enum FixtureError {
    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),
}

/// A signing keypair with its published JWK.
pub struct TestKeypair {
    kid: String,
    algorithm: Algorithm,
    jwk: serde_json::Value,
    private_key_pkcs8: Vec<u8>,
}

impl TestKeypair {
    /// Deterministic Ed25519 keypair. The same seed always produces the
    /// same key.
    ///
    /// # Panics
    /// If ring rejects the derived seed (never for valid input).
    pub fn ed25519(seed: u8, kid: &str) -> Self {
        Self::try_ed25519(seed, kid).expect("Failed to create Ed25519 test keypair")
    }

    /// Fallible form of [`TestKeypair::ed25519`].
    pub fn try_ed25519(seed: u8, kid: &str) -> Result<Self, FixtureError> {
        let seed_bytes = deterministic_seed(seed);

        let key_pair = Ed25519KeyPair::from_seed_unchecked(&seed_bytes).map_err(|e| {
            FixtureError::Crypto(format!("Failed to generate test keypair: {:?}", e))
        })?;

        let jwk = serde_json::json!({
            "kty": "OKP",
            "kid": kid,
            "crv": "Ed25519",
            "x": URL_SAFE_NO_PAD.encode(key_pair.public_key().as_ref()),
            "alg": "EdDSA",
            "use": "sig"
        });

        Ok(Self {
            kid: kid.to_string(),
            algorithm: Algorithm::EdDSA,
            jwk,
            private_key_pkcs8: build_pkcs8_from_seed(&seed_bytes),
        })
    }

    /// Freshly generated P-256 (ES256) keypair.
    ///
    /// # Panics
    /// If ring fails to generate or parse the key.
    pub fn es256(kid: &str) -> Self {
        Self::try_es256(kid).expect("Failed to create P-256 test keypair")
    }

    /// Fallible form of [`TestKeypair::es256`].
    pub fn try_es256(kid: &str) -> Result<Self, FixtureError> {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
            .map_err(|e| FixtureError::Crypto(format!("Failed to generate P-256 key: {:?}", e)))?;
        let key_pair =
            EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8.as_ref(), &rng)
                .map_err(|e| FixtureError::Crypto(format!("Failed to parse P-256 key: {:?}", e)))?;

        // Uncompressed point: 0x04 || x (32 bytes) || y (32 bytes)
        let public_key = key_pair.public_key().as_ref();
        let (x, y) = match public_key {
            [0x04, rest @ ..] if rest.len() == 64 => rest.split_at(32),
            _ => {
                return Err(FixtureError::Crypto(
                    "Unexpected P-256 public key encoding".to_string(),
                ))
            }
        };

        let jwk = serde_json::json!({
            "kty": "EC",
            "kid": kid,
            "crv": "P-256",
            "x": URL_SAFE_NO_PAD.encode(x),
            "y": URL_SAFE_NO_PAD.encode(y),
            "alg": "ES256",
            "use": "sig"
        });

        Ok(Self {
            kid: kid.to_string(),
            algorithm: Algorithm::ES256,
            jwk,
            private_key_pkcs8: pkcs8.as_ref().to_vec(),
        })
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// The public key as it appears in a key-set document.
    pub fn jwk_json(&self) -> serde_json::Value {
        self.jwk.clone()
    }

    /// Sign claims with this key, setting `kid` in the header.
    pub fn sign<T: Serialize>(&self, claims: &T) -> String {
        let mut header = Header::new(self.algorithm);
        header.kid = Some(self.kid.clone());
        self.sign_with_header(&header, claims)
    }

    /// Sign claims without a `kid` header.
    pub fn sign_without_kid<T: Serialize>(&self, claims: &T) -> String {
        self.sign_with_header(&Header::new(self.algorithm), claims)
    }

    /// Sign claims with a caller-supplied header (e.g. a foreign `kid`).
    ///
    /// # Panics
    /// If `header.alg` does not fit this key.
    pub fn sign_with_header<T: Serialize>(&self, header: &Header, claims: &T) -> String {
        let encoding_key = match self.algorithm {
            Algorithm::EdDSA => EncodingKey::from_ed_der(&self.private_key_pkcs8),
            _ => EncodingKey::from_ec_der(&self.private_key_pkcs8),
        };

        let mut header = header.clone();
        header.typ = Some("JWT".to_string());

        encode(&header, claims, &encoding_key).expect("Failed to sign test token")
    }
}

/// Build a `{"keys": [...]}` document from keypairs, in order.
pub fn key_set_json(keys: &[&TestKeypair]) -> serde_json::Value {
    serde_json::json!({
        "keys": keys.iter().map(|key| key.jwk_json()).collect::<Vec<_>>()
    })
}

fn deterministic_seed(seed: u8) -> [u8; 32] {
    let mut seed_bytes = [0u8; 32];
    seed_bytes[0] = seed;
    // Fill rest with deterministic pattern
    for (i, byte) in seed_bytes.iter_mut().enumerate().skip(1) {
        *byte = seed.wrapping_mul(i as u8).wrapping_add(i as u8);
    }
    seed_bytes
}

/// Build PKCS#8 v1 document from Ed25519 seed
///
/// Ring doesn't expose PKCS#8 for a seeded Ed25519KeyPair, so we build it.
fn build_pkcs8_from_seed(seed: &[u8; 32]) -> Vec<u8> {
    // PKCS#8 v1 format for Ed25519 (RFC 5208):
    // SEQUENCE { version INTEGER (0), algorithm AlgorithmIdentifier, privateKey OCTET STRING }
    let mut pkcs8 = Vec::with_capacity(48);

    // Outer SEQUENCE, 46 bytes
    pkcs8.extend_from_slice(&[0x30, 0x2e]);

    // Version: INTEGER 0
    pkcs8.extend_from_slice(&[0x02, 0x01, 0x00]);

    // AlgorithmIdentifier: SEQUENCE { OID 1.3.101.112 }
    pkcs8.extend_from_slice(&[0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70]);

    // Private key: OCTET STRING wrapping OCTET STRING with the 32-byte seed
    pkcs8.extend_from_slice(&[0x04, 0x22, 0x04, 0x20]);
    pkcs8.extend_from_slice(seed);

    pkcs8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ed25519_is_deterministic() {
        let a = TestKeypair::ed25519(1, "k");
        let b = TestKeypair::ed25519(1, "k");

        assert_eq!(a.jwk_json(), b.jwk_json());
        assert_eq!(a.private_key_pkcs8, b.private_key_pkcs8);
    }

    #[test]
    fn test_different_seeds_produce_different_keys() {
        let a = TestKeypair::ed25519(1, "k");
        let b = TestKeypair::ed25519(2, "k");

        assert_ne!(a.jwk_json()["x"], b.jwk_json()["x"]);
    }

    #[test]
    fn test_es256_jwk_has_32_byte_coordinates() {
        let key = TestKeypair::es256("ec");
        let jwk = key.jwk_json();

        for coordinate in ["x", "y"] {
            let bytes = URL_SAFE_NO_PAD
                .decode(jwk[coordinate].as_str().unwrap())
                .unwrap();
            assert_eq!(bytes.len(), 32);
        }
        assert_eq!(jwk["crv"], "P-256");
    }

    #[test]
    fn test_sign_sets_kid_and_alg() {
        let key = TestKeypair::es256("ec-kid");
        let token = key.sign(&serde_json::json!({"sub": "x"}));

        let header = jsonwebtoken::decode_header(&token).unwrap();
        assert_eq!(header.kid.as_deref(), Some("ec-kid"));
        assert_eq!(header.alg, Algorithm::ES256);

        let unkeyed = key.sign_without_kid(&serde_json::json!({"sub": "x"}));
        assert!(jsonwebtoken::decode_header(&unkeyed).unwrap().kid.is_none());
    }

    #[test]
    fn test_key_set_json_preserves_order() {
        let a = TestKeypair::ed25519(1, "a");
        let b = TestKeypair::es256("b");

        let doc = key_set_json(&[&a, &b]);
        assert_eq!(doc["keys"][0]["kid"], "a");
        assert_eq!(doc["keys"][1]["kid"], "b");
    }
}
