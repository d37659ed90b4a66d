//! Verification pipeline integration tests.
//!
//! Runs real signed tokens through `TokenVerifier` against a mocked key-set
//! endpoint.

// Test code is allowed to use expect/unwrap for assertions
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use anyhow::Result;
use apple_auth::auth::{AppleKeyStore, AuthScope};
use apple_auth::config::Config;
use apple_auth::errors::AuthError;
use apple_auth_test_utils::{MockJwksServer, TestIdentityTokenBuilder, TestKeypair, TEST_AUDIENCE};
use chrono::Utc;
use jsonwebtoken::{Algorithm, Header};
use std::sync::Arc;
use std::time::Duration;
use wiremock::ResponseTemplate;

fn config_for(server: &MockJwksServer) -> Config {
    Config {
        jwks_url: server.jwks_url(),
        ..Config::default()
    }
}

async fn store_serving(keys: &[&TestKeypair]) -> (MockJwksServer, AppleKeyStore) {
    let server = MockJwksServer::start().await;
    server.serve_keys(keys).await;
    let store = AppleKeyStore::new(&config_for(&server));
    (server, store)
}

// ============================================================================
// Round trips
// ============================================================================

#[tokio::test]
async fn test_eddsa_token_round_trip() -> Result<()> {
    let key = TestKeypair::ed25519(1, "ed-key");
    let (_server, store) = store_serving(&[&key]).await;

    let claims = TestIdentityTokenBuilder::new()
        .for_user("001234.alice.0420")
        .with_email("alice@privaterelay.appleid.com", true)
        .with_claim("is_private_email", serde_json::json!(true))
        .build();
    let token = key.sign(&claims);

    let identity = store.verifier().verify_str(&token, None).await?;

    assert_eq!(identity.sub, "001234.alice.0420");
    assert_eq!(identity.iss, "https://appleid.apple.com");
    assert!(identity.aud.includes(TEST_AUDIENCE));
    assert_eq!(identity.email_verified, Some(true));
    assert_eq!(identity.is_private_email, Some(true));
    Ok(())
}

#[tokio::test]
async fn test_es256_token_round_trip() -> Result<()> {
    let key = TestKeypair::es256("ec-key");
    let (_server, store) = store_serving(&[&key]).await;

    let token = key.sign(&TestIdentityTokenBuilder::new().for_user("bob").build());
    let identity = store.verifier().verify(token.as_bytes(), None).await?;

    assert_eq!(identity.sub, "bob");
    Ok(())
}

#[tokio::test]
async fn test_rotation_keeps_both_keys_valid() -> Result<()> {
    let old_key = TestKeypair::ed25519(1, "2023-key");
    let new_key = TestKeypair::es256("2024-key");
    let (_server, store) = store_serving(&[&old_key, &new_key]).await;
    let verifier = store.verifier();

    let claims = TestIdentityTokenBuilder::new().build();
    verifier.verify_str(&old_key.sign(&claims), None).await?;
    verifier.verify_str(&new_key.sign(&claims), None).await?;
    Ok(())
}

#[tokio::test]
async fn test_token_without_kid_matches_by_algorithm() -> Result<()> {
    let ed_key = TestKeypair::ed25519(1, "ed-key");
    let ec_key = TestKeypair::es256("ec-key");
    let (_server, store) = store_serving(&[&ed_key, &ec_key]).await;

    let token = ec_key.sign_without_kid(&TestIdentityTokenBuilder::new().build());
    store.verifier().verify_str(&token, None).await?;
    Ok(())
}

#[tokio::test]
async fn test_bearer_header_path() -> Result<()> {
    let key = TestKeypair::ed25519(1, "ed-key");
    let (_server, store) = store_serving(&[&key]).await;
    let token = key.sign(&TestIdentityTokenBuilder::new().build());

    let identity = store
        .verifier()
        .verify_authorization(Some(&format!("bearer {token}")), None)
        .await?;
    assert!(identity.aud.includes(TEST_AUDIENCE));
    Ok(())
}

// ============================================================================
// Signature failures
// ============================================================================

#[tokio::test]
async fn test_unknown_kid_is_invalid_signature() {
    let published = TestKeypair::ed25519(1, "published");
    let (_server, store) = store_serving(&[&published]).await;

    let unpublished = TestKeypair::ed25519(2, "unpublished");
    let token = unpublished.sign(&TestIdentityTokenBuilder::new().build());

    assert_eq!(
        store.verifier().verify_str(&token, None).await.unwrap_err(),
        AuthError::InvalidSignature
    );
}

#[tokio::test]
async fn test_token_signed_by_other_key_under_published_kid_is_invalid_signature() {
    let published = TestKeypair::ed25519(1, "shared-kid");
    let (_server, store) = store_serving(&[&published]).await;

    let impostor = TestKeypair::ed25519(2, "shared-kid");
    let token = impostor.sign(&TestIdentityTokenBuilder::new().build());

    assert_eq!(
        store.verifier().verify_str(&token, None).await.unwrap_err(),
        AuthError::InvalidSignature
    );
}

#[tokio::test]
async fn test_algorithm_confusion_is_rejected() {
    let ec_key = TestKeypair::es256("ec-key");
    let ed_key = TestKeypair::ed25519(1, "ed-key");
    let (_server, store) = store_serving(&[&ec_key]).await;

    // Signed with EdDSA but pointing at the ES256 key
    let mut header = Header::new(Algorithm::EdDSA);
    header.kid = Some("ec-key".to_string());
    let token = ed_key.sign_with_header(&header, &TestIdentityTokenBuilder::new().build());

    assert_eq!(
        store.verifier().verify_str(&token, None).await.unwrap_err(),
        AuthError::InvalidSignature
    );
}

#[tokio::test]
async fn test_tampered_payload_is_invalid_signature() {
    let key = TestKeypair::ed25519(1, "ed-key");
    let (_server, store) = store_serving(&[&key]).await;

    let token = key.sign(&TestIdentityTokenBuilder::new().for_user("alice").build());
    let forged = key.sign(&TestIdentityTokenBuilder::new().for_user("mallory").build());

    // alice's header and signature around mallory's payload
    let parts: Vec<&str> = token.split('.').collect();
    let forged_parts: Vec<&str> = forged.split('.').collect();
    let tampered = format!("{}.{}.{}", parts[0], forged_parts[1], parts[2]);

    assert_eq!(
        store.verifier().verify_str(&tampered, None).await.unwrap_err(),
        AuthError::InvalidSignature
    );
}

// ============================================================================
// Claim checks
// ============================================================================

#[tokio::test]
async fn test_expired_token_is_rejected() {
    let key = TestKeypair::ed25519(1, "ed-key");
    let (_server, store) = store_serving(&[&key]).await;

    let now = Utc::now().timestamp();
    let token = key.sign(
        &TestIdentityTokenBuilder::new()
            .issued_at(now - 7200)
            .expires_in(-3600)
            .build(),
    );

    assert_eq!(
        store.verifier().verify_str(&token, None).await.unwrap_err(),
        AuthError::TokenExpired
    );
}

#[tokio::test]
async fn test_expiry_within_clock_skew_is_accepted() -> Result<()> {
    let key = TestKeypair::ed25519(1, "ed-key");
    let (_server, store) = store_serving(&[&key]).await;

    // Default skew is 300 seconds
    let token = key.sign(&TestIdentityTokenBuilder::new().expires_in(-60).build());
    store.verifier().verify_str(&token, None).await?;
    Ok(())
}

#[tokio::test]
async fn test_future_iat_is_malformed() {
    let key = TestKeypair::ed25519(1, "ed-key");
    let (_server, store) = store_serving(&[&key]).await;

    let now = Utc::now().timestamp();
    let token = key.sign(
        &TestIdentityTokenBuilder::new()
            .issued_at(now + 3600)
            .expires_in(7200)
            .build(),
    );

    assert_eq!(
        store.verifier().verify_str(&token, None).await.unwrap_err(),
        AuthError::MalformedToken
    );
}

#[tokio::test]
async fn test_wrong_issuer_is_rejected() {
    let key = TestKeypair::ed25519(1, "ed-key");
    let (_server, store) = store_serving(&[&key]).await;

    let token = key.sign(
        &TestIdentityTokenBuilder::new()
            .issuer("https://evil.example.com")
            .build(),
    );

    assert_eq!(
        store.verifier().verify_str(&token, None).await.unwrap_err(),
        AuthError::InvalidIssuer
    );
}

#[tokio::test]
async fn test_claims_missing_subject_is_malformed() {
    let key = TestKeypair::ed25519(1, "ed-key");
    let (_server, store) = store_serving(&[&key]).await;

    let mut claims = TestIdentityTokenBuilder::new().build();
    claims.as_object_mut().unwrap().remove("sub");

    assert_eq!(
        store
            .verifier()
            .verify_str(&key.sign(&claims), None)
            .await
            .unwrap_err(),
        AuthError::MalformedToken
    );
}

// ============================================================================
// Audience precedence
// ============================================================================

#[tokio::test]
async fn test_explicit_audience_overrides_store_identifier() {
    let key = TestKeypair::ed25519(1, "ed-key");
    let (_server, store) = store_serving(&[&key]).await;
    store.set_application_identifier(Some("idB".to_string()));
    let verifier = store.verifier();

    let for_a = key.sign(&TestIdentityTokenBuilder::new().audience("idA").build());
    let for_b = key.sign(&TestIdentityTokenBuilder::new().audience("idB").build());

    assert!(verifier.verify_str(&for_a, Some("idA")).await.is_ok());
    assert_eq!(
        verifier.verify_str(&for_b, Some("idA")).await.unwrap_err(),
        AuthError::AudienceMismatch
    );
}

#[tokio::test]
async fn test_store_identifier_applies_without_explicit_audience() {
    let key = TestKeypair::ed25519(1, "ed-key");
    let (_server, store) = store_serving(&[&key]).await;
    store.set_application_identifier(Some("idB".to_string()));
    let verifier = store.verifier();

    let for_a = key.sign(&TestIdentityTokenBuilder::new().audience("idA").build());
    let for_b = key.sign(&TestIdentityTokenBuilder::new().audience("idB").build());

    assert!(verifier.verify_str(&for_b, None).await.is_ok());
    assert_eq!(
        verifier.verify_str(&for_a, None).await.unwrap_err(),
        AuthError::AudienceMismatch
    );
}

#[tokio::test]
async fn test_no_audience_configured_skips_check() -> Result<()> {
    let key = TestKeypair::ed25519(1, "ed-key");
    let (_server, store) = store_serving(&[&key]).await;
    assert!(store.application_identifier().is_none());

    let token = key.sign(&TestIdentityTokenBuilder::new().audience("anything").build());
    store.verifier().verify_str(&token, None).await?;
    Ok(())
}

#[tokio::test]
async fn test_array_audience_without_expected_value_is_mismatch() {
    let key = TestKeypair::ed25519(1, "ed-key");
    let (_server, store) = store_serving(&[&key]).await;

    let token = key.sign(
        &TestIdentityTokenBuilder::new()
            .audiences(&["other-app"])
            .build(),
    );

    assert_eq!(
        store
            .verifier()
            .verify_str(&token, Some("my-app"))
            .await
            .unwrap_err(),
        AuthError::AudienceMismatch
    );
}

#[tokio::test]
async fn test_array_audience_containing_expected_value_is_accepted() -> Result<()> {
    let key = TestKeypair::ed25519(1, "ed-key");
    let (_server, store) = store_serving(&[&key]).await;

    let token = key.sign(
        &TestIdentityTokenBuilder::new()
            .audiences(&["other-app", "my-app"])
            .build(),
    );
    store.verifier().verify_str(&token, Some("my-app")).await?;
    Ok(())
}

// ============================================================================
// Key-set failures
// ============================================================================

#[tokio::test]
async fn test_empty_token_is_missing_credential_without_fetch() {
    let key = TestKeypair::ed25519(1, "ed-key");
    let (server, store) = store_serving(&[&key]).await;

    assert_eq!(
        store.verifier().verify(b"", None).await.unwrap_err(),
        AuthError::MissingCredential
    );
    assert_eq!(server.request_count().await, 0);
}

#[tokio::test]
async fn test_server_error_is_network_error() {
    let server = MockJwksServer::start().await;
    server.serve_status(500).await;
    let store = AppleKeyStore::new(&config_for(&server));

    let key = TestKeypair::ed25519(1, "ed-key");
    let token = key.sign(&TestIdentityTokenBuilder::new().build());

    assert!(matches!(
        store.verifier().verify_str(&token, None).await,
        Err(AuthError::NetworkError(_))
    ));
}

#[tokio::test]
async fn test_server_error_leaves_unexpired_key_set_in_service() -> Result<()> {
    let key = TestKeypair::ed25519(1, "ed-key");
    let (server, store) = store_serving(&[&key]).await;
    let token = key.sign(&TestIdentityTokenBuilder::new().build());

    store.verifier().verify_str(&token, None).await?;

    server.reset().await;
    server.serve_status(500).await;

    // Forced refresh fails, the cached set is untouched
    assert!(matches!(
        store.refresh().await,
        Err(AuthError::NetworkError(_))
    ));
    store.verifier().verify_str(&token, None).await?;
    Ok(())
}

#[tokio::test]
async fn test_malformed_key_set_is_decode_error() {
    let server = MockJwksServer::start().await;
    server
        .mount(ResponseTemplate::new(200).set_body_string("<html>oops</html>"), None)
        .await;
    let store = AppleKeyStore::new(&config_for(&server));

    let key = TestKeypair::ed25519(1, "ed-key");
    let token = key.sign(&TestIdentityTokenBuilder::new().build());

    assert!(matches!(
        store.verifier().verify_str(&token, None).await,
        Err(AuthError::DecodeError(_))
    ));
}

#[tokio::test]
async fn test_all_keys_unsupported_is_no_usable_keys() {
    let server = MockJwksServer::start().await;
    server
        .serve_json(serde_json::json!({
            "keys": [
                {"kty": "oct", "kid": "hmac", "alg": "HS256", "k": "c2VjcmV0"},
                {"kty": "RSA", "kid": "legacy", "alg": "RS1", "n": "AQAB", "e": "AQAB"}
            ]
        }))
        .await;
    let store = AppleKeyStore::new(&config_for(&server));

    let key = TestKeypair::ed25519(1, "ed-key");
    let token = key.sign(&TestIdentityTokenBuilder::new().build());

    assert_eq!(
        store.verifier().verify_str(&token, None).await.unwrap_err(),
        AuthError::NoUsableKeys
    );
}

#[tokio::test]
async fn test_unsupported_keys_do_not_block_supported_ones() -> Result<()> {
    let key = TestKeypair::ed25519(1, "ed-key");
    let server = MockJwksServer::start().await;
    server
        .serve_json(serde_json::json!({
            "keys": [
                {"kty": "oct", "kid": "hmac", "alg": "HS256", "k": "c2VjcmV0"},
                key.jwk_json()
            ]
        }))
        .await;
    let store = AppleKeyStore::new(&config_for(&server));

    let signers = store.signers().await?;
    assert_eq!(signers.len(), 1);
    assert_eq!(signers.skipped()[0].kid, "hmac");

    let token = key.sign(&TestIdentityTokenBuilder::new().build());
    store.verifier().verify_str(&token, None).await?;
    Ok(())
}

// ============================================================================
// Caching and endpoint changes
// ============================================================================

#[tokio::test]
async fn test_repeated_verifications_fetch_once() -> Result<()> {
    let key = TestKeypair::ed25519(1, "ed-key");
    let server = MockJwksServer::start().await;
    server.serve_keys_expecting(&[&key], 1).await;
    let store = AppleKeyStore::new(&config_for(&server));
    let token = key.sign(&TestIdentityTokenBuilder::new().build());

    for _ in 0..10 {
        store.verifier().verify_str(&token, None).await?;
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_verifications_share_one_fetch() -> Result<()> {
    let key = TestKeypair::ed25519(1, "ed-key");
    let server = MockJwksServer::start().await;
    server
        .serve_keys_delayed(&[&key], Duration::from_millis(200), 1)
        .await;

    let scope = Arc::new(AuthScope::new(config_for(&server)));
    let token = Arc::new(key.sign(&TestIdentityTokenBuilder::new().build()));

    let handles: Vec<_> = (0..32)
        .map(|_| {
            let scope = Arc::clone(&scope);
            let token = Arc::clone(&token);
            tokio::spawn(async move { scope.apple().verifier().verify_str(&token, None).await })
        })
        .collect();

    for result in futures::future::join_all(handles).await {
        result??;
    }

    assert_eq!(server.request_count().await, 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_failure_reaches_every_caller() {
    let server = MockJwksServer::start().await;
    server
        .mount(
            ResponseTemplate::new(503).set_delay(Duration::from_millis(200)),
            Some(1),
        )
        .await;

    let scope = Arc::new(AuthScope::new(config_for(&server)));
    let key = TestKeypair::ed25519(1, "ed-key");
    let token = Arc::new(key.sign(&TestIdentityTokenBuilder::new().build()));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let scope = Arc::clone(&scope);
            let token = Arc::clone(&token);
            tokio::spawn(async move { scope.apple().verifier().verify_str(&token, None).await })
        })
        .collect();

    for result in futures::future::join_all(handles).await {
        assert!(matches!(
            result.unwrap(),
            Err(AuthError::NetworkError(msg)) if msg.contains("503")
        ));
    }
}

#[tokio::test]
async fn test_set_endpoint_never_serves_previous_keys() -> Result<()> {
    let old_key = TestKeypair::ed25519(1, "old-key");
    let new_key = TestKeypair::ed25519(2, "new-key");

    let old_server = MockJwksServer::start().await;
    old_server.serve_keys(&[&old_key]).await;
    let new_server = MockJwksServer::start().await;
    new_server.serve_keys(&[&new_key]).await;

    let store = AppleKeyStore::new(&config_for(&old_server));
    let verifier = store.verifier();
    let old_token = old_key.sign(&TestIdentityTokenBuilder::new().build());
    let new_token = new_key.sign(&TestIdentityTokenBuilder::new().build());

    verifier.verify_str(&old_token, None).await?;

    store.set_endpoint(new_server.jwks_url())?;
    assert_eq!(store.endpoint(), new_server.jwks_url());

    assert_eq!(
        verifier.verify_str(&old_token, None).await.unwrap_err(),
        AuthError::InvalidSignature
    );
    verifier.verify_str(&new_token, None).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_set_endpoint_during_refresh_discards_old_fetch() -> Result<()> {
    let old_key = TestKeypair::ed25519(1, "old-key");
    let new_key = TestKeypair::ed25519(2, "new-key");

    let old_server = MockJwksServer::start().await;
    old_server
        .serve_keys_delayed(&[&old_key], Duration::from_millis(300), 1)
        .await;
    let new_server = MockJwksServer::start().await;
    new_server.serve_keys(&[&new_key]).await;

    let store = Arc::new(AppleKeyStore::new(&config_for(&old_server)));

    let slow_fetch = {
        let store = Arc::clone(&store);
        tokio::spawn(async move { store.key_set().await })
    };

    // Old fetch is still waiting on its delayed response
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!slow_fetch.is_finished());

    store.set_endpoint(new_server.jwks_url())?;

    let key_set = store.key_set().await?;
    assert!(key_set.get("new-key").is_some());
    assert!(key_set.get("old-key").is_none());

    // The old refresh completes into the discarded cache
    let stale = slow_fetch.await??;
    assert!(stale.get("old-key").is_some());

    let key_set = store.key_set().await?;
    assert!(key_set.get("old-key").is_none());

    let old_token = old_key.sign(&TestIdentityTokenBuilder::new().build());
    assert_eq!(
        store.verifier().verify_str(&old_token, None).await.unwrap_err(),
        AuthError::InvalidSignature
    );
    assert_eq!(new_server.request_count().await, 1);
    Ok(())
}

#[tokio::test]
async fn test_abandoned_verification_does_not_cancel_refresh() -> Result<()> {
    let key = TestKeypair::ed25519(1, "ed-key");
    let server = MockJwksServer::start().await;
    server
        .serve_keys_delayed(&[&key], Duration::from_millis(200), 1)
        .await;
    let store = AppleKeyStore::new(&config_for(&server));
    let token = key.sign(&TestIdentityTokenBuilder::new().build());

    let abandoned = tokio::time::timeout(
        Duration::from_millis(20),
        store.verifier().verify_str(&token, None),
    )
    .await;
    assert!(abandoned.is_err());

    // Joins the refresh the abandoned call started
    store.verifier().verify_str(&token, None).await?;
    Ok(())
}
