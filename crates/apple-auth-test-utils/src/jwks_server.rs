//! Mock key-set endpoint
//!
//! Wraps a `wiremock` server that answers `GET /auth/keys`, the path Apple
//! publishes its keys under.

use crate::crypto_fixtures::{key_set_json, TestKeypair};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Path the mock serves the key set on.
pub const JWKS_PATH: &str = "/auth/keys";

/// A mock key-set endpoint.
pub struct MockJwksServer {
    server: MockServer,
}

impl MockJwksServer {
    /// Start a server with nothing mounted (every request gets 404).
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Full key-set URL to configure the verifier with.
    pub fn jwks_url(&self) -> String {
        format!("{}{}", self.server.uri(), JWKS_PATH)
    }

    /// Serve the given keys for every request.
    pub async fn serve_keys(&self, keys: &[&TestKeypair]) {
        self.mount(self.keys_response(keys), None).await;
    }

    /// Serve the given keys and verify on drop that exactly `times`
    /// requests arrived.
    pub async fn serve_keys_expecting(&self, keys: &[&TestKeypair], times: u64) {
        self.mount(self.keys_response(keys), Some(times)).await;
    }

    /// Serve the given keys after `delay`, expecting exactly `times` requests.
    pub async fn serve_keys_delayed(&self, keys: &[&TestKeypair], delay: Duration, times: u64) {
        self.mount(self.keys_response(keys).set_delay(delay), Some(times))
            .await;
    }

    /// Serve an arbitrary JSON document.
    pub async fn serve_json(&self, body: serde_json::Value) {
        self.mount(ResponseTemplate::new(200).set_body_json(body), None)
            .await;
    }

    /// Answer every request with `status` and an empty body.
    pub async fn serve_status(&self, status: u16) {
        self.mount(ResponseTemplate::new(status), None).await;
    }

    /// Mount a custom response.
    pub async fn mount(&self, response: ResponseTemplate, expected: Option<u64>) {
        let mock = Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(response);
        let mock = match expected {
            Some(times) => mock.expect(times),
            None => mock,
        };
        mock.mount(&self.server).await;
    }

    /// Drop every mounted response, e.g. to switch from keys to failures.
    pub async fn reset(&self) {
        self.server.reset().await;
    }

    /// Number of requests the server has received.
    pub async fn request_count(&self) -> usize {
        self.server
            .received_requests()
            .await
            .map_or(0, |requests| requests.len())
    }

    fn keys_response(&self, keys: &[&TestKeypair]) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(key_set_json(keys))
    }
}
