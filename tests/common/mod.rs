//! Shared fixtures for integration tests.
//!
//! Every test gets its own `MockServer`; these helpers mount the
//! authorization endpoints on it and point a client's options at it.

#![allow(dead_code)]

use nestcam::ClientOptions;
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const NEST_ID: &str = "cam-0001";
pub const OAUTH_PATH: &str = "/oauth2/token";
pub const JWT_PATH: &str = "/v1/issue_jwt";

/// Options with every URL pointed at `server`.
pub fn options_for(server: &MockServer) -> ClientOptions {
    let uri = server.uri();
    ClientOptions::new(NEST_ID, "refresh-seed", "api-key-1", "client-1")
        .with_host(uri.clone())
        .with_auth_urls(format!("{}{}", uri, OAUTH_PATH), format!("{}{}", uri, JWT_PATH))
}

/// Mount a token endpoint answering `primary` and a JWT endpoint answering `derived`.
pub async fn mount_auth(server: &MockServer, primary: &str, derived: &str) {
    Mock::given(method("POST"))
        .and(path(OAUTH_PATH))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": primary,
            "expires_in": 3599,
            "token_type": "Bearer"
        })))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path(JWT_PATH))
        .and(header("x-goog-api-key", "api-key-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "jwt": derived })))
        .mount(server)
        .await;
}

/// Number of requests `server` received on `request_path`.
pub async fn hits(server: &MockServer, request_path: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == request_path)
        .count()
}
