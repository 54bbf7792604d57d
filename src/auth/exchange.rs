//! Token exchanges against the authorization service.
//!
//! Two calls make up the chain:
//!
//! 1. `POST oauth2/token` (form): refresh token + client id -> `access_token`
//!    (the primary token).
//! 2. `POST issue_jwt` (JSON, API key header): primary token -> `jwt`
//!    (the derived token, valid for one hour).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::TokenKind;
use crate::config::Config;
use crate::error::{CamError, CamResult};
use crate::traits::{Headers, HttpClient};

/// Validity window requested for derived tokens.
pub const DERIVED_TOKEN_TTL: &str = "3600s";

/// Policy the derived token is issued under.
pub const DERIVED_TOKEN_POLICY: &str = "authproxy-oauth-policy";

/// The authorization collaborator.
///
/// Implementations perform the network exchange only; caching lives in
/// [`CredentialManager`](super::CredentialManager).
#[async_trait]
pub trait TokenExchange: Send + Sync {
    /// Exchange the long-lived refresh credential for a primary token.
    async fn exchange_primary(&self) -> CamResult<String>;

    /// Exchange a primary token for a derived token.
    async fn exchange_derived(&self, primary: &str) -> CamResult<String>;
}

/// Body of a successful primary token exchange.
#[derive(Debug, Clone, Deserialize)]
pub struct PrimaryTokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// Body of a successful derived token exchange.
#[derive(Debug, Clone, Deserialize)]
pub struct DerivedTokenResponse {
    pub jwt: String,
    #[serde(default)]
    pub claims: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct DerivedTokenRequest<'a> {
    expire_after: &'a str,
    policy_id: &'a str,
    google_oauth_access_token: &'a str,
    embed_google_oauth_access_token: &'a str,
}

/// [`TokenExchange`] over the HTTP transport.
pub struct OAuthExchange {
    http: Arc<dyn HttpClient>,
    oauth_url: String,
    jwt_url: String,
    refresh_token: String,
    client_id: String,
    api_key: String,
}

impl OAuthExchange {
    pub fn new(http: Arc<dyn HttpClient>, config: &Config) -> Self {
        Self {
            http,
            oauth_url: config.oauth_url.clone(),
            jwt_url: config.jwt_url.clone(),
            refresh_token: config.refresh_token.clone(),
            client_id: config.client_id.clone(),
            api_key: config.api_key.clone(),
        }
    }

    fn form_body(&self) -> String {
        [
            ("refresh_token", self.refresh_token.as_str()),
            ("client_id", self.client_id.as_str()),
            ("grant_type", "refresh_token"),
        ]
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
    }
}

/// Decode an exchange body, rejecting empty token fields.
fn decode<T, F>(kind: TokenKind, body: &[u8], token: F) -> CamResult<String>
where
    T: serde::de::DeserializeOwned,
    F: FnOnce(T) -> String,
{
    let parsed: T = serde_json::from_slice(body)
        .map_err(|e| CamError::exchange(kind, format!("malformed response: {}", e)))?;
    let value = token(parsed);
    if value.is_empty() {
        return Err(CamError::exchange(kind, "response carried an empty token"));
    }
    Ok(value)
}

#[async_trait]
impl TokenExchange for OAuthExchange {
    async fn exchange_primary(&self) -> CamResult<String> {
        let mut headers = Headers::new();
        headers.insert(
            "Content-Type".to_string(),
            "application/x-www-form-urlencoded; charset=UTF-8".to_string(),
        );

        tracing::debug!(url = %self.oauth_url, "Requesting primary token");

        let response = self
            .http
            .post(&self.oauth_url, &self.form_body(), &headers)
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| CamError::exchange(TokenKind::Primary, e.to_string()))?;

        decode(TokenKind::Primary, &response.body, |r: PrimaryTokenResponse| {
            r.access_token
        })
    }

    async fn exchange_derived(&self, primary: &str) -> CamResult<String> {
        let mut headers = Headers::new();
        headers.insert("x-goog-api-key".to_string(), self.api_key.clone());
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        headers.insert("Accept".to_string(), "application/json".to_string());
        headers.insert("Authorization".to_string(), format!("Bearer {}", primary));

        let body = serde_json::to_string(&DerivedTokenRequest {
            expire_after: DERIVED_TOKEN_TTL,
            policy_id: DERIVED_TOKEN_POLICY,
            google_oauth_access_token: primary,
            embed_google_oauth_access_token: "true",
        })
        .map_err(|e| CamError::exchange(TokenKind::Derived, e.to_string()))?;

        tracing::debug!(url = %self.jwt_url, "Requesting derived token");

        let response = self
            .http
            .post(&self.jwt_url, &body, &headers)
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| CamError::exchange(TokenKind::Derived, e.to_string()))?;

        decode(TokenKind::Derived, &response.body, |r: DerivedTokenResponse| r.jwt)
    }
}
