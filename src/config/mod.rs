//! Client configuration.
//!
//! [`ClientOptions`] is the loose, caller-supplied input (every field
//! optional, unknown properties preserved). [`Config::from_options`] turns it
//! into a validated [`Config`] or fails with a field-specific
//! [`CamError::ConfigValidation`].
//!
//! # Example
//!
//! ```ignore
//! use nestcam::config::{ClientOptions, Config};
//!
//! let options = ClientOptions::new("camera-id", "refresh-token", "api-key", "client-id")
//!     .with_event_interval_ms(1_000);
//! let config = Config::from_options(Some(options))?;
//! ```

pub mod endpoints;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

pub use endpoints::Endpoints;

use crate::error::{CamError, CamResult};

/// Default period between event polls.
pub const DEFAULT_EVENT_INTERVAL_MS: u64 = 3000;

/// Default period between snapshot polls.
pub const DEFAULT_SNAPSHOT_INTERVAL_MS: u64 = 5000;

/// Number of properties a usable options object must at least carry.
pub const REQUIRED_FIELD_COUNT: usize = 4;

const REQUIRED_FIELDS_HINT: &str = "nestId, refreshToken, apiKey, clientId";

/// What [`CredentialManager::refresh`](crate::auth::CredentialManager::refresh) does
/// with tokens that are already cached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshPolicy {
    /// Only populate empty slots; a refresh with both tokens cached is a no-op.
    #[default]
    FillEmpty,
    /// Fetch a fresh pair and swap it in once both exchanges succeed.
    Rotate,
}

/// Raw construction input, mirroring the JSON options object callers pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nest_id: Option<String>,
    /// Long-lived refresh credential (primary token seed).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// API key sent with the derived token exchange.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Replaces the camera API host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_interval_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_interval_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotate_tokens: Option<bool>,
    /// Properties this crate does not interpret.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ClientOptions {
    /// Options carrying the four required properties.
    pub fn new(
        nest_id: impl Into<String>,
        refresh_token: impl Into<String>,
        api_key: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            nest_id: Some(nest_id.into()),
            refresh_token: Some(refresh_token.into()),
            api_key: Some(api_key.into()),
            client_id: Some(client_id.into()),
            ..Self::default()
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_event_interval_ms(mut self, ms: u64) -> Self {
        self.event_interval_ms = Some(ms);
        self
    }

    pub fn with_snapshot_interval_ms(mut self, ms: u64) -> Self {
        self.snapshot_interval_ms = Some(ms);
        self
    }

    /// Point both token exchanges somewhere else (used by tests).
    pub fn with_auth_urls(mut self, oauth_url: impl Into<String>, jwt_url: impl Into<String>) -> Self {
        self.oauth_url = Some(oauth_url.into());
        self.jwt_url = Some(jwt_url.into());
        self
    }

    pub fn with_rotate_tokens(mut self, rotate: bool) -> Self {
        self.rotate_tokens = Some(rotate);
        self
    }

    /// Attach a property this crate does not interpret.
    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Number of properties present, recognised or not.
    pub fn field_count(&self) -> usize {
        let strings = [
            &self.nest_id,
            &self.refresh_token,
            &self.api_key,
            &self.client_id,
            &self.host,
            &self.oauth_url,
            &self.jwt_url,
        ];
        strings.iter().filter(|f| f.is_some()).count()
            + usize::from(self.event_interval_ms.is_some())
            + usize::from(self.snapshot_interval_ms.is_some())
            + usize::from(self.rotate_tokens.is_some())
            + self.extra.len()
    }
}

/// Validated client configuration.
#[derive(Clone)]
pub struct Config {
    pub nest_id: String,
    pub refresh_token: String,
    pub api_key: String,
    pub client_id: String,
    pub endpoints: Endpoints,
    pub event_interval: Duration,
    pub snapshot_interval: Duration,
    pub oauth_url: String,
    pub jwt_url: String,
    pub refresh_policy: RefreshPolicy,
}

fn required(value: &Option<String>, name: &str) -> CamResult<String> {
    match value.as_deref() {
        Some(v) if !v.trim().is_empty() => Ok(v.to_string()),
        _ => Err(CamError::ConfigValidation(format!(
            "The property: {} is not defined.",
            name
        ))),
    }
}

fn interval(value: Option<u64>, default_ms: u64, name: &str) -> CamResult<Duration> {
    match value.unwrap_or(default_ms) {
        0 => Err(CamError::ConfigValidation(format!(
            "The property: {} must be greater than 0.",
            name
        ))),
        ms => Ok(Duration::from_millis(ms)),
    }
}

impl Config {
    /// Validate `options`.
    ///
    /// Checks run in a fixed order and the first failure wins: options
    /// absent, fewer than four properties, then `nestId`, `refreshToken`,
    /// `apiKey` and `clientId`.
    pub fn from_options(options: Option<ClientOptions>) -> CamResult<Self> {
        let options = options.ok_or_else(|| {
            CamError::ConfigValidation(format!(
                "The options argument cannot be null. It must include properties: {}",
                REQUIRED_FIELDS_HINT
            ))
        })?;

        if options.field_count() < REQUIRED_FIELD_COUNT {
            return Err(CamError::ConfigValidation(format!(
                "You must have at least the following four properties: {}",
                REQUIRED_FIELDS_HINT
            )));
        }

        let nest_id = required(&options.nest_id, "nestId")?;
        let refresh_token = required(&options.refresh_token, "refreshToken")?;
        let api_key = required(&options.api_key, "apiKey")?;
        let client_id = required(&options.client_id, "clientId")?;

        let event_interval = interval(
            options.event_interval_ms,
            DEFAULT_EVENT_INTERVAL_MS,
            "eventIntervalMs",
        )?;
        let snapshot_interval = interval(
            options.snapshot_interval_ms,
            DEFAULT_SNAPSHOT_INTERVAL_MS,
            "snapshotIntervalMs",
        )?;

        let host = options
            .host
            .filter(|h| !h.trim().is_empty())
            .unwrap_or_else(|| endpoints::NEXUS_HOST.to_string());

        let refresh_policy = if options.rotate_tokens.unwrap_or(false) {
            RefreshPolicy::Rotate
        } else {
            RefreshPolicy::FillEmpty
        };

        Ok(Self {
            endpoints: Endpoints::new(host, nest_id.clone()),
            nest_id,
            refresh_token,
            api_key,
            client_id,
            event_interval,
            snapshot_interval,
            oauth_url: options
                .oauth_url
                .unwrap_or_else(|| endpoints::OAUTH_URL.to_string()),
            jwt_url: options
                .jwt_url
                .unwrap_or_else(|| endpoints::JWT_TOKEN_URL.to_string()),
            refresh_policy,
        })
    }

    /// Build options from `NEST_ID`, `REFRESH_TOKEN`, `API_KEY`, `CLIENT_ID`
    /// and the optional `NEST_HOST`, then validate them.
    ///
    /// Only the demo binary reads the environment; library code always takes
    /// an explicit [`Config`].
    pub fn from_env() -> CamResult<Self> {
        let var = |name: &str| std::env::var(name).ok();
        let options = ClientOptions {
            nest_id: var("NEST_ID"),
            refresh_token: var("REFRESH_TOKEN"),
            api_key: var("API_KEY"),
            client_id: var("CLIENT_ID"),
            host: var("NEST_HOST"),
            ..ClientOptions::default()
        };
        Self::from_options(Some(options))
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("nest_id", &self.nest_id)
            .field("refresh_token", &"<redacted>")
            .field("api_key", &"<redacted>")
            .field("client_id", &self.client_id)
            .field("host", &self.endpoints.host())
            .field("event_interval", &self.event_interval)
            .field("snapshot_interval", &self.snapshot_interval)
            .field("refresh_policy", &self.refresh_policy)
            .finish()
    }
}
