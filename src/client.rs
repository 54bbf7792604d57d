//! The public client.
//!
//! [`NestClient`] validates its configuration up front, owns the credential
//! cache and holds one idle [`MulticastChannel`] per stream. Nothing touches
//! the network until [`NestClient::init`] or a subscription asks for it.

use std::sync::Arc;

use crate::adapters::ReqwestHttpClient;
use crate::auth::{CredentialManager, OAuthExchange, TokenExchange};
use crate::config::{ClientOptions, Config};
use crate::error::{CamError, CamResult};
use crate::payload::{Event, Snapshot, StreamItem};
use crate::poll::{
    ApiContext, Deduplicated, FnObserver, MulticastChannel, Observer, PollScheduler, StreamKind,
    Subscription, SubscriptionRegistry,
};
use crate::traits::{ByteStream, HttpClient};

pub const UNSUBSCRIBE_MISSING_KIND: &str =
    "You must specify the type of string to unsubscribe from. Either \"event\", or \"snapshot\".";
pub const UNSUBSCRIBE_UNKNOWN_KIND: &str =
    "You must specify a type of event to unsubscribe from either: \"event\" or \"snapshot\"";
pub const EVENTS_NOT_INITIALIZED: &str =
    "Access token is null or undefined call: #fetchAccessToken() to retrieve new OAuth token.";
pub const SNAPSHOT_NOT_INITIALIZED: &str =
    "JWT token is null or undefined. Call #fetchJwtToken() to retrieve new json web token.";

/// Forwards one typed stream into a [`StreamItem`] observer.
struct ItemObserver<T> {
    inner: Arc<dyn Observer<StreamItem>>,
    wrap: fn(T) -> StreamItem,
}

impl<T> Observer<T> for ItemObserver<T> {
    fn on_next(&self, value: T) {
        self.inner.on_next((self.wrap)(value));
    }

    fn on_error(&self, error: CamError) {
        self.inner.on_error(error);
    }

    fn on_complete(&self) {
        self.inner.on_complete();
    }
}

pub struct NestClient {
    config: Config,
    credentials: Arc<CredentialManager>,
    api: Arc<ApiContext>,
    events: MulticastChannel<Event>,
    snapshots: MulticastChannel<Snapshot>,
    registry: SubscriptionRegistry,
}

impl NestClient {
    /// Validate `options` and build a client over reqwest.
    pub fn new(options: Option<ClientOptions>) -> CamResult<Self> {
        Self::with_http_client(options, Arc::new(ReqwestHttpClient::new()))
    }

    /// Validate `options` and build a client over a caller-supplied transport.
    pub fn with_http_client(
        options: Option<ClientOptions>,
        http: Arc<dyn HttpClient>,
    ) -> CamResult<Self> {
        let config = Config::from_options(options)?;
        Ok(Self::from_config(config, http))
    }

    pub fn from_config(config: Config, http: Arc<dyn HttpClient>) -> Self {
        let exchange = Arc::new(OAuthExchange::new(http.clone(), &config));
        Self::with_exchange(config, http, exchange)
    }

    /// Build with a custom token exchange, for tests and alternative auth flows.
    pub fn with_exchange(
        config: Config,
        http: Arc<dyn HttpClient>,
        exchange: Arc<dyn TokenExchange>,
    ) -> Self {
        let credentials = Arc::new(CredentialManager::new(exchange, config.refresh_policy));
        let api = Arc::new(ApiContext::new(
            http,
            credentials.clone(),
            config.endpoints.clone(),
        ));

        let events_api = api.clone();
        let events = MulticastChannel::new(
            "events",
            Deduplicated::new(PollScheduler::new("events", config.event_interval, move || {
                let api = events_api.clone();
                async move { api.fetch_todays_events().await }
            })),
        );

        let snapshots_api = api.clone();
        let snapshots = MulticastChannel::new(
            "snapshots",
            PollScheduler::new("snapshots", config.snapshot_interval, move || {
                let api = snapshots_api.clone();
                async move { api.fetch_latest_snapshot().await }
            }),
        );

        tracing::debug!(nest_id = %config.nest_id, host = %config.endpoints.host(), "Client created");

        Self {
            config,
            credentials,
            api,
            events,
            snapshots,
            registry: SubscriptionRegistry::new(),
        }
    }

    /// Obtain both tokens.
    pub async fn init(&self) -> CamResult<&Self> {
        self.credentials.refresh().await?;
        tracing::info!(nest_id = %self.config.nest_id, "Client initialized");
        Ok(self)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn credentials(&self) -> &Arc<CredentialManager> {
        &self.credentials
    }

    pub fn primary_token(&self) -> Option<String> {
        self.credentials.primary_token()
    }

    pub fn derived_token(&self) -> Option<String> {
        self.credentials.derived_token()
    }

    /// Subscribe to the stream named `kind` ("event", "snapshot", plurals and any case).
    ///
    /// An unknown name is logged and ignored; the return value says whether a
    /// subscription was made. A second subscription to the same stream
    /// replaces the first.
    pub fn subscribe(
        &self,
        kind: &str,
        on_next: impl Fn(StreamItem) + Send + Sync + 'static,
    ) -> bool {
        self.subscribe_with(kind, Arc::new(FnObserver::new(on_next)))
    }

    /// [`subscribe`](Self::subscribe) with error and completion callbacks.
    pub fn subscribe_with(&self, kind: &str, observer: Arc<dyn Observer<StreamItem>>) -> bool {
        let Ok(kind) = kind.parse::<StreamKind>() else {
            tracing::warn!(
                kind,
                "No known stream to subscribe to. Use either \"event\" or \"snapshot\""
            );
            return false;
        };

        let subscription = match kind {
            StreamKind::Event => self.events.subscribe(Arc::new(ItemObserver {
                inner: observer,
                wrap: StreamItem::Event,
            })),
            StreamKind::Snapshot => self.snapshots.subscribe(Arc::new(ItemObserver {
                inner: observer,
                wrap: StreamItem::Snapshot,
            })),
        };
        self.registry.insert(kind, subscription);
        tracing::debug!(kind = %kind, "Subscribed");
        true
    }

    /// Cancel the subscription made through [`subscribe`](Self::subscribe).
    ///
    /// A valid kind with nothing subscribed is not an error.
    pub fn unsubscribe(&self, kind: Option<&str>) -> CamResult<()> {
        let kind = kind
            .filter(|kind| !kind.is_empty())
            .ok_or_else(|| CamError::InvalidArgument(UNSUBSCRIBE_MISSING_KIND.to_string()))?;
        let kind = match kind.to_ascii_lowercase().as_str() {
            "event" => StreamKind::Event,
            "snapshot" => StreamKind::Snapshot,
            _ => return Err(CamError::InvalidArgument(UNSUBSCRIBE_UNKNOWN_KIND.to_string())),
        };

        if self.registry.cancel(kind) {
            tracing::debug!(kind = %kind, "Unsubscribed");
        }
        Ok(())
    }

    pub fn is_subscribed(&self, kind: StreamKind) -> bool {
        self.registry.contains(kind)
    }

    /// Independent subscriber on the events stream.
    pub fn subscribe_events(&self, observer: Arc<dyn Observer<Event>>) -> Subscription {
        self.events.subscribe(observer)
    }

    /// Independent subscriber on the snapshot stream.
    pub fn subscribe_snapshots(&self, observer: Arc<dyn Observer<Snapshot>>) -> Subscription {
        self.snapshots.subscribe(observer)
    }

    pub fn events_channel(&self) -> &MulticastChannel<Event> {
        &self.events
    }

    pub fn snapshots_channel(&self) -> &MulticastChannel<Snapshot> {
        &self.snapshots
    }

    /// Events between two unix-second bounds. Requires [`init`](Self::init).
    pub async fn get_events(&self, start: Option<i64>, end: Option<i64>) -> CamResult<Vec<Event>> {
        if self.derived_token().is_none() {
            return Err(CamError::NotInitialized(EVENTS_NOT_INITIALIZED.to_string()));
        }
        self.api.fetch_events(start, end).await
    }

    /// Stream of the camera's current image.
    pub async fn get_latest_snapshot(&self) -> CamResult<ByteStream> {
        self.api.fetch_latest_image().await
    }

    /// Stream of a stored event snapshot. Requires [`init`](Self::init).
    pub async fn get_snapshot(&self, snapshot_id: &str) -> CamResult<ByteStream> {
        if self.derived_token().is_none() {
            return Err(CamError::NotInitialized(SNAPSHOT_NOT_INITIALIZED.to_string()));
        }
        self.api.fetch_snapshot(snapshot_id).await
    }

    /// Cancel every subscription made through [`subscribe`](Self::subscribe).
    pub fn shutdown(&self) {
        self.registry.clear();
        tracing::debug!("Client shut down");
    }
}

impl Drop for NestClient {
    fn drop(&mut self) {
        self.registry.clear();
    }
}

impl std::fmt::Debug for NestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NestClient")
            .field("config", &self.config)
            .field("credentials", &self.credentials)
            .field("registry", &self.registry)
            .finish()
    }
}
