//! One authenticated call to the camera API.
//!
//! [`FetchSource`] is a plain description of the request. [`ApiContext`]
//! executes it: it attaches the cached derived token, issues the call and,
//! when anything fails, kicks off a background credential refresh before
//! handing the error back.

use bytes::BytesMut;
use chrono::{Local, TimeZone, Utc};
use futures_util::StreamExt;
use std::sync::Arc;

use crate::auth::CredentialManager;
use crate::config::Endpoints;
use crate::error::{CamError, CamResult};
use crate::payload::{Event, Snapshot};
use crate::traits::{ByteStream, Headers, HttpClient};

/// How the response body is consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    /// Read the whole body and parse it as JSON.
    Buffered,
    /// Hand the body back as a byte stream.
    Streamed,
}

/// A GET request authorized with the derived token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchSource {
    url: String,
    mode: ResponseMode,
}

impl FetchSource {
    pub fn buffered(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            mode: ResponseMode::Buffered,
        }
    }

    pub fn streamed(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            mode: ResponseMode::Streamed,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn mode(&self) -> ResponseMode {
        self.mode
    }

    /// Request headers for `derived_token`.
    pub fn headers(&self, derived_token: &str) -> Headers {
        let mut headers = Headers::new();
        headers.insert(
            "Authorization".to_string(),
            format!("Basic {}", derived_token),
        );
        headers
    }
}

/// Result of executing a [`FetchSource`].
pub enum Payload {
    Json(serde_json::Value),
    Stream(ByteStream),
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Payload::Json(value) => f.debug_tuple("Json").field(value).finish(),
            Payload::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Everything needed to run a [`FetchSource`].
pub struct ApiContext {
    http: Arc<dyn HttpClient>,
    credentials: Arc<CredentialManager>,
    endpoints: Endpoints,
}

impl ApiContext {
    pub fn new(
        http: Arc<dyn HttpClient>,
        credentials: Arc<CredentialManager>,
        endpoints: Endpoints,
    ) -> Self {
        Self {
            http,
            credentials,
            endpoints,
        }
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Execute `source`. Any failure schedules a background credential refresh.
    pub async fn execute(&self, source: &FetchSource) -> CamResult<Payload> {
        self.try_execute(source)
            .await
            .map_err(|e| self.failed(source.url(), e))
    }

    /// Log `error` and schedule a background credential refresh.
    fn failed(&self, url: &str, error: CamError) -> CamError {
        tracing::warn!(
            url = %url,
            error = %error,
            code = error.error_code(),
            "Camera API request failed, refreshing credentials"
        );
        self.credentials.refresh_in_background();
        error
    }

    async fn try_execute(&self, source: &FetchSource) -> CamResult<Payload> {
        let token = self
            .credentials
            .derived_token()
            .ok_or(CamError::MissingCredential)?;
        let headers = source.headers(&token);

        match source.mode() {
            ResponseMode::Buffered => {
                let response = self
                    .http
                    .get(source.url(), &headers)
                    .await?
                    .error_for_status()?;
                Ok(Payload::Json(response.json()?))
            }
            ResponseMode::Streamed => {
                let stream = self.http.get_stream(source.url(), &headers).await?;
                Ok(Payload::Stream(stream))
            }
        }
    }

    /// Events between two unix-second bounds, oldest first as the API returns them.
    pub async fn fetch_events(&self, start: Option<i64>, end: Option<i64>) -> CamResult<Vec<Event>> {
        let source = FetchSource::buffered(self.endpoints.events_url(start, end));
        match self.execute(&source).await? {
            Payload::Json(serde_json::Value::Array(events)) => Ok(events),
            Payload::Json(other) => Err(CamError::InvalidResponse(format!(
                "expected an array of events, got {}",
                json_kind(&other)
            ))),
            Payload::Stream(_) => Err(CamError::InvalidResponse(
                "expected a JSON body".to_string(),
            )),
        }
    }

    /// Today's events, for the polled events stream.
    pub async fn fetch_todays_events(&self) -> CamResult<Vec<Event>> {
        let (start, end) = today_window();
        self.fetch_events(Some(start), Some(end)).await
    }

    /// Stream of the camera's current image.
    pub async fn fetch_latest_image(&self) -> CamResult<ByteStream> {
        let source = FetchSource::streamed(self.endpoints.latest_image_url());
        self.execute_stream(&source).await
    }

    /// Stream of a stored event snapshot.
    pub async fn fetch_snapshot(&self, snapshot_id: &str) -> CamResult<ByteStream> {
        let source = FetchSource::streamed(self.endpoints.snapshot_url(snapshot_id));
        self.execute_stream(&source).await
    }

    /// Download the current image into memory, for the polled snapshot stream.
    ///
    /// A body that breaks off mid-stream counts as a failed request.
    pub async fn fetch_latest_snapshot(&self) -> CamResult<Snapshot> {
        let source = FetchSource::streamed(self.endpoints.latest_image_url());
        let mut stream = self.execute_stream(&source).await?;
        let mut buffer = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(bytes) => buffer.extend_from_slice(&bytes),
                Err(e) => return Err(self.failed(source.url(), e.into())),
            }
        }
        Ok(Snapshot::new(buffer.freeze()))
    }

    async fn execute_stream(&self, source: &FetchSource) -> CamResult<ByteStream> {
        match self.execute(source).await? {
            Payload::Stream(stream) => Ok(stream),
            Payload::Json(_) => Err(CamError::InvalidResponse(
                "expected a streamed body".to_string(),
            )),
        }
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

/// Unix-second bounds from local midnight to now.
pub fn today_window() -> (i64, i64) {
    let now = Local::now();
    let start = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|midnight| Local.from_local_datetime(&midnight).earliest())
        .map(|midnight| midnight.timestamp())
        .unwrap_or_else(|| (Utc::now() - chrono::Duration::hours(24)).timestamp());
    (start, now.timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::{MockHttpClient, MockResponse};
    use crate::auth::{TokenExchange, TokenKind};
    use crate::config::RefreshPolicy;
    use crate::traits::HttpError;
    use async_trait::async_trait;
    use bytes::Bytes;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingExchange {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TokenExchange for CountingExchange {
        async fn exchange_primary(&self) -> CamResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("T1".to_string())
        }

        async fn exchange_derived(&self, _primary: &str) -> CamResult<String> {
            Ok("J1".to_string())
        }
    }

    struct FailingExchange;

    #[async_trait]
    impl TokenExchange for FailingExchange {
        async fn exchange_primary(&self) -> CamResult<String> {
            Err(CamError::exchange(TokenKind::Primary, "offline"))
        }

        async fn exchange_derived(&self, _primary: &str) -> CamResult<String> {
            Err(CamError::exchange(TokenKind::Derived, "offline"))
        }
    }

    async fn context(http: &MockHttpClient) -> ApiContext {
        let credentials = Arc::new(CredentialManager::new(
            Arc::new(CountingExchange::default()),
            RefreshPolicy::FillEmpty,
        ));
        credentials.refresh().await.unwrap();
        ApiContext::new(
            Arc::new(http.clone()),
            credentials,
            Endpoints::new("https://cam.test", "cam1"),
        )
    }

    #[test]
    fn test_fetch_source_headers() {
        let source = FetchSource::buffered("https://cam.test/cuepoint/cam1/2");
        assert_eq!(source.mode(), ResponseMode::Buffered);
        assert_eq!(source.headers("J1")["Authorization"], "Basic J1");
    }

    #[tokio::test]
    async fn test_fetch_events_returns_array_verbatim() {
        let http = MockHttpClient::new();
        http.set_response(
            "https://cam.test/cuepoint/cam1/2",
            MockResponse::json(json!([{"id": "a"}, {"id": "b"}])),
        );
        let api = context(&http).await;

        let events = api.fetch_events(Some(1), Some(2)).await.unwrap();
        assert_eq!(events, vec![json!({"id": "a"}), json!({"id": "b"})]);

        let request = &http.get_requests()[0];
        assert_eq!(request.url, "https://cam.test/cuepoint/cam1/2?start_time=1&end_time=2");
        assert_eq!(request.headers["Authorization"], "Basic J1");
    }

    #[tokio::test]
    async fn test_non_array_body_is_invalid_response() {
        let http = MockHttpClient::new();
        http.set_default_response(MockResponse::json(json!({"error": "nope"})));
        let api = context(&http).await;

        let err = api.fetch_events(None, None).await.unwrap_err();
        assert_eq!(
            err,
            CamError::InvalidResponse("expected an array of events, got an object".to_string())
        );
    }

    #[tokio::test]
    async fn test_missing_token_fails_before_request() {
        let http = MockHttpClient::new();
        let credentials = Arc::new(CredentialManager::new(
            Arc::new(FailingExchange),
            RefreshPolicy::FillEmpty,
        ));
        let api = ApiContext::new(
            Arc::new(http.clone()),
            credentials,
            Endpoints::new("https://cam.test", "cam1"),
        );

        let err = api.fetch_events(None, None).await.unwrap_err();
        assert_eq!(err, CamError::MissingCredential);
        assert!(http.get_requests().is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure_passes_through() {
        let http = MockHttpClient::new();
        http.set_default_response(MockResponse::Error(HttpError::Timeout("slow".to_string())));
        let api = context(&http).await;

        let err = api.fetch_events(None, None).await.unwrap_err();
        assert_eq!(err, CamError::Transport(HttpError::Timeout("slow".to_string())));
    }

    #[tokio::test]
    async fn test_failure_triggers_background_refresh() {
        let http = MockHttpClient::new();
        let exchange = Arc::new(CountingExchange::default());
        let credentials = Arc::new(CredentialManager::new(exchange.clone(), RefreshPolicy::FillEmpty));
        let api = ApiContext::new(
            Arc::new(http.clone()),
            credentials.clone(),
            Endpoints::new("https://cam.test", "cam1"),
        );

        assert!(api.fetch_events(None, None).await.is_err());
        tokio::task::yield_now().await;
        for _ in 0..10 {
            if credentials.derived_token().is_some() {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert_eq!(credentials.derived_token().as_deref(), Some("J1"));
        assert_eq!(exchange.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_latest_snapshot_drains_stream() {
        let http = MockHttpClient::new();
        http.set_response(
            "https://cam.test/get_image",
            MockResponse::Stream(vec![Bytes::from_static(b"\xff\xd8"), Bytes::from_static(b"\xff\xd9")]),
        );
        let api = context(&http).await;

        let snapshot = api.fetch_latest_snapshot().await.unwrap();
        assert_eq!(snapshot.bytes, Bytes::from_static(b"\xff\xd8\xff\xd9"));
    }

    #[tokio::test]
    async fn test_broken_snapshot_body_triggers_background_refresh() {
        let http = MockHttpClient::new();
        http.set_response(
            "https://cam.test/get_image",
            MockResponse::BrokenStream {
                chunks: vec![Bytes::from_static(b"\xff\xd8")],
                error: HttpError::Io("connection reset".to_string()),
            },
        );
        let exchange = Arc::new(CountingExchange::default());
        let credentials = Arc::new(CredentialManager::new(exchange.clone(), RefreshPolicy::Rotate));
        credentials.refresh().await.unwrap();
        let api = ApiContext::new(
            Arc::new(http.clone()),
            credentials.clone(),
            Endpoints::new("https://cam.test", "cam1"),
        );

        let err = api.fetch_latest_snapshot().await.unwrap_err();
        assert_eq!(err, CamError::Transport(HttpError::Io("connection reset".to_string())));

        for _ in 0..10 {
            if exchange.calls.load(Ordering::SeqCst) == 2 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(exchange.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_snapshot_by_id_uses_snapshot_url() {
        let http = MockHttpClient::new();
        http.set_default_response(MockResponse::Stream(vec![Bytes::from_static(b"jpg")]));
        let api = context(&http).await;

        let mut stream = api.fetch_snapshot("1586-labs").await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), Bytes::from_static(b"jpg"));
        assert_eq!(
            http.get_requests()[0].url,
            "https://cam.test/event_snapshot/cam1/1586-labs?crop_type=timeline&width=700"
        );
    }

    #[test]
    fn test_today_window_is_ordered() {
        let (start, end) = today_window();
        assert!(start <= end);
        assert!(end - start <= 25 * 3600);
    }
}
