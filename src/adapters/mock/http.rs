//! Mock HTTP client for testing.
//!
//! Provides a configurable mock HTTP client that can return predefined
//! responses or errors, records every request and can delay answers to
//! simulate slow upstreams.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::traits::{ByteStream, Headers, HttpClient, HttpError, Response};

/// A recorded HTTP request for verification in tests.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// HTTP method (GET or POST)
    pub method: String,
    /// Request URL
    pub url: String,
    /// Request headers
    pub headers: Headers,
    /// Request body (for POST requests)
    pub body: Option<String>,
}

/// Configuration for a mock response.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Return a buffered response (a single chunk when streamed)
    Success(Response),
    /// Return an error
    Error(HttpError),
    /// Return a body made of several chunks
    Stream(Vec<Bytes>),
    /// Return a body that fails after yielding `chunks`
    BrokenStream { chunks: Vec<Bytes>, error: HttpError },
}

impl MockResponse {
    /// Shorthand for a 200 response carrying a JSON document.
    pub fn json(value: serde_json::Value) -> Self {
        MockResponse::Success(Response::new(200, Bytes::from(value.to_string())))
    }

    /// Shorthand for a response with the given status and text body.
    pub fn status(status: u16, body: &str) -> Self {
        MockResponse::Success(Response::new(status, Bytes::from(body.to_string())))
    }
}

/// Mock HTTP client for testing.
///
/// Responses are looked up by exact URL first, then by URL prefix, then the
/// default. Responses queued with [`MockHttpClient::push_response`] are
/// served once each, in order, before the sticky response for that URL.
///
/// # Example
///
/// ```ignore
/// let client = MockHttpClient::new();
/// client.set_response(
///     "https://api.example.com/data",
///     MockResponse::Success(Response::new(200, Bytes::from("Hello"))),
/// );
///
/// let response = client.get("https://api.example.com/data", &Headers::new()).await?;
/// assert_eq!(response.status, 200);
/// assert_eq!(client.get_requests().len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockHttpClient {
    /// Sticky responses by URL pattern
    responses: Arc<Mutex<HashMap<String, MockResponse>>>,
    /// One-shot responses by URL pattern
    queued: Arc<Mutex<HashMap<String, VecDeque<MockResponse>>>>,
    /// Default response when no specific match
    default_response: Arc<Mutex<Option<MockResponse>>>,
    /// Recorded requests for verification
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    /// Artificial latency applied before answering
    delay: Arc<Mutex<Option<Duration>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockHttpClient {
    /// Create a new mock HTTP client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sticky response for a URL or URL prefix.
    pub fn set_response(&self, url: &str, response: MockResponse) {
        lock(&self.responses).insert(url.to_string(), response);
    }

    /// Queue a response that is served exactly once.
    pub fn push_response(&self, url: &str, response: MockResponse) {
        lock(&self.queued)
            .entry(url.to_string())
            .or_default()
            .push_back(response);
    }

    /// Set a default response for URLs without specific matches.
    pub fn set_default_response(&self, response: MockResponse) {
        *lock(&self.default_response) = Some(response);
    }

    /// Delay every answer by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = Some(delay);
    }

    /// Get all recorded requests.
    pub fn get_requests(&self) -> Vec<RecordedRequest> {
        lock(&self.requests).clone()
    }

    /// Number of recorded requests whose URL starts with `prefix`.
    pub fn request_count(&self, prefix: &str) -> usize {
        lock(&self.requests)
            .iter()
            .filter(|r| r.url.starts_with(prefix))
            .count()
    }

    fn record_request(&self, method: &str, url: &str, headers: &Headers, body: Option<String>) {
        lock(&self.requests).push(RecordedRequest {
            method: method.to_string(),
            url: url.to_string(),
            headers: headers.clone(),
            body,
        });
    }

    fn matches(pattern: &str, url: &str) -> bool {
        url == pattern || url.starts_with(pattern)
    }

    fn get_response(&self, url: &str) -> Option<MockResponse> {
        {
            let mut queued = lock(&self.queued);
            if let Some(queue) = queued.get_mut(url) {
                if let Some(response) = queue.pop_front() {
                    return Some(response);
                }
            }
            for (pattern, queue) in queued.iter_mut() {
                if Self::matches(pattern, url) {
                    if let Some(response) = queue.pop_front() {
                        return Some(response);
                    }
                }
            }
        }

        let responses = lock(&self.responses);
        if let Some(response) = responses.get(url) {
            return Some(response.clone());
        }
        for (pattern, response) in responses.iter() {
            if Self::matches(pattern, url) {
                return Some(response.clone());
            }
        }

        lock(&self.default_response).clone()
    }

    async fn answer(&self, url: &str) -> Option<MockResponse> {
        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.get_response(url)
    }

    fn missing(url: &str) -> HttpError {
        HttpError::Other(format!("No mock response for URL: {}", url))
    }

    fn buffered(url: &str, response: Option<MockResponse>) -> Result<Response, HttpError> {
        match response {
            Some(MockResponse::Success(response)) => Ok(response),
            Some(MockResponse::Error(err)) => Err(err),
            Some(MockResponse::Stream(chunks)) => {
                let mut body = BytesMut::new();
                for chunk in chunks {
                    body.extend_from_slice(&chunk);
                }
                Ok(Response::new(200, body.freeze()))
            }
            Some(MockResponse::BrokenStream { error, .. }) => Err(error),
            None => Err(Self::missing(url)),
        }
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn get(&self, url: &str, headers: &Headers) -> Result<Response, HttpError> {
        self.record_request("GET", url, headers, None);
        let response = self.answer(url).await;
        Self::buffered(url, response)
    }

    async fn get_stream(&self, url: &str, headers: &Headers) -> Result<ByteStream, HttpError> {
        self.record_request("GET", url, headers, None);
        let (chunks, failure) = match self.answer(url).await {
            Some(MockResponse::Stream(chunks)) => (chunks, None),
            Some(MockResponse::BrokenStream { chunks, error }) => (chunks, Some(error)),
            other => (vec![Self::buffered(url, other)?.error_for_status()?.body], None),
        };
        let items = chunks.into_iter().map(Ok).chain(failure.map(Err));
        Ok(Box::pin(futures::stream::iter(items)))
    }

    async fn post(&self, url: &str, body: &str, headers: &Headers) -> Result<Response, HttpError> {
        self.record_request("POST", url, headers, Some(body.to_string()));
        let response = self.answer(url).await;
        Self::buffered(url, response)
    }
}
