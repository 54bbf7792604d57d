//! Cached two-stage credential chain.
//!
//! Each slot starts empty and is populated by the first successful exchange.
//! A failed exchange leaves the slot as it was. Concurrent callers that find
//! a slot empty queue on that slot's in-flight guard, so only one of them
//! performs the exchange and the rest read its result.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::exchange::TokenExchange;
use super::TokenKind;
use crate::config::RefreshPolicy;
use crate::error::CamResult;

/// One cached token plus the guard that serializes its exchange.
struct TokenSlot {
    kind: TokenKind,
    value: RwLock<Option<String>>,
    in_flight: Mutex<()>,
}

impl TokenSlot {
    fn new(kind: TokenKind) -> Self {
        Self {
            kind,
            value: RwLock::new(None),
            in_flight: Mutex::new(()),
        }
    }

    fn peek(&self) -> Option<String> {
        match self.value.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn store(&self, token: String) {
        match self.value.write() {
            Ok(mut guard) => *guard = Some(token),
            Err(poisoned) => *poisoned.into_inner() = Some(token),
        }
    }

    /// Return the cached token, or run `fetch` once and cache its result.
    async fn get_or_fetch<F, Fut>(&self, fetch: F) -> CamResult<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CamResult<String>>,
    {
        if let Some(token) = self.peek() {
            return Ok(token);
        }

        let _flight = self.in_flight.lock().await;
        if let Some(token) = self.peek() {
            tracing::trace!(kind = %self.kind, "Token populated by a concurrent exchange");
            return Ok(token);
        }

        let token = self.exchange(fetch).await?;
        self.store(token.clone());
        Ok(token)
    }

    /// Run `fetch` under the in-flight guard without consulting or updating the cache.
    async fn fetch_fresh<F, Fut>(&self, fetch: F) -> CamResult<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CamResult<String>>,
    {
        let _flight = self.in_flight.lock().await;
        self.exchange(fetch).await
    }

    async fn exchange<F, Fut>(&self, fetch: F) -> CamResult<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CamResult<String>>,
    {
        tracing::debug!(kind = %self.kind, "Exchanging token");
        match fetch().await {
            Ok(token) => {
                tracing::info!(kind = %self.kind, "Token exchange succeeded");
                Ok(token)
            }
            Err(e) => {
                tracing::warn!(kind = %self.kind, error = %e, "Token exchange failed");
                Err(e)
            }
        }
    }
}

/// Owns the primary -> derived token chain.
///
/// # Example
///
/// ```ignore
/// let manager = Arc::new(CredentialManager::new(Arc::new(exchange), RefreshPolicy::FillEmpty));
/// manager.refresh().await?;
/// let jwt = manager.derived_token().expect("populated by refresh");
/// ```
pub struct CredentialManager {
    exchange: Arc<dyn TokenExchange>,
    policy: RefreshPolicy,
    primary: TokenSlot,
    derived: TokenSlot,
    refresh_lock: Mutex<()>,
    background_refresh: AtomicBool,
}

impl CredentialManager {
    pub fn new(exchange: Arc<dyn TokenExchange>, policy: RefreshPolicy) -> Self {
        Self {
            exchange,
            policy,
            primary: TokenSlot::new(TokenKind::Primary),
            derived: TokenSlot::new(TokenKind::Derived),
            refresh_lock: Mutex::new(()),
            background_refresh: AtomicBool::new(false),
        }
    }

    pub fn policy(&self) -> RefreshPolicy {
        self.policy
    }

    /// The cached primary token, if any.
    pub fn primary_token(&self) -> Option<String> {
        self.primary.peek()
    }

    /// The cached derived token, if any.
    pub fn derived_token(&self) -> Option<String> {
        self.derived.peek()
    }

    /// Cached primary token, exchanging the refresh credential if the slot is empty.
    pub async fn get_primary_token(&self) -> CamResult<String> {
        let exchange = &self.exchange;
        self.primary
            .get_or_fetch(|| async move { exchange.exchange_primary().await })
            .await
    }

    /// Cached derived token, exchanging `primary` for one if the slot is empty.
    pub async fn get_derived_token(&self, primary: &str) -> CamResult<String> {
        let exchange = &self.exchange;
        self.derived
            .get_or_fetch(|| async move { exchange.exchange_derived(primary).await })
            .await
    }

    /// Re-run the chain according to the configured [`RefreshPolicy`].
    ///
    /// With `FillEmpty` only empty slots are populated, so once both tokens
    /// are cached this performs no exchange. With `Rotate` a new pair is
    /// fetched and stored only after both exchanges succeed; on failure the
    /// previous tokens stay in place.
    pub async fn refresh(&self) -> CamResult<()> {
        let _refresh = self.refresh_lock.lock().await;
        tracing::debug!(policy = ?self.policy, "Refreshing credential chain");

        match self.policy {
            RefreshPolicy::FillEmpty => {
                let primary = self.get_primary_token().await?;
                self.get_derived_token(&primary).await?;
            }
            RefreshPolicy::Rotate => {
                let exchange = &self.exchange;
                let primary = self
                    .primary
                    .fetch_fresh(|| async move { exchange.exchange_primary().await })
                    .await?;
                let primary_ref = primary.as_str();
                let derived = self
                    .derived
                    .fetch_fresh(|| async move { exchange.exchange_derived(primary_ref).await })
                    .await?;
                self.primary.store(primary);
                self.derived.store(derived);
            }
        }

        Ok(())
    }

    /// Spawn [`refresh`](Self::refresh) on the current tokio runtime.
    ///
    /// Returns `None` without spawning when a background refresh is already
    /// running or no runtime is available. Failures are logged, not returned.
    pub fn refresh_in_background(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No tokio runtime available, skipping background refresh");
            return None;
        };

        if self
            .background_refresh
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Background refresh already running");
            return None;
        }

        let manager = Arc::clone(self);
        Some(runtime.spawn(async move {
            if let Err(e) = manager.refresh().await {
                tracing::warn!(error = %e, code = e.error_code(), "Background credential refresh failed");
            }
            manager.background_refresh.store(false, Ordering::Release);
        }))
    }
}

impl std::fmt::Debug for CredentialManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialManager")
            .field("policy", &self.policy)
            .field("primary_cached", &self.primary.peek().is_some())
            .field("derived_cached", &self.derived.peek().is_some())
            .finish()
    }
}
