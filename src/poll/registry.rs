//! Named subscriptions held on behalf of the caller.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use super::multicast::Subscription;

/// The two polled streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Event,
    Snapshot,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Event => "event",
            StreamKind::Snapshot => "snapshot",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown stream kind: {0}")]
pub struct UnknownStreamKind(pub String);

impl FromStr for StreamKind {
    type Err = UnknownStreamKind;

    /// Case-insensitive; plural forms are accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "event" | "events" => Ok(StreamKind::Event),
            "snapshot" | "snapshots" => Ok(StreamKind::Snapshot),
            _ => Err(UnknownStreamKind(s.to_string())),
        }
    }
}

/// At most one live subscription per [`StreamKind`].
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    handles: Mutex<HashMap<StreamKind, Subscription>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<StreamKind, Subscription>> {
        self.handles.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Store `subscription` under `kind`, cancelling whatever was there.
    pub fn insert(&self, kind: StreamKind, subscription: Subscription) {
        let previous = self.lock().insert(kind, subscription);
        if let Some(previous) = previous {
            tracing::debug!(kind = %kind, "Replacing existing subscription");
            previous.unsubscribe();
        }
    }

    /// Cancel the subscription under `kind`. Returns whether one existed.
    pub fn cancel(&self, kind: StreamKind) -> bool {
        let removed = self.lock().remove(&kind);
        match removed {
            Some(subscription) => {
                subscription.unsubscribe();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, kind: StreamKind) -> bool {
        self.lock().contains_key(&kind)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Cancel everything.
    pub fn clear(&self) {
        let drained: Vec<Subscription> = self.lock().drain().map(|(_, sub)| sub).collect();
        for subscription in drained {
            subscription.unsubscribe();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CamResult;
    use crate::poll::multicast::{FnObserver, MulticastChannel};
    use crate::poll::scheduler::PollScheduler;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn channel() -> MulticastChannel<u8> {
        MulticastChannel::new(
            "test",
            PollScheduler::new("test", Duration::from_secs(1), || async { CamResult::Ok(1u8) }),
        )
    }

    #[test]
    fn test_stream_kind_parsing() {
        for input in ["event", "EVENT", "Events", "events"] {
            assert_eq!(input.parse::<StreamKind>(), Ok(StreamKind::Event));
        }
        for input in ["snapshot", "SNAPSHOTS", "Snapshot"] {
            assert_eq!(input.parse::<StreamKind>(), Ok(StreamKind::Snapshot));
        }
        assert!("video".parse::<StreamKind>().is_err());
        assert!("".parse::<StreamKind>().is_err());
    }

    #[test]
    fn test_unknown_stream_kind_message() {
        let err = "Video".parse::<StreamKind>().unwrap_err();
        assert_eq!(err, UnknownStreamKind("Video".to_string()));
        assert_eq!(err.to_string(), "unknown stream kind: Video");
        let _: &dyn std::error::Error = &err;
    }

    #[tokio::test]
    async fn test_insert_replaces_and_cancels_previous() {
        let channel = channel();
        let registry = SubscriptionRegistry::new();
        let completed = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let count = completed.clone();
            let observer = FnObserver::new(|_: u8| {}).on_complete(move || {
                count.fetch_add(1, Ordering::SeqCst);
            });
            registry.insert(StreamKind::Event, channel.subscribe(Arc::new(observer)));
        }

        assert_eq!(completed.load(Ordering::SeqCst), 1);
        assert_eq!(channel.subscriber_count(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_absent_kind_is_noop() {
        let registry = SubscriptionRegistry::new();
        assert!(!registry.cancel(StreamKind::Snapshot));
    }

    #[tokio::test]
    async fn test_clear_cancels_all() {
        let events = channel();
        let snapshots = channel();
        let registry = SubscriptionRegistry::new();
        registry.insert(StreamKind::Event, events.subscribe(Arc::new(FnObserver::new(|_: u8| {}))));
        registry.insert(StreamKind::Snapshot, snapshots.subscribe(Arc::new(FnObserver::new(|_: u8| {}))));

        registry.clear();

        assert!(registry.is_empty());
        assert!(!events.is_active());
        assert!(!snapshots.is_active());
    }
}
