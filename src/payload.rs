//! Values delivered to subscribers.

use bytes::Bytes;
use chrono::{DateTime, Utc};

/// One camera event (cue point). The client never looks inside it.
pub type Event = serde_json::Value;

/// A fully-downloaded camera image.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub bytes: Bytes,
    pub fetched_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn new(bytes: Bytes) -> Self {
        Self {
            bytes,
            fetched_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Emission of a stream selected by name through
/// [`NestClient::subscribe`](crate::client::NestClient::subscribe).
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    Event(Event),
    Snapshot(Snapshot),
}

impl StreamItem {
    pub fn as_event(&self) -> Option<&Event> {
        match self {
            StreamItem::Event(event) => Some(event),
            StreamItem::Snapshot(_) => None,
        }
    }

    pub fn as_snapshot(&self) -> Option<&Snapshot> {
        match self {
            StreamItem::Snapshot(snapshot) => Some(snapshot),
            StreamItem::Event(_) => None,
        }
    }
}
