//! nestcam - polling client for Nest camera events and snapshots
//!
//! Exchanges a long-lived refresh token for API credentials, then polls the
//! camera API on a fixed interval and fans results out to subscribers.

pub mod adapters;
pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod payload;
pub mod poll;
pub mod traits;

pub use client::NestClient;
pub use config::{ClientOptions, Config, RefreshPolicy};
pub use error::{CamError, CamResult};
pub use payload::{Event, Snapshot, StreamItem};
pub use poll::{FnObserver, Observer, StreamKind, Subscription};
