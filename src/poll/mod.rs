//! Periodic polling of the camera API, de-duplication and fan-out.

pub mod fetch;
pub mod filter;
pub mod multicast;
pub mod registry;
pub mod scheduler;

pub use fetch::{today_window, ApiContext, FetchSource, Payload, ResponseMode};
pub use filter::{ChangeFilter, Deduplicated};
pub use multicast::{FnObserver, MulticastChannel, Observer, Subscription};
pub use registry::{StreamKind, SubscriptionRegistry, UnknownStreamKind};
pub use scheduler::{PollHandle, PollScheduler, Sink, Upstream};
