//! Fixed-period polling loop.
//!
//! Every tick launches its own fetch task, so a slow response never delays
//! the next tick and several fetches may be in flight at once. Results are
//! delivered to the sink in completion order. Once the handle is cancelled
//! no further results reach the sink, including those of fetches that were
//! already running.

use futures::future::BoxFuture;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::error::CamResult;

/// Receiver of poll results.
pub type Sink<T> = Arc<dyn Fn(CamResult<T>) + Send + Sync>;

type FetchFn<T> = Arc<dyn Fn() -> BoxFuture<'static, CamResult<T>> + Send + Sync>;

/// A source that can be started and produces results until its handle is cancelled.
pub trait Upstream<T>: Send + Sync {
    /// Begin producing into `sink`.
    ///
    /// # Panics
    ///
    /// Implementations spawn onto the current tokio runtime and panic outside one.
    fn start(&self, sink: Sink<T>) -> PollHandle;
}

/// Calls `fetch` once per `period`, first after one full period has elapsed.
pub struct PollScheduler<T> {
    name: &'static str,
    period: Duration,
    fetch: FetchFn<T>,
}

impl<T: Send + 'static> PollScheduler<T> {
    pub fn new<F, Fut>(name: &'static str, period: Duration, fetch: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CamResult<T>> + Send + 'static,
    {
        Self {
            name,
            period,
            fetch: Arc::new(move || Box::pin(fetch()) as BoxFuture<'static, CamResult<T>>),
        }
    }
}

impl<T: Send + 'static> Upstream<T> for PollScheduler<T> {
    fn start(&self, sink: Sink<T>) -> PollHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let first = Instant::now() + self.period;
        let task = tokio::spawn(run_ticks(
            self.name,
            first,
            self.period,
            self.fetch.clone(),
            sink,
            cancelled.clone(),
        ));
        tracing::debug!(stream = self.name, period_ms = self.period.as_millis() as u64, "Poll loop started");
        PollHandle { cancelled, task }
    }
}

async fn run_ticks<T: Send + 'static>(
    name: &'static str,
    first: Instant,
    period: Duration,
    fetch: FetchFn<T>,
    sink: Sink<T>,
    cancelled: Arc<AtomicBool>,
) {
    let mut ticker = interval_at(first, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut tick: u64 = 0;

    loop {
        ticker.tick().await;
        if cancelled.load(Ordering::Acquire) {
            break;
        }
        tick += 1;
        tracing::trace!(stream = name, tick, "Poll tick");

        let request = fetch();
        let sink = sink.clone();
        let cancelled = cancelled.clone();
        tokio::spawn(async move {
            let result = request.await;
            if cancelled.load(Ordering::Acquire) {
                tracing::trace!(stream = name, tick, "Discarding result of cancelled poll");
                return;
            }
            sink(result);
        });
    }
}

/// Running poll loop. Dropping it stops the loop.
#[derive(Debug)]
pub struct PollHandle {
    cancelled: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl PollHandle {
    /// Stop ticking and suppress results of fetches still in flight.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            self.task.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}
