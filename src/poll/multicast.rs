//! Ref-counted fan-out of one upstream to many subscribers.
//!
//! The upstream starts when the first subscriber arrives and stops when the
//! last one leaves. Every emission goes to every current subscriber. Each
//! run of the upstream carries a generation number; results from an older
//! generation are dropped, so a stopped poll can never emit into a later one.
//!
//! Unsubscribing blocks until a callback already running for that subscriber
//! on another thread has returned, so no callback runs once
//! [`Subscription::unsubscribe`] is done. Unsubscribing from inside the
//! subscriber's own callback does not wait. Two callbacks running on
//! different threads must not unsubscribe each other, or both wait forever.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread::{self, ThreadId};

use super::scheduler::{PollHandle, Sink, Upstream};
use crate::error::{CamError, CamResult};

/// Callbacks for one subscriber.
pub trait Observer<T>: Send + Sync {
    fn on_next(&self, value: T);

    fn on_error(&self, _error: CamError) {}

    /// Called once when the subscription ends.
    fn on_complete(&self) {}
}

type NextFn<T> = Box<dyn Fn(T) + Send + Sync>;
type ErrorFn = Box<dyn Fn(CamError) + Send + Sync>;
type CompleteFn = Box<dyn Fn() + Send + Sync>;

/// [`Observer`] assembled from closures.
pub struct FnObserver<T> {
    next: NextFn<T>,
    error: Option<ErrorFn>,
    complete: Option<CompleteFn>,
}

impl<T> FnObserver<T> {
    pub fn new(on_next: impl Fn(T) + Send + Sync + 'static) -> Self {
        Self {
            next: Box::new(on_next),
            error: None,
            complete: None,
        }
    }

    pub fn on_error(mut self, on_error: impl Fn(CamError) + Send + Sync + 'static) -> Self {
        self.error = Some(Box::new(on_error));
        self
    }

    pub fn on_complete(mut self, on_complete: impl Fn() + Send + Sync + 'static) -> Self {
        self.complete = Some(Box::new(on_complete));
        self
    }
}

impl<T> Observer<T> for FnObserver<T> {
    fn on_next(&self, value: T) {
        (self.next)(value);
    }

    fn on_error(&self, error: CamError) {
        if let Some(error_fn) = &self.error {
            error_fn(error);
        }
    }

    fn on_complete(&self) {
        if let Some(complete_fn) = &self.complete {
            complete_fn();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Serializes callbacks for one subscriber and shuts them off.
struct Gate {
    open: AtomicBool,
    delivery: Mutex<()>,
    delivering_on: Mutex<Option<ThreadId>>,
}

/// Clears [`Gate::delivering_on`] when a callback returns or panics.
struct Delivering<'a>(&'a Mutex<Option<ThreadId>>);

impl Drop for Delivering<'_> {
    fn drop(&mut self) {
        *lock(self.0) = None;
    }
}

impl Gate {
    fn new() -> Self {
        Self {
            open: AtomicBool::new(true),
            delivery: Mutex::new(()),
            delivering_on: Mutex::new(None),
        }
    }

    /// Run `callback` unless the gate is closed.
    fn deliver(&self, callback: impl FnOnce()) {
        let _delivery = lock(&self.delivery);
        if !self.open.load(Ordering::Acquire) {
            return;
        }
        *lock(&self.delivering_on) = Some(thread::current().id());
        let _delivering = Delivering(&self.delivering_on);
        callback();
    }

    /// Stop further callbacks and wait out one in progress elsewhere.
    fn close(&self) {
        self.open.store(false, Ordering::Release);
        if *lock(&self.delivering_on) == Some(thread::current().id()) {
            return;
        }
        drop(lock(&self.delivery));
    }
}

struct Subscriber<T> {
    id: u64,
    gate: Arc<Gate>,
    observer: Arc<dyn Observer<T>>,
}

struct ChannelState<T> {
    subscribers: Vec<Subscriber<T>>,
    next_id: u64,
    generation: u64,
    poll: Option<PollHandle>,
    starts: u64,
}

struct Shared<T> {
    name: &'static str,
    upstream: Box<dyn Upstream<T>>,
    state: Mutex<ChannelState<T>>,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, ChannelState<T>> {
        lock(&self.state)
    }
}

impl<T: Clone + Send + 'static> Shared<T> {
    fn dispatch(&self, generation: u64, result: CamResult<T>) {
        let targets: Vec<(Arc<Gate>, Arc<dyn Observer<T>>)> = {
            let state = self.lock();
            if state.generation != generation || state.poll.is_none() {
                return;
            }
            state
                .subscribers
                .iter()
                .map(|s| (s.gate.clone(), s.observer.clone()))
                .collect()
        };

        match result {
            Ok(value) => {
                for (gate, observer) in targets {
                    gate.deliver(|| observer.on_next(value.clone()));
                }
            }
            Err(e) => {
                tracing::warn!(stream = self.name, error = %e, "Poll failed");
                for (gate, observer) in targets {
                    gate.deliver(|| observer.on_error(e.clone()));
                }
            }
        }
    }
}

/// Removal hook a [`Subscription`] calls without knowing the item type.
trait Detach: Send + Sync {
    fn detach(&self, id: u64);
}

impl<T: Send + 'static> Detach for Shared<T> {
    fn detach(&self, id: u64) {
        let (subscriber, stopped) = {
            let mut state = self.lock();
            let Some(index) = state.subscribers.iter().position(|s| s.id == id) else {
                return;
            };
            let subscriber = state.subscribers.remove(index);
            let stopped = if state.subscribers.is_empty() {
                state.poll.take()
            } else {
                None
            };
            (subscriber, stopped)
        };
        let Subscriber { gate, observer, .. } = subscriber;
        gate.close();

        if let Some(poll) = stopped {
            poll.cancel();
            tracing::debug!(stream = self.name, "Last subscriber left, poll stopped");
        }
        observer.on_complete();
    }
}

/// One shared upstream, many subscribers.
pub struct MulticastChannel<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for MulticastChannel<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> MulticastChannel<T> {
    pub fn new(name: &'static str, upstream: impl Upstream<T> + 'static) -> Self {
        Self {
            shared: Arc::new(Shared {
                name,
                upstream: Box::new(upstream),
                state: Mutex::new(ChannelState {
                    subscribers: Vec::new(),
                    next_id: 0,
                    generation: 0,
                    poll: None,
                    starts: 0,
                }),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.shared.name
    }

    /// Add a subscriber, starting the upstream if it is the first.
    ///
    /// # Panics
    ///
    /// Starting the upstream spawns onto the current tokio runtime.
    pub fn subscribe(&self, observer: Arc<dyn Observer<T>>) -> Subscription {
        let mut state = self.shared.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.subscribers.push(Subscriber {
            id,
            gate: Arc::new(Gate::new()),
            observer,
        });

        if state.subscribers.len() == 1 {
            state.generation += 1;
            state.starts += 1;
            let sink = Self::sink(Arc::downgrade(&self.shared), state.generation);
            state.poll = Some(self.shared.upstream.start(sink));
            tracing::debug!(
                stream = self.shared.name,
                generation = state.generation,
                "First subscriber joined, poll started"
            );
        }
        drop(state);

        let weak: Weak<Shared<T>> = Arc::downgrade(&self.shared);
        let channel: Weak<dyn Detach> = weak;
        Subscription {
            id,
            channel,
            closed: AtomicBool::new(false),
        }
    }

    fn sink(shared: Weak<Shared<T>>, generation: u64) -> Sink<T> {
        Arc::new(move |result: CamResult<T>| {
            if let Some(shared) = shared.upgrade() {
                shared.dispatch(generation, result);
            }
        })
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.lock().subscribers.len()
    }

    /// Whether the upstream is currently running.
    pub fn is_active(&self) -> bool {
        self.shared.lock().poll.is_some()
    }

    /// How many times the upstream has been started.
    pub fn start_count(&self) -> u64 {
        self.shared.lock().starts
    }
}

/// Handle to one subscriber. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    channel: Weak<dyn Detach>,
    closed: AtomicBool,
}

impl Subscription {
    /// Stop receiving values. Safe to call more than once.
    pub fn unsubscribe(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(channel) = self.channel.upgrade() {
            channel.detach(self.id);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poll::scheduler::PollScheduler;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn counting_channel(period_ms: u64) -> (MulticastChannel<usize>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let upstream = PollScheduler::new("test", Duration::from_millis(period_ms), move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok(n) }
        });
        (MulticastChannel::new("test", upstream), calls)
    }

    fn recorder() -> (Arc<dyn Observer<usize>>, Arc<Mutex<Vec<usize>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let store = seen.clone();
        let observer = FnObserver::new(move |v: usize| store.lock().unwrap().push(v));
        (Arc::new(observer), seen)
    }

    async fn tick(ms: u64) {
        tokio::time::advance(Duration::from_millis(ms)).await;
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_subscriber_starts_single_loop() {
        let (channel, calls) = counting_channel(100);
        let (first, first_seen) = recorder();
        let (second, second_seen) = recorder();

        let _a = channel.subscribe(first);
        tick(100).await;
        let _b = channel.subscribe(second);
        tick(100).await;

        assert_eq!(channel.start_count(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(*first_seen.lock().unwrap(), vec![1, 2]);
        assert_eq!(*second_seen.lock().unwrap(), vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_unsubscribe_stops_polling() {
        let (channel, calls) = counting_channel(100);
        let (observer, seen) = recorder();

        let sub = channel.subscribe(observer);
        tick(100).await;
        sub.unsubscribe();
        assert!(!channel.is_active());

        tick(1000).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remaining_subscriber_keeps_loop() {
        let (channel, _calls) = counting_channel(100);
        let (first, first_seen) = recorder();
        let (second, second_seen) = recorder();

        let a = channel.subscribe(first);
        let _b = channel.subscribe(second);
        tick(100).await;
        drop(a);
        tick(100).await;

        assert!(channel.is_active());
        assert_eq!(channel.subscriber_count(), 1);
        assert_eq!(*first_seen.lock().unwrap(), vec![1]);
        assert_eq!(*second_seen.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resubscribe_starts_new_generation() {
        let (channel, _calls) = counting_channel(100);
        let (observer, _seen) = recorder();

        channel.subscribe(observer.clone()).unsubscribe();
        let _again = channel.subscribe(observer);

        assert_eq!(channel.start_count(), 2);
        assert!(channel.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_generation_is_dropped() {
        let upstream = PollScheduler::new("slow", Duration::from_millis(100), || async {
            tokio::time::sleep(Duration::from_millis(150)).await;
            Ok(7usize)
        });
        let channel = MulticastChannel::new("slow", upstream);
        let (observer, seen) = recorder();

        let first = channel.subscribe(observer.clone());
        tick(110).await;
        drop(first);
        let _second = channel.subscribe(observer);
        tick(200).await;

        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_is_idempotent_and_completes_once() {
        let (channel, _calls) = counting_channel(100);
        let completed = Arc::new(AtomicUsize::new(0));
        let count = completed.clone();
        let observer = FnObserver::new(|_: usize| {}).on_complete(move || {
            count.fetch_add(1, Ordering::SeqCst);
        });

        let sub = channel.subscribe(Arc::new(observer));
        sub.unsubscribe();
        sub.unsubscribe();
        drop(sub);

        assert_eq!(completed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_reach_every_subscriber() {
        let upstream = PollScheduler::new("err", Duration::from_millis(50), || async {
            Err::<usize, _>(CamError::MissingCredential)
        });
        let channel = MulticastChannel::new("err", upstream);
        let errors = Arc::new(AtomicUsize::new(0));

        let subs: Vec<Subscription> = (0..2)
            .map(|_| {
                let count = errors.clone();
                let observer = FnObserver::new(|_: usize| {}).on_error(move |_| {
                    count.fetch_add(1, Ordering::SeqCst);
                });
                channel.subscribe(Arc::new(observer))
            })
            .collect();
        tick(50).await;

        assert_eq!(errors.load(Ordering::SeqCst), 2);
        drop(subs);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_from_callback() {
        let (channel, calls) = counting_channel(100);
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let inner = slot.clone();
        let observer = FnObserver::new(move |_: usize| {
            if let Some(sub) = inner.lock().unwrap().take() {
                sub.unsubscribe();
            }
        });

        let sub = channel.subscribe(Arc::new(observer));
        *slot.lock().unwrap() = Some(sub);
        tick(100).await;
        tick(300).await;

        assert!(!channel.is_active());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unsubscribe_waits_for_running_callback() {
        let (channel, _calls) = counting_channel(200);
        let entered = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicUsize::new(0));
        let (entered_flag, finished_count) = (entered.clone(), finished.clone());
        let observer = FnObserver::new(move |_: usize| {
            entered_flag.store(true, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(100));
            finished_count.fetch_add(1, Ordering::SeqCst);
        });

        let sub = channel.subscribe(Arc::new(observer));
        while !entered.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        sub.unsubscribe();

        let delivered = finished.load(Ordering::SeqCst);
        assert!(delivered >= 1);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(finished.load(Ordering::SeqCst), delivered);
        assert!(!channel.is_active());
    }
}
