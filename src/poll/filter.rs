//! Change detection on polled event batches.
//!
//! The events endpoint always returns the whole day so far. A batch is new
//! only when its length differs from the previous batch; when it is, the last
//! element (the most recent event) is emitted.

use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use super::scheduler::{PollHandle, Sink, Upstream};
use crate::error::CamResult;

#[derive(Debug, Default)]
pub struct ChangeFilter {
    last_len: Option<usize>,
}

impl ChangeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one batch. Returns its last element when the length changed.
    ///
    /// An empty batch is remembered but emits nothing.
    pub fn apply<T>(&mut self, batch: Vec<T>) -> Option<T> {
        let len = batch.len();
        if self.last_len == Some(len) {
            return None;
        }
        self.last_len = Some(len);
        batch.into_iter().last()
    }

    pub fn last_len(&self) -> Option<usize> {
        self.last_len
    }
}

/// Wraps a batch producer so only changed batches pass, reduced to their
/// newest element. Filter state starts fresh on every `start`.
pub struct Deduplicated<U, T> {
    inner: U,
    _item: PhantomData<fn() -> T>,
}

impl<U, T> Deduplicated<U, T> {
    pub fn new(inner: U) -> Self {
        Self {
            inner,
            _item: PhantomData,
        }
    }
}

impl<U, T> Upstream<T> for Deduplicated<U, T>
where
    U: Upstream<Vec<T>>,
    T: Send + 'static,
{
    fn start(&self, sink: Sink<T>) -> PollHandle {
        let filter = Arc::new(Mutex::new(ChangeFilter::new()));
        self.inner.start(Arc::new(move |result: CamResult<Vec<T>>| match result {
            Ok(batch) => {
                let newest = match filter.lock() {
                    Ok(mut filter) => filter.apply(batch),
                    Err(poisoned) => poisoned.into_inner().apply(batch),
                };
                if let Some(item) = newest {
                    sink(Ok(item));
                }
            }
            Err(e) => sink(Err(e)),
        }))
    }
}
