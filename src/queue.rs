//! Outgoing sample queue shared by the sampling and relay tasks.
//!
//! The queue is bounded and most-recent-biased: producers append without
//! blocking, the consumer trims the oldest entries down to the configured
//! limit and always takes the newest sample first. Under sustained
//! backpressure the relay therefore transmits current state instead of
//! replaying a backlog of stale readings.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::sample::Sample;

/// Shared queue state. Producer and consumer sides hold the same mutex;
/// enqueue must never interleave with trim/take on the underlying sequence.
#[derive(Debug, Default)]
struct Inner {
    samples: VecDeque<Sample>,
    enqueued: u64,
    dropped: u64,
}

/// Enqueue-only handle for the sampling task.
///
/// Cloneable; `enqueue` never blocks and never fails. The producer has no
/// visibility into queue capacity and does not throttle itself — bounding is
/// enforced lazily by the consumer's `trim`.
#[derive(Clone)]
pub struct QueueProducer {
    inner: Arc<Mutex<Inner>>,
}

impl QueueProducer {
    /// Append a sample to the tail of the queue.
    pub fn enqueue(&self, sample: Sample) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.samples.push_back(sample);
        inner.enqueued += 1;
    }
}

/// Consumer side of the outgoing queue, owned by the relay loop.
pub struct OutgoingQueue {
    inner: Arc<Mutex<Inner>>,
}

impl OutgoingQueue {
    /// Create a new empty queue, returning the producer handle and the
    /// consumer side.
    pub fn new() -> (QueueProducer, Self) {
        let inner = Arc::new(Mutex::new(Inner::default()));
        let producer = QueueProducer {
            inner: inner.clone(),
        };
        (producer, Self { inner })
    }

    /// Drop oldest entries until the queue holds at most `limit` samples.
    ///
    /// Returns the number of samples evicted. Called by the relay task
    /// before each send; after the call the queue holds exactly the most
    /// recent `limit` samples.
    pub fn trim(&self, limit: usize) -> usize {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut evicted = 0;
        while inner.samples.len() > limit {
            inner.samples.pop_front();
            evicted += 1;
        }
        if evicted > 0 {
            inner.dropped += evicted as u64;
            warn!(
                evicted = evicted,
                limit = limit,
                "Queue over capacity: dropped oldest samples"
            );
        }
        evicted
    }

    /// Remove and return the newest queued sample, or `None` when empty.
    ///
    /// Repeated calls drain in reverse-enqueue order.
    pub fn take_newest(&self) -> Option<Sample> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.samples.pop_back()
    }

    /// Current queue depth.
    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.samples.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total samples evicted by `trim` over the queue's lifetime.
    pub fn dropped(&self) -> u64 {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.dropped
    }

    /// Total samples enqueued over the queue's lifetime.
    pub fn enqueued(&self) -> u64 {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.enqueued
    }
}
