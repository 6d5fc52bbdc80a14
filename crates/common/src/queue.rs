//! Bounded, thread-safe FIFO queues for packets and frames.
//!
//! Producers and consumers run on different worker threads. A consumer
//! that finds the queue empty parks on `ready_cond`; a producer that finds
//! it full parks on `space_cond`. Both waits are bounded and also return
//! when [`MediaQueue::wake`] is called, so a pause/stop request reaches a
//! parked worker immediately instead of at the next timeout.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::frame::DecodedFrame;
use crate::packet::EncodedPacket;

/// Queue of encoded packets owned by a demuxer.
pub type PacketQueue = MediaQueue<EncodedPacket>;

/// Queue of decoded frames owned by a decoder.
pub type FrameQueue = MediaQueue<DecodedFrame>;

struct QueueInner<T> {
    items: Mutex<VecDeque<T>>,
    /// Signalled when an item arrives (or on wake).
    ready_cond: Condvar,
    /// Signalled when space frees up (or on wake).
    space_cond: Condvar,
    /// Soft bound checked by producers (0 = unbounded).
    capacity: AtomicUsize,
}

/// Cheaply cloneable handle to a shared FIFO queue.
pub struct MediaQueue<T> {
    inner: Arc<QueueInner<T>>,
}

impl<T> Clone for MediaQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> MediaQueue<T> {
    /// Create a queue whose producers suspend once `capacity` items are
    /// buffered. A capacity of 0 means unbounded.
    pub fn bounded(capacity: usize) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                items: Mutex::new(VecDeque::new()),
                ready_cond: Condvar::new(),
                space_cond: Condvar::new(),
                capacity: AtomicUsize::new(capacity),
            }),
        }
    }

    pub fn unbounded() -> Self {
        Self::bounded(0)
    }

    /// Append an item. Never blocks; producers honour the bound through
    /// [`wait_for_space`](Self::wait_for_space).
    pub fn push(&self, item: T) {
        self.inner.items.lock().push_back(item);
        self.inner.ready_cond.notify_all();
    }

    /// Remove the oldest item without blocking.
    pub fn pop(&self) -> Option<T> {
        let item = self.inner.items.lock().pop_front();
        if item.is_some() {
            self.inner.space_cond.notify_all();
        }
        item
    }

    /// Remove the oldest item, waiting up to `timeout` for one to arrive.
    /// [`wake`](Self::wake) does not cut the wait short.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut items = self.inner.items.lock();
        while items.is_empty() {
            if self
                .inner
                .ready_cond
                .wait_until(&mut items, deadline)
                .timed_out()
            {
                break;
            }
        }
        let item = items.pop_front();
        drop(items);
        if item.is_some() {
            self.inner.space_cond.notify_all();
        }
        item
    }

    /// Park until the queue is non-empty, [`wake`](Self::wake) is called or
    /// `timeout` elapses. Returns whether an item is available.
    pub fn wait_for_item(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut items = self.inner.items.lock();
        if items.is_empty() {
            self.inner.ready_cond.wait_until(&mut items, deadline);
        }
        !items.is_empty()
    }

    /// Park until the queue is below capacity, [`wake`](Self::wake) is called
    /// or `timeout` elapses. Returns whether there is space.
    pub fn wait_for_space(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut items = self.inner.items.lock();
        if self.over_capacity(items.len()) {
            self.inner.space_cond.wait_until(&mut items, deadline);
        }
        !self.over_capacity(items.len())
    }

    /// Drop every buffered item. Returns how many were discarded.
    pub fn clear(&self) -> usize {
        let removed = {
            let mut items = self.inner.items.lock();
            let n = items.len();
            items.clear();
            n
        };
        self.inner.space_cond.notify_all();
        removed
    }

    /// Keep only the items matching `keep`. Returns how many were removed.
    pub fn retain<F>(&self, keep: F) -> usize
    where
        F: FnMut(&T) -> bool,
    {
        let removed = {
            let mut items = self.inner.items.lock();
            let before = items.len();
            items.retain(keep);
            before - items.len()
        };
        if removed > 0 {
            self.inner.space_cond.notify_all();
        }
        removed
    }

    /// Remove and return every buffered item in order.
    pub fn drain(&self) -> Vec<T> {
        let drained: Vec<T> = self.inner.items.lock().drain(..).collect();
        self.inner.space_cond.notify_all();
        drained
    }

    /// Release every thread parked on this queue.
    pub fn wake(&self) {
        // Taking the lock orders the notification after any waiter that
        // already checked the condition.
        drop(self.inner.items.lock());
        self.inner.ready_cond.notify_all();
        self.inner.space_cond.notify_all();
    }

    pub fn len(&self) -> usize {
        self.inner.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.items.lock().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.over_capacity(self.len())
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity.load(Ordering::Relaxed)
    }

    /// Whether two handles point at the same queue.
    pub fn same_queue(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn over_capacity(&self, len: usize) -> bool {
        let cap = self.capacity();
        cap > 0 && len >= cap
    }
}

impl<T> std::fmt::Debug for MediaQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}
