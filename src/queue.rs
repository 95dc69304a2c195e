//! Fixed-capacity multi-producer/multi-consumer queue with two-phase handoff.
//!
//! [`BoundedQueue`] is the only structure in this crate that crosses the
//! I/O-thread / application-thread boundary. It never blocks and never grows:
//! a full queue fails the push and the caller retries on a later pass.
//!
//! Two surfaces are provided:
//!
//! - [`try_push`](BoundedQueue::try_push) / [`try_pop`](BoundedQueue::try_pop)
//!   for small values;
//! - a two-phase reserve/commit pattern for values that are expensive to
//!   copy (complete HTTP messages, frames with owned buffers):
//!
//! ```text
//!   let permit = queue.reserve().ok_or(...)?;  // Phase 1: claim a slot
//!   permit.commit(message);                    // Phase 2: cannot fail
//! ```
//!
//! A [`PushPermit`] is a linear resource: commit it, abort it, or drop it
//! (drop aborts). The mirror [`PopPermit`] lets a consumer inspect the value
//! in place before taking ownership; releasing without taking discards it.
//! Either way the value moves at most once and is delivered to exactly one
//! consumer.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Error returned when a push fails because the queue is full.
///
/// Carries the rejected value back to the caller so it can be retried on a
/// later pass.
pub struct QueueFull<T>(pub T);

impl<T> fmt::Debug for QueueFull<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("QueueFull(..)")
    }
}

impl<T> fmt::Display for QueueFull<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("queue is full")
    }
}

impl<T> std::error::Error for QueueFull<T> {}

#[derive(Debug)]
struct Inner<T> {
    /// Published values waiting for a consumer.
    slots: VecDeque<T>,
    /// Capacity fixed at construction.
    capacity: usize,
    /// Slots claimed by outstanding write permits.
    reserved: usize,
}

impl<T> Inner<T> {
    fn used(&self) -> usize {
        self.slots.len() + self.reserved
    }
}

/// Fixed-capacity MPMC queue. Cloning yields another handle to the same
/// queue; producers and consumers are not distinguished by type.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Clone for BoundedQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> BoundedQueue<T> {
    /// Create a queue holding at most `capacity` values.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be non-zero");
        Self {
            inner: Arc::new(Mutex::new(Inner {
                slots: VecDeque::with_capacity(capacity),
                capacity,
                reserved: 0,
            })),
        }
    }

    /// Push a value without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`QueueFull`] carrying the value back when no slot is free.
    pub fn try_push(&self, value: T) -> Result<(), QueueFull<T>> {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        if inner.used() >= inner.capacity {
            return Err(QueueFull(value));
        }
        inner.slots.push_back(value);
        Ok(())
    }

    /// Pop the oldest published value, if any.
    pub fn try_pop(&self) -> Option<T> {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        inner.slots.pop_front()
    }

    /// Phase 1 of a two-phase push: claim a slot.
    ///
    /// Returns `None` when the queue is full. The claimed slot is invisible
    /// to consumers until [`PushPermit::commit`] publishes into it.
    pub fn reserve(&self) -> Option<PushPermit<'_, T>> {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        if inner.used() >= inner.capacity {
            return None;
        }
        inner.reserved += 1;
        Some(PushPermit {
            queue: self,
            consumed: false,
        })
    }

    /// Phase 1 of a two-phase pop: take the oldest value out of consumer
    /// visibility without yet assuming ownership.
    ///
    /// Returns `None` when the queue is empty.
    pub fn reserve_pop(&self) -> Option<PopPermit<T>> {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        inner.slots.pop_front().map(|value| PopPermit {
            value: Some(value),
        })
    }

    /// Number of published values currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().expect("queue lock poisoned").slots.len()
    }

    /// True when no published values are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The fixed capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.lock().expect("queue lock poisoned").capacity
    }
}

/// A claimed write slot. Commit it, abort it, or drop it (drop aborts).
#[must_use = "a PushPermit must be committed or aborted"]
pub struct PushPermit<'a, T> {
    queue: &'a BoundedQueue<T>,
    consumed: bool,
}

impl<T> PushPermit<'_, T> {
    /// Phase 2: publish `value` into the claimed slot. Cannot fail.
    pub fn commit(mut self, value: T) {
        self.consumed = true;
        let mut inner = self.queue.inner.lock().expect("queue lock poisoned");
        inner.reserved -= 1;
        inner.slots.push_back(value);
    }

    /// Release the claimed slot without publishing.
    pub fn abort(mut self) {
        self.consumed = true;
        let mut inner = self.queue.inner.lock().expect("queue lock poisoned");
        inner.reserved -= 1;
    }
}

impl<T> Drop for PushPermit<'_, T> {
    fn drop(&mut self) {
        if !self.consumed {
            let mut inner = self.queue.inner.lock().expect("queue lock poisoned");
            inner.reserved -= 1;
        }
    }
}

impl<T> fmt::Debug for PushPermit<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushPermit")
            .field("consumed", &self.consumed)
            .finish()
    }
}

/// A value reserved for reading. The holder may inspect it in place and then
/// either take ownership or release (discard) it.
#[derive(Debug)]
pub struct PopPermit<T> {
    value: Option<T>,
}

impl<T> PopPermit<T> {
    /// Borrow the reserved value.
    #[must_use]
    pub fn get(&self) -> &T {
        self.value.as_ref().expect("permit already released")
    }

    /// Mutably borrow the reserved value (consume-in-place).
    pub fn get_mut(&mut self) -> &mut T {
        self.value.as_mut().expect("permit already released")
    }

    /// Take ownership of the value, finishing the read.
    #[must_use]
    pub fn take(mut self) -> T {
        self.value.take().expect("permit already released")
    }

    /// Finish the read, discarding the value.
    pub fn release(self) {
        drop(self);
    }
}
