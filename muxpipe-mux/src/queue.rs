//! Bounded, growable queues and manual-reset events.
//!
//! Queues are the only cross-thread mutable state in the scheduler. A push
//! never blocks: capacity is a pacing watermark for the interleave loop, and
//! the loop grows it under starvation. Events are level-triggered and stay
//! set until explicitly reset.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::Duration;

/// Usage snapshot of one queue.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueStats {
    /// Current element count.
    pub len: usize,
    /// Capacity watermark.
    pub capacity: usize,
    /// Highest element count observed.
    pub peak: usize,
}

struct Inner<T> {
    buf: VecDeque<T>,
    capacity: usize,
    peak: usize,
}

/// A multi-producer multi-consumer queue with a soft capacity.
pub struct PktQueue<T> {
    inner: Mutex<Inner<T>>,
}

impl<T> PktQueue<T> {
    /// Create a queue with the given capacity watermark.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                buf: VecDeque::with_capacity(capacity.min(1024)),
                capacity,
                peak: 0,
            }),
        }
    }

    /// Append one element.
    pub fn push(&self, item: T) {
        let mut inner = self.inner.lock();
        inner.buf.push_back(item);
        let len = inner.buf.len();
        inner.peak = inner.peak.max(len);
    }

    /// Remove and return the oldest element.
    pub fn pop(&self) -> Option<T> {
        self.inner.lock().buf.pop_front()
    }

    /// Current element count.
    pub fn len(&self) -> usize {
        self.inner.lock().buf.len()
    }

    /// Whether the queue holds no elements.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().buf.is_empty()
    }

    /// The capacity watermark.
    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    /// Raise the capacity watermark; shrinking is ignored.
    pub fn set_capacity(&self, capacity: usize) {
        let mut inner = self.inner.lock();
        if capacity > inner.capacity {
            inner.capacity = capacity;
        }
    }

    /// Usage snapshot.
    pub fn stats(&self) -> QueueStats {
        let inner = self.inner.lock();
        QueueStats {
            len: inner.buf.len(),
            capacity: inner.capacity,
            peak: inner.peak,
        }
    }

    /// Remove every element.
    pub fn drain(&self) -> Vec<T> {
        self.inner.lock().buf.drain(..).collect()
    }
}

/// A manual-reset event.
///
/// `set` wakes every waiter and leaves the event signaled until `reset`.
#[derive(Default)]
pub struct Event {
    state: Mutex<bool>,
    cond: Condvar,
}

impl Event {
    /// Create an unsignaled event.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal the event.
    pub fn set(&self) {
        let mut state = self.state.lock();
        *state = true;
        self.cond.notify_all();
    }

    /// Clear the signal.
    pub fn reset(&self) {
        *self.state.lock() = false;
    }

    /// Whether the event is currently signaled.
    pub fn is_set(&self) -> bool {
        *self.state.lock()
    }

    /// Block until the event is signaled.
    pub fn wait(&self) {
        let mut state = self.state.lock();
        while !*state {
            self.cond.wait(&mut state);
        }
    }

    /// Block until signaled or the timeout elapses; returns the signal
    /// state on return.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if *state {
            return true;
        }
        self.cond.wait_for(&mut state, timeout);
        *state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_queue_fifo() {
        let q = PktQueue::new(4);
        q.push(1);
        q.push(2);
        q.push(3);
        assert_eq!(q.len(), 3);
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), Some(3));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn test_queue_grows_past_capacity() {
        let q = PktQueue::new(2);
        for i in 0..10 {
            q.push(i);
        }
        assert_eq!(q.len(), 10);
        assert_eq!(q.capacity(), 2);
        assert_eq!(q.stats().peak, 10);
    }

    #[test]
    fn test_set_capacity_only_grows() {
        let q = PktQueue::<u32>::new(8);
        q.set_capacity(4);
        assert_eq!(q.capacity(), 8);
        q.set_capacity(32);
        assert_eq!(q.capacity(), 32);
    }

    #[test]
    fn test_event_level_triggered() {
        let ev = Event::new();
        assert!(!ev.wait_timeout(Duration::from_millis(1)));
        ev.set();
        assert!(ev.wait_timeout(Duration::from_millis(1)));
        // stays set until reset
        assert!(ev.is_set());
        ev.reset();
        assert!(!ev.is_set());
    }

    #[test]
    fn test_event_wakes_waiter() {
        let ev = Arc::new(Event::new());
        let ev2 = Arc::clone(&ev);
        let handle = std::thread::spawn(move || {
            ev2.wait();
            true
        });
        std::thread::sleep(Duration::from_millis(10));
        ev.set();
        assert!(handle.join().unwrap());
    }
}
