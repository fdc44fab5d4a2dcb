use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

struct Inner<T> {
    queue: VecDeque<T>,
    closed: bool,
}

/// A bounded, blocking ring buffer shared between exactly one producer and
/// one consumer thread (the cloud-callback/map thread boundary, the IMU
/// accumulator boundary).
///
/// Built on `std::sync::{Mutex, Condvar}` rather than an async channel:
/// every thread in this engine blocks the OS thread it owns, there is no
/// cooperative scheduler to yield to.
pub struct RingBuffer<T> {
    capacity: usize,
    inner: Mutex<Inner<T>>,
    not_full: Condvar,
    not_empty: Condvar,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be non-zero");
        RingBuffer {
            capacity,
            inner: Mutex::new(Inner { queue: VecDeque::with_capacity(capacity), closed: false }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        }
    }

    /// Blocks while the buffer is full. Returns `false` without pushing if
    /// the buffer has been closed.
    pub fn push(&self, value: T) -> bool {
        let mut guard = self.inner.lock().unwrap();
        while guard.queue.len() >= self.capacity && !guard.closed {
            guard = self.not_full.wait(guard).unwrap();
        }
        if guard.closed {
            return false;
        }
        guard.queue.push_back(value);
        self.not_empty.notify_one();
        true
    }

    /// Never blocks: drops the oldest element to make room when full.
    /// Used by sensor sources that must not stall the capture thread.
    pub fn push_overwrite(&self, value: T) {
        let mut guard = self.inner.lock().unwrap();
        if guard.closed {
            return;
        }
        if guard.queue.len() >= self.capacity {
            guard.queue.pop_front();
        }
        guard.queue.push_back(value);
        self.not_empty.notify_one();
    }

    /// Blocks while the buffer is empty and open. Returns `None` once the
    /// buffer is closed and drained.
    pub fn pop(&self) -> Option<T> {
        let mut guard = self.inner.lock().unwrap();
        while guard.queue.is_empty() && !guard.closed {
            guard = self.not_empty.wait(guard).unwrap();
        }
        let value = guard.queue.pop_front();
        if value.is_some() {
            self.not_full.notify_one();
        }
        value
    }

    pub fn try_pop(&self) -> Option<T> {
        let mut guard = self.inner.lock().unwrap();
        let value = guard.queue.pop_front();
        if value.is_some() {
            self.not_full.notify_one();
        }
        value
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut guard = self.inner.lock().unwrap();
        guard.queue.clear();
        self.not_full.notify_all();
    }

    /// Idempotent. Wakes every blocked `push`/`pop` call so waiting
    /// threads can observe the closed buffer and unwind.
    pub fn close(&self) {
        let mut guard = self.inner.lock().unwrap();
        guard.closed = true;
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }
}
