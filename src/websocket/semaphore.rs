use std::collections::VecDeque;
use std::time::{Duration, Instant};
use parking_lot::{Condvar, Mutex};
use super::types::TransportEvent;

// ============================================================================
// Semaphore - counting wait primitive
// ============================================================================

/// Counting semaphore used to turn asynchronous completions into blocking waits.
///
/// Starts with no permits; every [`notify`](Self::notify) releases exactly one waiter.
#[derive(Debug, Default)]
pub struct Semaphore {
    count: Mutex<usize>,
    available: Condvar,
}

impl Semaphore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one permit and wakes a single waiter.
    pub fn notify(&self) {
        let mut count = self.count.lock();
        *count += 1;
        self.available.notify_one();
    }

    /// Blocks until a permit is available, then takes it.
    pub fn wait(&self) {
        let mut count = self.count.lock();
        // Loop absorbs spurious wake-ups
        while *count == 0 {
            self.available.wait(&mut count);
        }
        *count -= 1;
    }

    /// Takes a permit if one is available without blocking.
    pub fn try_wait(&self) -> bool {
        let mut count = self.count.lock();
        if *count > 0 {
            *count -= 1;
            true
        } else {
            false
        }
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`. Returns whether a permit was taken.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.count.lock();
        while *count == 0 {
            if self.available.wait_until(&mut count, deadline).timed_out() {
                break;
            }
        }
        if *count > 0 {
            *count -= 1;
            true
        } else {
            false
        }
    }

    /// Number of permits currently available.
    pub fn available(&self) -> usize {
        *self.count.lock()
    }
}

// ============================================================================
// Inbox - FIFO of transport events paired with a semaphore
// ============================================================================

/// Event queue whose semaphore count always equals its length.
#[derive(Debug, Default)]
pub(crate) struct Inbox {
    events: Mutex<VecDeque<TransportEvent>>,
    signal: Semaphore,
}

impl Inbox {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, event: TransportEvent) {
        let mut events = self.events.lock();
        events.push_back(event);
        self.signal.notify();
    }

    /// Puts a consumed event back at the front and re-signals it.
    pub(crate) fn requeue(&self, event: TransportEvent) {
        let mut events = self.events.lock();
        events.push_front(event);
        self.signal.notify();
    }

    pub(crate) fn next(&self) -> TransportEvent {
        loop {
            self.signal.wait();
            if let Some(event) = self.events.lock().pop_front() {
                return event;
            }
        }
    }

    pub(crate) fn try_next(&self) -> Option<TransportEvent> {
        if self.signal.try_wait() {
            self.events.lock().pop_front()
        } else {
            None
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.events.lock().len()
    }
}
