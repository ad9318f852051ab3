use std::time::Duration;

use tokio::time::Instant;

/// Coalesces a burst of notifications into a single trailing one.
///
/// Noisy watch channels may report the same change several times in quick
/// succession. `Debouncer` keeps only the most recent value and releases it
/// once no new value has arrived for `delay`. It holds no timer itself: the
/// owner sleeps until [`deadline`](Self::deadline) and then calls
/// [`poll`](Self::poll).
#[derive(Debug)]
pub struct Debouncer<T> {
    delay: Duration,
    pending: Option<T>,
    deadline: Option<Instant>,
}

impl<T> Debouncer<T> {
    /// Create a new debouncer with the given quiet period.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
            deadline: None,
        }
    }

    /// Record a value, replacing any pending one and restarting the window.
    pub fn push(&mut self, value: T, now: Instant) {
        self.pending = Some(value);
        self.deadline = Some(now + self.delay);
    }

    /// When the pending value becomes due, if there is one.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Take the pending value if its window has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<T> {
        match self.deadline {
            Some(deadline) if deadline <= now => self.flush(),
            _ => None,
        }
    }

    /// Take the pending value regardless of the window.
    pub fn flush(&mut self) -> Option<T> {
        self.deadline = None;
        self.pending.take()
    }

    /// Drop the pending value without delivering it.
    pub fn cancel(&mut self) {
        self.deadline = None;
        self.pending = None;
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }
}
