use std::time::Duration;

use tokio::time::Instant;

/// Rate limit for progress callbacks: at most one pass per `interval`.
///
/// Unlike [`Debouncer`](super::Debouncer) this is leading-edge: the first
/// event passes immediately, later events within the window are dropped.
#[derive(Debug, Clone)]
pub struct Throttle {
    interval: Duration,
    next: Option<Instant>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: None,
        }
    }

    /// Whether an event at `now` should be delivered. Delivering starts a new
    /// window.
    pub fn ready(&mut self, now: Instant) -> bool {
        match self.next {
            Some(next) if now < next => false,
            _ => {
                self.next = Some(now + self.interval);
                true
            }
        }
    }
}
