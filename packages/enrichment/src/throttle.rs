//! Fixed-interval throttle for outbound address lookups.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Hands out time slots at least `interval` apart, shared by every worker
/// of a pass. A failed lookup can push the next slot further out.
#[derive(Debug)]
pub struct Throttle {
    interval: Duration,
    next: Mutex<Instant>,
}

impl Throttle {
    /// First slot is available immediately.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Mutex::new(Instant::now()),
        }
    }

    /// Waits for the next free slot and reserves it.
    pub async fn acquire(&self) {
        let slot = {
            let mut next = self.next.lock().await;
            let slot = (*next).max(Instant::now());
            *next = slot + self.interval;
            slot
        };
        tokio::time::sleep_until(slot).await;
    }

    /// Delays every future slot by `backoff` past the current one.
    pub async fn penalize(&self, backoff: Duration) {
        let mut next = self.next.lock().await;
        *next = (*next).max(Instant::now()) + backoff;
    }
}
