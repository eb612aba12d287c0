//! Sliding-window rate limiter for batch dispatch
//!
//! Caps outbound gateway submissions at N per rolling second. Unlike a
//! fixed-window counter, a burst at the end of one second cannot combine
//! with a burst at the start of the next to exceed the cap.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

const WINDOW: Duration = Duration::from_secs(1);

/// Sliding one-second window over submission timestamps
///
/// Single-consumer: the batch loop calls [`acquire`](Self::acquire) before
/// each submission and sleeps until a slot opens. Driven by `tokio::time`,
/// so tests can run it under paused time.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    max_per_window: usize,
    timestamps: VecDeque<Instant>,
}

impl SlidingWindowLimiter {
    /// Create a limiter allowing `max_per_window` acquisitions per second
    pub fn new(max_per_window: u32) -> Self {
        Self {
            max_per_window: max_per_window.max(1) as usize,
            timestamps: VecDeque::with_capacity(max_per_window.max(1) as usize),
        }
    }

    /// Wait until a submission slot is available, then claim it
    pub async fn acquire(&mut self) {
        loop {
            let now = Instant::now();
            self.evict(now);

            if self.timestamps.len() < self.max_per_window {
                self.timestamps.push_back(now);
                return;
            }

            // Window is full; the oldest timestamp leaving it opens a slot
            let oldest = self.timestamps[0];
            let wake_at = oldest + WINDOW;
            trace!(in_window = self.timestamps.len(), "Rate limit reached, waiting");
            tokio::time::sleep_until(wake_at).await;
        }
    }

    fn evict(&mut self, now: Instant) {
        while let Some(&front) = self.timestamps.front() {
            if now.duration_since(front) >= WINDOW {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }
}
