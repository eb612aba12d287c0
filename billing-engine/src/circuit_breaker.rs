//! Consecutive-failure circuit breaker for batch dispatch
//!
//! A run of gateway *infrastructure* failures (transport errors, 5xx,
//! unparseable bodies) during a batch means the gateway is unwell; pausing
//! beats hammering it. Business outcomes — approved or declined — count as
//! successes and reset the run.

use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Opens after N consecutive failures, holds the batch for a cooldown,
/// then resumes. Scoped to a single batch loop, not shared.
#[derive(Debug)]
pub struct BatchCircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    consecutive_failures: u32,
    open_until: Option<Instant>,
}

impl BatchCircuitBreaker {
    /// Create a breaker that opens after `threshold` consecutive failures
    /// and holds for `cooldown`
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown,
            consecutive_failures: 0,
            open_until: None,
        }
    }

    /// Wait until the breaker permits the next submission
    pub async fn ready(&mut self) {
        if let Some(open_until) = self.open_until.take() {
            let now = Instant::now();
            if open_until > now {
                warn!(
                    cooldown_remaining_secs = (open_until - now).as_secs(),
                    "Circuit breaker open, holding batch"
                );
                tokio::time::sleep_until(open_until).await;
            }
            info!("Circuit breaker cooldown elapsed, resuming");
            self.consecutive_failures = 0;
        }
    }

    /// A gateway conversation completed (approved or declined both count)
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// A gateway conversation failed; opens the breaker at the threshold
    pub fn record_failure(&mut self) {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.threshold {
            warn!(
                failures = self.consecutive_failures,
                cooldown_secs = self.cooldown.as_secs(),
                "Failure threshold reached, opening circuit breaker"
            );
            self.open_until = Some(Instant::now() + self.cooldown);
        }
    }

    /// Current consecutive-failure count
    pub fn failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// True when the next `ready()` call would sleep
    pub fn is_open(&self) -> bool {
        self.open_until.is_some_and(|t| t > Instant::now())
    }
}
