//! Token-bucket receive shaping.
//!
//! Caps the transfer rate at a configured bytes/sec with a burst capacity of
//! [`WINDOW_SIZE_FACTOR`] seconds worth of data, bounding burstiness the way
//! a small socket receive window would.

use std::time::Duration;

use tokio::time::Instant;

pub const WINDOW_SIZE_FACTOR: u64 = 2;

/// A token bucket that refills at the configured rate.
///
/// A chunk may drive the balance negative; the resulting debt is paid off by
/// sleeping, so chunks larger than the capacity still pass without stalling
/// forever.
pub struct TokenBucket {
    rate: f64,
    capacity: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(bytes_per_sec: u64) -> Self {
        let rate = bytes_per_sec.max(1) as f64;
        let capacity = (bytes_per_sec.max(1) * WINDOW_SIZE_FACTOR) as f64;
        Self {
            rate,
            capacity,
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    /// Account for `bytes` passing through, sleeping until the bucket allows
    /// the resulting debt.
    pub async fn acquire(&mut self, bytes: usize) {
        let wait = self.reserve(bytes as f64);
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }

    fn reserve(&mut self, bytes: f64) -> Duration {
        self.refill();
        self.tokens -= bytes;
        if self.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-self.tokens / self.rate)
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last_refill = now;
    }
}
