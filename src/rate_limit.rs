use std::time::{Duration, Instant};

use crate::protocol::StoreError;

/// Sustained requests per second allowed to one client
pub const REQUESTS_PER_SECOND: u32 = 100;
/// Requests a client may fire back to back before throttling kicks in
pub const BURST_SIZE: u32 = 50;

/// Token bucket kept per connected client.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    refill_per_sec: f64,
    capacity: f64,
    tokens: f64,
    last_refill: Instant,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(REQUESTS_PER_SECOND, BURST_SIZE)
    }
}

impl RateLimiter {
    pub fn new(requests_per_second: u32, burst_size: u32) -> Self {
        Self::starting_at(requests_per_second, burst_size, Instant::now())
    }

    fn starting_at(requests_per_second: u32, burst_size: u32, now: Instant) -> Self {
        let capacity = burst_size.max(1) as f64;
        Self {
            refill_per_sec: requests_per_second.max(1) as f64,
            capacity,
            tokens: capacity,
            last_refill: now,
        }
    }

    /// Take one token, or report how long until one is available.
    pub fn check(&mut self) -> Result<(), StoreError> {
        self.check_at(Instant::now())
            .map_err(|wait| StoreError::RateLimited {
                retry_after_ms: wait.as_millis().max(1) as u64,
            })
    }

    fn check_at(&mut self, now: Instant) -> Result<(), Duration> {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
            self.last_refill = now;
        }

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return Ok(());
        }
        let missing = 1.0 - self.tokens;
        Err(Duration::from_secs_f64(missing / self.refill_per_sec))
    }
}
