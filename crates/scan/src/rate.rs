//! Token-bucket rate limiter for probe pacing

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Simple token bucket: capacity and refill rate both equal the configured
/// probes-per-second. Shared across the worker pool.
pub struct RateLimiter {
    inner: Mutex<Bucket>,
    refill_rate: f64,
    capacity: f64,
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    pub fn new(probes_per_second: u32) -> Self {
        let capacity = f64::from(probes_per_second.max(1));
        Self {
            inner: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            refill_rate: capacity,
            capacity,
        }
    }

    /// Wait until one token is available, then consume it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.inner.lock();
                let now = Instant::now();
                let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
                let refilled = (bucket.tokens + elapsed * self.refill_rate).min(self.capacity);
                if refilled >= 1.0 {
                    bucket.tokens = refilled - 1.0;
                    bucket.last_refill = now;
                    return;
                }
                bucket.tokens = refilled;
                bucket.last_refill = now;
                Duration::from_secs_f64((1.0 - refilled) / self.refill_rate)
            };
            tokio::time::sleep(wait).await;
        }
    }

    pub fn rate(&self) -> f64 {
        self.refill_rate
    }
}
