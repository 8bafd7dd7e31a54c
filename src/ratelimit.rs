//! Metadata-fetch token bucket pacing remote listing calls (spec.md §4.3,
//! "Rate limiting"; §6, `metadata_rate`).

use std::sync::Mutex;
use std::time::{Duration, Instant};

struct BucketState {
    tokens: u32,
    last_refill: Instant,
}

/// A simple fixed-window token bucket: `count` tokens become available
/// every `interval`, reset in one shot rather than leaking continuously —
/// sufficient to pace a small number of metadata calls per run.
pub struct TokenBucket {
    capacity: u32,
    interval: Duration,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(count: u32, interval_ms: u64) -> Self {
        Self {
            capacity: count,
            interval: Duration::from_millis(interval_ms),
            state: Mutex::new(BucketState {
                tokens: count,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Waits until a token is available, then consumes it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().expect("token bucket lock poisoned");
                if state.last_refill.elapsed() >= self.interval {
                    state.tokens = self.capacity;
                    state.last_refill = Instant::now();
                }
                if state.tokens > 0 {
                    state.tokens -= 1;
                    None
                } else {
                    Some(self.interval.saturating_sub(state.last_refill.elapsed()))
                }
            };
            match wait {
                None => return,
                Some(delay) => tokio::time::sleep(delay).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn drains_then_refills_after_interval() {
        let bucket = TokenBucket::new(2, 50);
        bucket.acquire().await;
        bucket.acquire().await;

        let start = Instant::now();
        bucket.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
