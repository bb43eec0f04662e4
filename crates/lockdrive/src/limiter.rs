//! Token-bucket rate limiter
//!
//! Bounds the recursive child-listing fan-out during tree
//! materialization: tokens refill at a fixed average rate up to a burst
//! capacity, and `wait` suspends until a token is available.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug)]
struct LimiterState {
    tokens: f64,
    last: Instant,
}

/// An async token-bucket limiter.
#[derive(Debug)]
pub struct Limiter {
    rate: f64,
    burst: f64,
    state: Mutex<LimiterState>,
}

impl Limiter {
    /// Create a limiter allowing `rate` acquisitions per second on
    /// average, with at most `burst` immediately available.
    pub fn new(rate: u32, burst: u32) -> Self {
        Self {
            rate: rate as f64,
            burst: burst as f64,
            state: Mutex::new(LimiterState {
                tokens: burst as f64,
                last: Instant::now(),
            }),
        }
    }

    /// Take one token, sleeping until the bucket can supply it.
    pub async fn wait(&self) {
        loop {
            let delay = {
                let mut state = self.state.lock().expect("limiter lock poisoned");

                let now = Instant::now();
                let elapsed = now.duration_since(state.last).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.rate).min(self.burst);
                state.last = now;

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    None
                } else {
                    Some(Duration::from_secs_f64((1.0 - state.tokens) / self.rate))
                }
            };

            match delay {
                None => return,
                Some(delay) => tokio::time::sleep(delay).await,
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_burst_is_immediate() {
        let limiter = Limiter::new(8, 1);
        let start = Instant::now();
        limiter.wait().await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_is_enforced() {
        let limiter = Limiter::new(8, 1);
        let start = Instant::now();

        // First token is the burst; the next eight refill at 8/s.
        for _ in 0..9 {
            limiter.wait().await;
        }

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(990), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(1200), "elapsed {elapsed:?}");
    }
}
