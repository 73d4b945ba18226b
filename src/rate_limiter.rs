//! Token-bucket rate limiter, burst = 1.
//!
//! A sustained rate of `r` requests/second produces one token every
//! `1/r` seconds rather than bursts of `r` tokens once per second.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum RateLimiterError {
    #[error("rate limiter wait cancelled")]
    Cancelled,
}

struct State {
    next_available: Instant,
}

/// A single-token bucket. Construct one per provider endpoint.
pub struct RateLimiter {
    interval: Duration,
    state: Mutex<State>,
}

impl RateLimiter {
    pub fn new(requests_per_second: f64) -> Self {
        assert!(requests_per_second > 0.0, "requests_per_second must be positive");
        let interval = Duration::from_secs_f64(1.0 / requests_per_second);
        RateLimiter {
            interval,
            state: Mutex::new(State {
                next_available: Instant::now(),
            }),
        }
    }

    /// Blocks until a token is available or `cancel` fires. Cancellation
    /// never consumes a token — the next caller still waits the full
    /// interval from the last grant.
    pub async fn wait(&self, cancel: &CancellationToken) -> Result<(), RateLimiterError> {
        loop {
            let now = Instant::now();
            let wait_until = {
                let mut state = self.state.lock().expect("rate limiter mutex poisoned");
                if state.next_available <= now {
                    state.next_available = now + self.interval;
                    return Ok(());
                }
                state.next_available
            };

            let remaining = wait_until.saturating_duration_since(now);
            tokio::select! {
                _ = tokio::time::sleep(remaining) => continue,
                _ = cancel.cancelled() => return Err(RateLimiterError::Cancelled),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn sequential_waits_are_paced() {
        let limiter = RateLimiter::new(10.0); // one token per 100ms
        let cancel = CancellationToken::new();
        let start = Instant::now();
        for _ in 0..5 {
            limiter.wait(&cancel).await.unwrap();
        }
        // 5 calls => at most 4 intervals of waiting (first is immediate).
        assert!(start.elapsed() >= Duration::from_millis(400));
    }

    #[tokio::test]
    async fn cancellation_does_not_consume_a_token() {
        let limiter = RateLimiter::new(1.0);
        let cancel = CancellationToken::new();
        limiter.wait(&cancel).await.unwrap();

        let cancel2 = CancellationToken::new();
        cancel2.cancel();
        let err = limiter.wait(&cancel2).await.unwrap_err();
        assert!(matches!(err, RateLimiterError::Cancelled));
    }
}
