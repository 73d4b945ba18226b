//! Three-state circuit breaker per provider.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::info;

use crate::models::CircuitState;

#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError {
    #[error("circuit open")]
    CircuitOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
    pub half_open_max_probes: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        CircuitBreakerConfig {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
            half_open_max_probes: 1,
        }
    }
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    half_open_probes_in_flight: u32,
}

/// Owns the in-memory breaker state for one provider. The caller is
/// responsible for mirroring state changes into `ProviderHealth`.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        CircuitBreaker {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                half_open_probes_in_flight: 0,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().expect("circuit breaker mutex poisoned").state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().expect("circuit breaker mutex poisoned").consecutive_failures
    }

    /// Returns `Ok(())` if a call may proceed, transitioning `open` ->
    /// `half_open` once the cooldown has elapsed. Returns
    /// `CircuitOpen` if the caller must skip this provider.
    pub fn allow(&self) -> Result<(), CircuitBreakerError> {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::HalfOpen => {
                if inner.half_open_probes_in_flight < self.config.half_open_max_probes {
                    inner.half_open_probes_in_flight += 1;
                    Ok(())
                } else {
                    Err(CircuitBreakerError::CircuitOpen)
                }
            },
            CircuitState::Open => {
                let opened_at = inner.opened_at.unwrap_or_else(Instant::now);
                if opened_at.elapsed() >= self.config.cooldown {
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_probes_in_flight = 1;
                    info!(provider = self.name; "circuit breaker entering half_open after cooldown");
                    Ok(())
                } else {
                    Err(CircuitBreakerError::CircuitOpen)
                }
            },
        }
    }

    /// Success always resets the consecutive-failure counter.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        let was_open = !matches!(inner.state, CircuitState::Closed);
        inner.consecutive_failures = 0;
        inner.state = CircuitState::Closed;
        inner.opened_at = None;
        inner.half_open_probes_in_flight = 0;
        if was_open {
            info!(provider = self.name; "circuit breaker closed after success");
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.half_open_probes_in_flight = 0;
                info!(provider = self.name; "circuit breaker reopened after half_open probe failure");
            },
            CircuitState::Closed | CircuitState::Open => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold && inner.state == CircuitState::Closed
                {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    info!(provider = self.name, failures = inner.consecutive_failures; "circuit breaker opened");
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            cooldown: Duration::from_millis(20),
            half_open_max_probes: 1,
        }
    }

    #[test]
    fn opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new("p1", fast_config());
        for _ in 0..3 {
            breaker.allow().unwrap();
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.consecutive_failures() >= 3);
    }

    #[test]
    fn open_refuses_until_cooldown_elapses() {
        let breaker = CircuitBreaker::new("p1", fast_config());
        for _ in 0..3 {
            breaker.record_failure();
        }
        assert!(matches!(breaker.allow(), Err(CircuitBreakerError::CircuitOpen)));
        std::thread::sleep(Duration::from_millis(30));
        assert!(breaker.allow().is_ok());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn half_open_success_closes_with_reset_counter() {
        let breaker = CircuitBreaker::new("p1", fast_config());
        for _ in 0..3 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(30));
        breaker.allow().unwrap();
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures(), 0);
    }

    #[test]
    fn half_open_failure_reopens_and_restarts_cooldown() {
        let breaker = CircuitBreaker::new("p1", fast_config());
        for _ in 0..3 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(30));
        breaker.allow().unwrap();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(matches!(breaker.allow(), Err(CircuitBreakerError::CircuitOpen)));
    }
}
