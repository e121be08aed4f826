// ============================================================================
// Circuit Breaker
// ============================================================================
//
// Stops calling a push vendor that keeps failing.
//
// States:
// - Closed: Normal operation, requests pass through
// - Open: Vendor is failing, requests are rejected immediately
// - Half-Open: Reset timeout elapsed, one trial request decides
//
// ============================================================================

use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Closed: Normal operation
    Closed,
    /// Open: Vendor is failing, reject requests
    Open,
    /// Half-Open: Testing recovery
    HalfOpen,
}

#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    #[error("circuit breaker {0} is open")]
    Open(&'static str),
    #[error(transparent)]
    Inner(E),
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

pub struct CircuitBreaker {
    name: &'static str,
    failure_threshold: u32,
    reset_timeout: Duration,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            name,
            failure_threshold: failure_threshold.max(1),
            reset_timeout,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    /// Run `operation` unless the circuit is open, recording its outcome
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.allow_request().await {
            return Err(CircuitBreakerError::Open(self.name));
        }

        match operation().await {
            Ok(value) => {
                self.record_success().await;
                Ok(value)
            }
            Err(e) => {
                self.record_failure().await;
                Err(CircuitBreakerError::Inner(e))
            }
        }
    }

    async fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|at| at.elapsed()).unwrap_or_default();
                if elapsed >= self.reset_timeout {
                    inner.state = CircuitState::HalfOpen;
                    tracing::info!(breaker = self.name, "Circuit breaker transitioning to half-open");
                    true
                } else {
                    false
                }
            }
        }
    }

    async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state == CircuitState::HalfOpen {
            tracing::info!(breaker = self.name, "Circuit breaker closed after successful recovery");
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;
        inner.consecutive_failures += 1;

        let trip = match inner.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => inner.consecutive_failures >= self.failure_threshold,
            CircuitState::Open => false,
        };
        if trip {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            tracing::warn!(
                breaker = self.name,
                failure_count = inner.consecutive_failures,
                threshold = self.failure_threshold,
                "Circuit breaker opened due to failures"
            );
        }
    }

    /// Get current state (for metrics and tests)
    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn fail(breaker: &CircuitBreaker) -> Result<(), CircuitBreakerError<&'static str>> {
        breaker.call(|| async { Err::<(), _>("boom") }).await
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<(), CircuitBreakerError<&'static str>> {
        breaker.call(|| async { Ok::<(), &'static str>(()) }).await
    }

    #[tokio::test]
    async fn test_opens_after_threshold() {
        let breaker = CircuitBreaker::new("test", 2, Duration::from_secs(60));
        assert!(matches!(fail(&breaker).await, Err(CircuitBreakerError::Inner("boom"))));
        assert_eq!(breaker.state().await, CircuitState::Closed);
        assert!(fail(&breaker).await.is_err());
        assert_eq!(breaker.state().await, CircuitState::Open);

        assert!(matches!(succeed(&breaker).await, Err(CircuitBreakerError::Open("test"))));
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let breaker = CircuitBreaker::new("test", 2, Duration::from_secs(60));
        assert!(fail(&breaker).await.is_err());
        succeed(&breaker).await.unwrap();
        assert!(fail(&breaker).await.is_err());
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_recovers_or_reopens() {
        let breaker = CircuitBreaker::new("test", 1, Duration::ZERO);
        assert!(fail(&breaker).await.is_err());
        assert_eq!(breaker.state().await, CircuitState::Open);

        // Zero reset timeout: the next call is the half-open trial
        assert!(fail(&breaker).await.is_err());
        assert_eq!(breaker.state().await, CircuitState::Open);

        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }
}
