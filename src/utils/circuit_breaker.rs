use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

// ============================================================================
// Circuit Breaker
// ============================================================================
//
// Stops hammering the broker once it keeps failing.
//
//   Closed   -- failure_threshold consecutive failures -->  Open
//   Open     -- open_for elapsed, next call admitted   -->  HalfOpen
//   HalfOpen -- success_threshold successes            -->  Closed
//   HalfOpen -- any failure                            -->  Open
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Gauge value: 0=Closed, 1=Open, 2=HalfOpen
    pub fn as_gauge(&self) -> i64 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    /// How long the circuit stays open before a trial call is let through
    pub open_for: Duration,
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_for: Duration::from_secs(60),
            success_threshold: 2,
        }
    }
}

#[derive(Debug)]
struct Counters {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    opened_at: Option<Instant>,
}

#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    #[error("Circuit breaker is open")]
    CircuitOpen,
    #[error("Operation failed: {0}")]
    OperationFailed(E),
}

pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    counters: Mutex<Counters>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            counters: Mutex::new(Counters {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                half_open_successes: 0,
                opened_at: None,
            }),
        }
    }

    /// Run `operation` unless the circuit is open.
    pub async fn call<F, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        if !self.admit() {
            return Err(CircuitBreakerError::CircuitOpen);
        }

        match operation.await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(err) => {
                self.on_failure();
                Err(CircuitBreakerError::OperationFailed(err))
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        self.counters().state
    }

    #[cfg(test)]
    pub(crate) fn consecutive_failures(&self) -> u32 {
        self.counters().consecutive_failures
    }

    fn counters(&self) -> std::sync::MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn admit(&self) -> bool {
        let mut c = self.counters();
        match c.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = c.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.config.open_for {
                    tracing::info!("Circuit breaker transitioning to HalfOpen");
                    c.state = CircuitState::HalfOpen;
                    c.half_open_successes = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn on_success(&self) {
        let mut c = self.counters();
        c.consecutive_failures = 0;
        if c.state == CircuitState::HalfOpen {
            c.half_open_successes += 1;
            if c.half_open_successes >= self.config.success_threshold {
                tracing::info!(
                    successes = c.half_open_successes,
                    "Circuit breaker closing"
                );
                c.state = CircuitState::Closed;
                c.half_open_successes = 0;
                c.opened_at = None;
            }
        }
    }

    fn on_failure(&self) {
        let mut c = self.counters();
        c.consecutive_failures += 1;

        let trip = match c.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => c.consecutive_failures >= self.config.failure_threshold,
            CircuitState::Open => false,
        };

        if trip {
            tracing::warn!(
                failures = c.consecutive_failures,
                "Circuit breaker opening"
            );
            c.state = CircuitState::Open;
            c.opened_at = Some(Instant::now());
            c.half_open_successes = 0;
        }
    }
}
