//! Circuit breaker protecting the remote call path.
//!
//! Tracks consecutive failures of provider calls and flips between three
//! states: Closed (normal), Open (all calls refused until the reset timeout
//! elapses), and HalfOpen (exactly one trial call admitted). One instance is
//! injected into the batch fetcher and retrier at construction — there is no
//! ambient global. Multiple runner invocations may share it concurrently, so
//! all state lives behind a mutex.

use super::provider::FetchError;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Observable state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Normal operation — calls are allowed.
    Closed,
    /// Tripped — calls are refused until the reset timeout expires.
    Open,
    /// One trial call is admitted; its outcome decides the next state.
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    /// True while the single HalfOpen trial call is outstanding.
    trial_in_flight: bool,
}

/// Circuit breaker with Closed / Open / HalfOpen transitions.
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    failure_threshold: u32,
    reset_timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
            failure_threshold,
            reset_timeout,
        }
    }

    /// Default provider breaker: trips after 3 consecutive failures,
    /// 30-second reset timeout.
    pub fn default_provider() -> Self {
        Self::new(3, Duration::from_secs(30))
    }

    /// Current state. An Open breaker whose reset timeout has elapsed is
    /// reported (and recorded) as HalfOpen.
    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock().unwrap();
        self.maybe_enter_half_open(&mut inner);
        inner.state
    }

    /// Consecutive failure count since the last success.
    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().unwrap().consecutive_failures
    }

    /// Operator escape hatch: force the breaker back to Closed.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.trial_in_flight = false;
        info!("circuit breaker manually reset to closed");
    }

    /// Run `op` through the breaker. While Open this returns
    /// `FetchError::CircuitOpen` without invoking `op` at all.
    pub fn call<T, F>(&self, op: F) -> Result<T, FetchError>
    where
        F: FnOnce() -> Result<T, FetchError>,
    {
        self.try_acquire()?;

        // A panicking `op` must still release the half-open trial slot,
        // otherwise every later call would see CircuitOpen forever. The
        // guard records the unwind as a failure.
        let mut guard = CallGuard {
            breaker: self,
            armed: true,
        };
        let result = op();
        guard.armed = false;

        match result {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(err) => {
                if err.counts_as_breaker_failure() {
                    self.on_failure();
                } else {
                    // A well-formed rejection (bad symbol, bad request) means
                    // the remote answered — that is not degradation.
                    self.on_success();
                }
                Err(err)
            }
        }
    }

    fn try_acquire(&self) -> Result<(), FetchError> {
        let mut inner = self.inner.lock().unwrap();
        self.maybe_enter_half_open(&mut inner);
        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => Err(FetchError::CircuitOpen),
            BreakerState::HalfOpen => {
                if inner.trial_in_flight {
                    // Only one trial call at a time.
                    Err(FetchError::CircuitOpen)
                } else {
                    inner.trial_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != BreakerState::Closed {
            info!("circuit breaker closed after successful call");
        }
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.trial_in_flight = false;
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            BreakerState::HalfOpen => {
                warn!("circuit breaker trial call failed, reopening");
                self.open(&mut inner);
            }
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    warn!(
                        failures = inner.consecutive_failures,
                        "circuit breaker opened after consecutive failures"
                    );
                    self.open(&mut inner);
                }
            }
            // Failures reported while Open (e.g. from a caller that raced the
            // trip) don't restart the timer.
            BreakerState::Open => {}
        }
    }

    fn open(&self, inner: &mut Inner) {
        inner.state = BreakerState::Open;
        inner.opened_at = Some(Instant::now());
        inner.trial_in_flight = false;
    }

    fn record_unwind(&self) {
        warn!("provider call panicked inside the circuit breaker");
        self.on_failure();
    }

    fn maybe_enter_half_open(&self, inner: &mut Inner) {
        if inner.state == BreakerState::Open {
            let expired = inner
                .opened_at
                .map(|t| t.elapsed() >= self.reset_timeout)
                .unwrap_or(true);
            if expired {
                info!("circuit breaker reset timeout elapsed, entering half-open");
                inner.state = BreakerState::HalfOpen;
                inner.trial_in_flight = false;
            }
        }
    }
}

/// Converts an unwind out of `CircuitBreaker::call` into a recorded failure.
struct CallGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.record_unwind();
        }
    }
}
