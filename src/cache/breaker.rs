//! Circuit Breaker Module
//!
//! Three-state guard around calls to the backing store. The breaker only observes
//! success or failure of the wrapped operation; it never rewrites the operation's
//! own error.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::clock::SharedClock;
use crate::config::BreakerConfig;

// == State ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Normal operation, calls go through
    Closed,
    /// Failing fast until the recovery timeout elapses
    Open,
    /// Admitting a limited number of trial calls
    HalfOpen,
}

// == Error ==
#[derive(Error, Debug)]
pub enum BreakerError<E> {
    /// Refused without invoking the operation
    #[error("circuit '{name}' is open, {:.1}s remaining", .remaining.as_secs_f64())]
    Open { name: String, remaining: Duration },

    /// The operation ran and failed; its error is passed through untouched
    #[error("{0}")]
    Inner(E),
}

// == Status ==
/// Point-in-time view of the breaker for the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatus {
    pub name: String,
    pub state: BreakerState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub recovery_timeout_secs: u64,
    pub time_remaining_secs: f64,
    pub half_open_calls: u32,
    pub half_open_max_calls: u32,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    failure_count: u32,
    last_failure_time: Option<DateTime<Utc>>,
    half_open_calls: u32,
    /// Bumped on every entry into HALF_OPEN
    generation: u64,
}

/// Admission to one call.
///
/// A half-open trial slot is handed back on drop unless the call completed,
/// so a cancelled trial cannot wedge the breaker in HALF_OPEN.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    trial: Option<u64>,
}

impl Permit<'_> {
    /// The call finished; the outcome drives the state from here.
    fn settle(mut self) {
        self.trial = None;
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if let Some(generation) = self.trial {
            self.breaker.release_trial(generation);
        }
    }
}

// == Circuit Breaker ==
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    clock: SharedClock,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig, clock: SharedClock) -> Self {
        let name = name.into();
        info!(
            breaker = %name,
            failure_threshold = config.failure_threshold,
            recovery_timeout_secs = config.recovery_timeout.as_secs(),
            half_open_max_calls = config.half_open_max_calls,
            "Circuit breaker initialized"
        );

        Self {
            name,
            config,
            clock,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failure_count: 0,
                last_failure_time: None,
                half_open_calls: 0,
                generation: 0,
            }),
        }
    }

    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    /// Runs `operation` under breaker protection.
    ///
    /// While open (or half-open with all trial slots taken) the call fails with
    /// [`BreakerError::Open`] and `operation` is never invoked.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let permit = match self.acquire() {
            Ok(permit) => permit,
            Err(remaining) => {
                return Err(BreakerError::Open {
                    name: self.name.clone(),
                    remaining,
                })
            }
        };

        let result = operation().await;
        permit.settle();
        match result {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(err) => {
                self.on_failure(&err);
                Err(BreakerError::Inner(err))
            }
        }
    }

    /// Admission check; moves OPEN to HALF_OPEN once the cooldown has elapsed.
    ///
    /// A refusal carries the cooldown still remaining.
    fn acquire(&self) -> Result<Permit<'_>, Duration> {
        let now = self.clock.now();
        let mut inner = self.lock();

        if inner.state == BreakerState::Open {
            let remaining = self.remaining(&inner, now);
            if remaining > Duration::ZERO {
                return Err(remaining);
            }
            info!(breaker = %self.name, "Circuit breaker entering half-open state");
            inner.state = BreakerState::HalfOpen;
            inner.half_open_calls = 0;
            inner.generation += 1;
        }

        let trial = if inner.state == BreakerState::HalfOpen {
            if inner.half_open_calls >= self.config.half_open_max_calls {
                return Err(self.remaining(&inner, now));
            }
            inner.half_open_calls += 1;
            Some(inner.generation)
        } else {
            None
        };

        Ok(Permit {
            breaker: self,
            trial,
        })
    }

    /// Returns a trial slot taken by a call that never completed.
    fn release_trial(&self, generation: u64) {
        let mut inner = self.lock();
        if inner.state == BreakerState::HalfOpen && inner.generation == generation {
            inner.half_open_calls = inner.half_open_calls.saturating_sub(1);
            debug!(breaker = %self.name, "Half-open trial abandoned, slot released");
        }
    }

    fn on_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::HalfOpen => {
                info!(breaker = %self.name, "Circuit breaker closing, backend appears healthy");
                inner.state = BreakerState::Closed;
                inner.failure_count = 0;
                inner.half_open_calls = 0;
            }
            BreakerState::Closed => inner.failure_count = 0,
            BreakerState::Open => {}
        }
    }

    fn on_failure<E: std::fmt::Display>(&self, err: &E) {
        let now = self.clock.now();
        let mut inner = self.lock();
        inner.last_failure_time = Some(now);

        match inner.state {
            BreakerState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    warn!(
                        breaker = %self.name,
                        failures = inner.failure_count,
                        error = %err,
                        "Circuit breaker opening"
                    );
                    inner.state = BreakerState::Open;
                }
            }
            BreakerState::HalfOpen => {
                warn!(
                    breaker = %self.name,
                    error = %err,
                    "Circuit breaker reopening, backend still unhealthy"
                );
                inner.state = BreakerState::Open;
            }
            BreakerState::Open => {}
        }
    }

    /// Cooldown left, measured from the last failure.
    fn remaining(&self, inner: &Inner, now: DateTime<Utc>) -> Duration {
        let Some(last) = inner.last_failure_time else {
            return Duration::ZERO;
        };
        let elapsed = (now - last).to_std().unwrap_or(Duration::ZERO);
        self.config.recovery_timeout.saturating_sub(elapsed)
    }

    pub fn status(&self) -> BreakerStatus {
        let now = self.clock.now();
        let inner = self.lock();
        let time_remaining_secs = if inner.state == BreakerState::Open {
            self.remaining(&inner, now).as_secs_f64()
        } else {
            0.0
        };

        BreakerStatus {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            failure_threshold: self.config.failure_threshold,
            last_failure_time: inner.last_failure_time,
            recovery_timeout_secs: self.config.recovery_timeout.as_secs(),
            time_remaining_secs,
            half_open_calls: inner.half_open_calls,
            half_open_max_calls: self.config.half_open_max_calls,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
