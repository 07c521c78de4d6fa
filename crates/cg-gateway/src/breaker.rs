//! Circuit breaker state machine.
//!
//! [`CircuitBreaker`] tracks the health of the command path. It performs no
//! I/O and reads no clock: every time-dependent method takes `now`, so the
//! owner decides which clock drives it and tests can step it directly.
//!
//! # States
//!
//! ```text
//!            failures >= threshold
//!   Closed ─────────────────────────► Open
//!     ▲                              │  ▲
//!     │ trial ok       next call     │  │ trial failed
//!     │                after cooldown▼  │
//!     └───────────────────────────── HalfOpen
//! ```
//!
//! `HalfOpen` means a single trial call is in flight. Any other call made in
//! that state is rejected, exactly as if the circuit were still open.
//!
//! # Synchronization
//!
//! The breaker is a plain struct. The gateway keeps it behind the same mutex
//! as its queue, which makes "inspect state, maybe become the trial, proceed"
//! one critical section.

use std::fmt;
use std::time::{Duration, Instant};

use cg_core::BreakerConfig;
use serde::{Deserialize, Serialize};

/// Health of the command path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    /// Normal operation: calls pass through.
    Closed,
    /// Too many consecutive failures: calls are rejected until the cool-down ends.
    Open,
    /// A single trial call is in flight.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half-open",
        })
    }
}

/// How a call was let through the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Admitted while closed.
    Pass,
    /// Admitted as the sole half-open trial.
    Trial,
}

/// A state change, reported so the owner can publish it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// State before the change.
    pub from: CircuitState,
    /// State after the change.
    pub to: CircuitState,
}

/// The breaker refused a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejected {
    /// Time until the next trial can be admitted. Zero while a trial is in flight.
    pub remaining: Duration,
}

/// Consecutive-failure circuit breaker.
///
/// # Examples
///
/// ```
/// use cg_core::BreakerConfig;
/// use cg_gateway::{Admission, CircuitBreaker, CircuitState};
/// use std::time::{Duration, Instant};
///
/// let mut breaker = CircuitBreaker::new(BreakerConfig { threshold: 2, reset_timeout_ms: 100 });
/// let start = Instant::now();
///
/// breaker.on_failure(Admission::Pass, start);
/// breaker.on_failure(Admission::Pass, start);
/// assert_eq!(breaker.state(), CircuitState::Open);
/// assert!(breaker.try_acquire(start).is_err());
///
/// let later = start + Duration::from_millis(100);
/// let (admission, _) = breaker.try_acquire(later).unwrap();
/// assert_eq!(admission, Admission::Trial);
/// breaker.on_success(admission);
/// assert_eq!(breaker.state(), CircuitState::Closed);
/// ```
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: CircuitState,
    failures: u32,
    last_failure: Option<Instant>,
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    #[must_use]
    pub const fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            failures: 0,
            last_failure: None,
        }
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub const fn state(&self) -> CircuitState {
        self.state
    }

    /// Returns the consecutive-failure count.
    #[inline]
    #[must_use]
    pub const fn failure_count(&self) -> u32 {
        self.failures
    }

    /// Returns the configured thresholds.
    #[inline]
    #[must_use]
    pub const fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Returns how long until a trial would be admitted, or zero.
    #[must_use]
    pub fn remaining_cooldown(&self, now: Instant) -> Duration {
        match (self.state, self.last_failure) {
            (CircuitState::Open, Some(at)) => self
                .config
                .reset_timeout()
                .saturating_sub(now.saturating_duration_since(at)),
            _ => Duration::ZERO,
        }
    }

    /// Decides whether a call may proceed.
    ///
    /// In `Open`, once the cool-down since the last failure has elapsed, this
    /// call moves the breaker to `HalfOpen` and is admitted as the trial.
    ///
    /// # Errors
    ///
    /// Returns [`Rejected`] while the circuit is open and cooling down, or
    /// while another call holds the trial.
    pub fn try_acquire(
        &mut self,
        now: Instant,
    ) -> Result<(Admission, Option<Transition>), Rejected> {
        match self.state {
            CircuitState::Closed => Ok((Admission::Pass, None)),
            CircuitState::HalfOpen => Err(Rejected {
                remaining: Duration::ZERO,
            }),
            CircuitState::Open => {
                let remaining = self.remaining_cooldown(now);
                if remaining.is_zero() {
                    Ok((Admission::Trial, self.transition(CircuitState::HalfOpen)))
                } else {
                    Err(Rejected { remaining })
                }
            }
        }
    }

    /// Records a call that ran to completion (any exit code).
    pub fn on_success(&mut self, admission: Admission) -> Option<Transition> {
        match (admission, self.state) {
            (Admission::Trial, CircuitState::HalfOpen) => {
                self.failures = 0;
                self.last_failure = None;
                self.transition(CircuitState::Closed)
            }
            (_, CircuitState::Closed) => {
                self.failures = 0;
                None
            }
            // A straggler admitted before the circuit opened proves nothing
            // about recovery; only the trial may close it.
            _ => None,
        }
    }

    /// Records a spawn, kill, or timeout failure observed at `now`.
    pub fn on_failure(&mut self, admission: Admission, now: Instant) -> Option<Transition> {
        self.failures = self.failures.saturating_add(1);
        self.last_failure = Some(now);

        match (admission, self.state) {
            (Admission::Trial, CircuitState::HalfOpen) => self.transition(CircuitState::Open),
            (_, CircuitState::Closed) if self.failures >= self.config.threshold => {
                self.transition(CircuitState::Open)
            }
            _ => None,
        }
    }

    /// Gives the trial slot back without an outcome.
    ///
    /// Used when the trial was cancelled before it finished. The circuit
    /// returns to `Open` with its failure clock untouched, so the next call
    /// may immediately become the trial.
    pub fn abandon_trial(&mut self) -> Option<Transition> {
        if self.state == CircuitState::HalfOpen {
            self.transition(CircuitState::Open)
        } else {
            None
        }
    }

    /// Forces the circuit closed and zeroes the failure counter.
    pub fn reset(&mut self) -> Option<Transition> {
        self.failures = 0;
        self.last_failure = None;
        self.transition(CircuitState::Closed)
    }

    fn transition(&mut self, to: CircuitState) -> Option<Transition> {
        let from = self.state;
        if from == to {
            return None;
        }
        self.state = to;
        Some(Transition { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, reset_timeout_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(BreakerConfig {
            threshold,
            reset_timeout_ms,
        })
    }

    fn trip(breaker: &mut CircuitBreaker, now: Instant) {
        for _ in 0..breaker.config().threshold {
            breaker.on_failure(Admission::Pass, now);
        }
    }

    #[test]
    fn test_initial_state() {
        let breaker = breaker(3, 100);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[test]
    fn test_stays_closed_below_threshold() {
        let mut breaker = breaker(3, 100);
        let now = Instant::now();
        for k in 1..3 {
            assert!(breaker.on_failure(Admission::Pass, now).is_none());
            assert_eq!(breaker.state(), CircuitState::Closed);
            assert_eq!(breaker.failure_count(), k);
        }
    }

    #[test]
    fn test_opens_at_threshold() {
        let mut breaker = breaker(3, 100);
        let now = Instant::now();
        breaker.on_failure(Admission::Pass, now);
        breaker.on_failure(Admission::Pass, now);
        let transition = breaker.on_failure(Admission::Pass, now);
        assert_eq!(
            transition,
            Some(Transition {
                from: CircuitState::Closed,
                to: CircuitState::Open
            })
        );
    }

    #[test]
    fn test_success_resets_counter() {
        let mut breaker = breaker(3, 100);
        let now = Instant::now();
        breaker.on_failure(Admission::Pass, now);
        breaker.on_failure(Admission::Pass, now);
        breaker.on_success(Admission::Pass);
        assert_eq!(breaker.failure_count(), 0);
        breaker.on_failure(Admission::Pass, now);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_rejects_during_cooldown_with_remaining() {
        let mut breaker = breaker(1, 100);
        let start = Instant::now();
        trip(&mut breaker, start);

        let rejected = breaker
            .try_acquire(start + Duration::from_millis(40))
            .unwrap_err();
        assert_eq!(rejected.remaining, Duration::from_millis(60));
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn test_next_call_after_cooldown_is_trial() {
        let mut breaker = breaker(1, 100);
        let start = Instant::now();
        trip(&mut breaker, start);

        let (admission, transition) = breaker
            .try_acquire(start + Duration::from_millis(100))
            .unwrap();
        assert_eq!(admission, Admission::Trial);
        assert_eq!(transition.map(|t| t.to), Some(CircuitState::HalfOpen));
    }

    #[test]
    fn test_only_one_trial_at_a_time() {
        let mut breaker = breaker(1, 100);
        let start = Instant::now();
        trip(&mut breaker, start);
        let later = start + Duration::from_millis(150);

        assert!(breaker.try_acquire(later).is_ok());
        let second = breaker.try_acquire(later).unwrap_err();
        assert_eq!(second.remaining, Duration::ZERO);
    }

    #[test]
    fn test_trial_success_closes() {
        let mut breaker = breaker(2, 100);
        let start = Instant::now();
        trip(&mut breaker, start);
        let (admission, _) = breaker
            .try_acquire(start + Duration::from_millis(100))
            .unwrap();

        let transition = breaker.on_success(admission);
        assert_eq!(transition.map(|t| t.to), Some(CircuitState::Closed));
        assert_eq!(breaker.failure_count(), 0);
    }

    #[test]
    fn test_trial_failure_reopens_with_fresh_window() {
        let mut breaker = breaker(2, 100);
        let start = Instant::now();
        trip(&mut breaker, start);
        let trial_at = start + Duration::from_millis(120);
        let (admission, _) = breaker.try_acquire(trial_at).unwrap();

        let failed_at = trial_at + Duration::from_millis(30);
        let transition = breaker.on_failure(admission, failed_at);
        assert_eq!(transition.map(|t| t.to), Some(CircuitState::Open));

        let rejected = breaker
            .try_acquire(failed_at + Duration::from_millis(10))
            .unwrap_err();
        assert_eq!(rejected.remaining, Duration::from_millis(90));
    }

    #[test]
    fn test_straggler_success_does_not_close_half_open() {
        let mut breaker = breaker(1, 100);
        let start = Instant::now();
        trip(&mut breaker, start);
        breaker
            .try_acquire(start + Duration::from_millis(100))
            .unwrap();

        assert!(breaker.on_success(Admission::Pass).is_none());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_abandon_trial_returns_to_open() {
        let mut breaker = breaker(1, 100);
        let start = Instant::now();
        trip(&mut breaker, start);
        let later = start + Duration::from_millis(100);
        breaker.try_acquire(later).unwrap();

        assert_eq!(
            breaker.abandon_trial().map(|t| t.to),
            Some(CircuitState::Open)
        );
        let (admission, _) = breaker.try_acquire(later).unwrap();
        assert_eq!(admission, Admission::Trial);
    }

    #[test]
    fn test_manual_reset() {
        let mut breaker = breaker(2, 60_000);
        let now = Instant::now();
        trip(&mut breaker, now);
        assert_eq!(breaker.state(), CircuitState::Open);

        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
        assert!(breaker.try_acquire(now).is_ok());
    }

    #[test]
    fn test_circuit_state_display() {
        assert_eq!(CircuitState::Closed.to_string(), "closed");
        assert_eq!(CircuitState::Open.to_string(), "open");
        assert_eq!(CircuitState::HalfOpen.to_string(), "half-open");
    }
}
