//! Consecutive-failure circuit breaker.

use std::time::{Duration, Instant};

use tracing::{info, warn};

/// Breaker position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Calls go through; failures are counted.
    Closed,
    /// Calls are refused until the cool-down elapses.
    Open,
    /// One trial call is allowed; its outcome closes or re-opens the breaker.
    HalfOpen,
}

/// Tracks failures of a dependency and decides whether the next call may go out.
///
/// Not internally synchronized: the owner keeps it behind its own lock so a
/// failure count and the transition it triggers are one atomic step.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    failure_threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            failure_threshold: failure_threshold.max(1),
            cooldown,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn opened_at(&self) -> Option<Instant> {
        self.opened_at
    }

    /// Whether a call may be attempted at `now`.
    ///
    /// An open breaker whose cool-down has elapsed moves to half-open and
    /// admits exactly this one call. A trial that never reports back (its
    /// caller was cancelled) is abandoned after another cool-down, and the
    /// next call becomes the new trial.
    pub fn allow_request(&mut self, now: Instant) -> bool {
        match self.state {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => {
                if self.cooled_down(now) {
                    warn!("Trial call never completed, allowing another");
                    self.opened_at = Some(now);
                    true
                } else {
                    false
                }
            }
            BreakerState::Open => {
                if self.cooled_down(now) {
                    info!("Circuit breaker half-open, allowing trial call");
                    self.state = BreakerState::HalfOpen;
                    self.opened_at = Some(now);
                    true
                } else {
                    false
                }
            }
        }
    }

    fn cooled_down(&self, now: Instant) -> bool {
        self.opened_at
            .map(|at| now.saturating_duration_since(at))
            .unwrap_or(Duration::MAX)
            >= self.cooldown
    }

    pub fn record_success(&mut self) {
        if self.state != BreakerState::Closed {
            info!("Circuit breaker closed");
        }
        self.state = BreakerState::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
    }

    pub fn record_failure(&mut self, now: Instant) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        match self.state {
            BreakerState::HalfOpen => {
                warn!("Trial call failed, circuit breaker re-opened");
                self.trip(now);
            }
            BreakerState::Closed if self.consecutive_failures >= self.failure_threshold => {
                warn!(
                    "Circuit breaker opened after {} consecutive failures",
                    self.consecutive_failures
                );
                self.trip(now);
            }
            _ => {}
        }
    }

    fn trip(&mut self, now: Instant) {
        self.state = BreakerState::Open;
        self.opened_at = Some(now);
    }
}
