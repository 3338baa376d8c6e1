//! Capture circuit breaker.
//!
//! Closed: captures run and outcomes are counted.
//! Open: captures are skipped until the cooldown expires.
//! HalfOpen: one probe capture decides between Closed and Open again.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open { until: Instant },
    HalfOpen,
}

impl BreakerState {
    pub fn name(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open { .. } => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

/// Whether a capture may proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// Cooldown just ended; this capture is the probe.
    Probe,
    Rejected,
}

/// Outcome window snapshot.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct BreakerWindow {
    pub attempts: u32,
    pub failures: u32,
    pub failure_rate: f64,
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    threshold: f64,
    min_samples: u32,
    cooldown: Duration,
    state: BreakerState,
    attempts: u32,
    failures: u32,
}

impl CircuitBreaker {
    pub fn new(threshold: f64, min_samples: u32, cooldown: Duration) -> Self {
        Self {
            threshold,
            min_samples: min_samples.max(1),
            cooldown,
            state: BreakerState::Closed,
            attempts: 0,
            failures: 0,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn window(&self) -> BreakerWindow {
        BreakerWindow {
            attempts: self.attempts,
            failures: self.failures,
            failure_rate: self.failure_rate(),
        }
    }

    fn failure_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.failures as f64 / self.attempts as f64
        }
    }

    pub fn try_acquire(&mut self, now: Instant) -> Admission {
        match self.state {
            BreakerState::Closed => Admission::Allowed,
            BreakerState::HalfOpen => Admission::Allowed,
            BreakerState::Open { until } if now >= until => {
                self.state = BreakerState::HalfOpen;
                Admission::Probe
            }
            BreakerState::Open { .. } => Admission::Rejected,
        }
    }

    pub fn record_success(&mut self) {
        if self.state == BreakerState::HalfOpen {
            self.reset(BreakerState::Closed);
            return;
        }
        self.attempts = self.attempts.saturating_add(1);
    }

    /// Count a failure. Returns the window that opened the breaker, if it did.
    pub fn record_failure(&mut self, now: Instant) -> Option<BreakerWindow> {
        self.attempts = self.attempts.saturating_add(1);
        self.failures = self.failures.saturating_add(1);

        let trips = self.state == BreakerState::HalfOpen
            || (self.attempts >= self.min_samples && self.failure_rate() > self.threshold);
        if !trips {
            return None;
        }

        let window = self.window();
        self.reset(BreakerState::Open {
            until: now + self.cooldown,
        });
        Some(window)
    }

    fn reset(&mut self, state: BreakerState) {
        self.state = state;
        self.attempts = 0;
        self.failures = 0;
    }
}
