//! Circuit breaker for the indexer connection.
//!
//! Closed → Open after `fail_threshold` consecutive failures; Open →
//! HalfOpen after the open window elapses; HalfOpen admits a bounded
//! number of probes and closes again after that many consecutive
//! successes (any failure re-opens).
//!
//! Pure state + injected clock so the transitions are unit-testable
//! without sleeping.

use chrono::{DateTime, Duration, Utc};

use oms_config::CircuitBreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    cfg: CircuitBreakerConfig,
    state: BreakerState,
    consecutive_failures: u32,
    half_open_successes: u32,
    opened_at: Option<DateTime<Utc>>,
}

impl CircuitBreaker {
    pub fn new(cfg: CircuitBreakerConfig) -> Self {
        Self {
            cfg,
            state: BreakerState::Closed,
            consecutive_failures: 0,
            half_open_successes: 0,
            opened_at: None,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    /// May a call proceed right now? Transitions Open → HalfOpen when the
    /// open window has elapsed.
    pub fn allow(&mut self, now: DateTime<Utc>) -> bool {
        match self.state {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let opened = self.opened_at.unwrap_or(now);
                if now - opened >= Duration::milliseconds(self.cfg.open_ms) {
                    self.state = BreakerState::HalfOpen;
                    self.half_open_successes = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&mut self) {
        match self.state {
            BreakerState::Closed => {
                self.consecutive_failures = 0;
            }
            BreakerState::HalfOpen => {
                self.half_open_successes += 1;
                if self.half_open_successes >= self.cfg.half_open_probes {
                    self.state = BreakerState::Closed;
                    self.consecutive_failures = 0;
                }
            }
            BreakerState::Open => {}
        }
    }

    pub fn record_failure(&mut self, now: DateTime<Utc>) {
        match self.state {
            BreakerState::Closed => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.cfg.fail_threshold {
                    self.state = BreakerState::Open;
                    self.opened_at = Some(now);
                }
            }
            BreakerState::HalfOpen => {
                self.state = BreakerState::Open;
                self.opened_at = Some(now);
                self.half_open_successes = 0;
            }
            BreakerState::Open => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            fail_threshold: 5,
            open_ms: 60_000,
            half_open_probes: 3,
        }
    }

    #[test]
    fn opens_after_threshold_failures() {
        let mut b = CircuitBreaker::new(cfg());
        let now = Utc::now();
        for _ in 0..4 {
            b.record_failure(now);
            assert_eq!(b.state(), BreakerState::Closed);
        }
        b.record_failure(now);
        assert_eq!(b.state(), BreakerState::Open);
        assert!(!b.allow(now));
    }

    #[test]
    fn half_open_after_window_then_closes_on_probes() {
        let mut b = CircuitBreaker::new(cfg());
        let t0 = Utc::now();
        for _ in 0..5 {
            b.record_failure(t0);
        }
        let t1 = t0 + Duration::milliseconds(60_001);
        assert!(b.allow(t1));
        assert_eq!(b.state(), BreakerState::HalfOpen);

        b.record_success();
        b.record_success();
        assert_eq!(b.state(), BreakerState::HalfOpen);
        b.record_success();
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let mut b = CircuitBreaker::new(cfg());
        let t0 = Utc::now();
        for _ in 0..5 {
            b.record_failure(t0);
        }
        let t1 = t0 + Duration::milliseconds(60_001);
        assert!(b.allow(t1));
        b.record_failure(t1);
        assert_eq!(b.state(), BreakerState::Open);
        assert!(!b.allow(t1 + Duration::milliseconds(1)));
    }

    #[test]
    fn success_resets_the_failure_streak() {
        let mut b = CircuitBreaker::new(cfg());
        let now = Utc::now();
        for _ in 0..4 {
            b.record_failure(now);
        }
        b.record_success();
        for _ in 0..4 {
            b.record_failure(now);
        }
        assert_eq!(b.state(), BreakerState::Closed);
    }
}
