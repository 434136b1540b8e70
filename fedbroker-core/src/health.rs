//! Per-source circuit breaker.
//!
//! Sources that fail repeatedly are skipped for a cooldown period instead of
//! holding every federated query up to its deadline. After the cooldown one
//! probe query is let through; its outcome closes or re-opens the circuit.
//!
//! ```text
//! ┌────────┐  N failures   ┌────────┐  cooldown   ┌──────────┐
//! │ Closed ├──────────────►│  Open  ├────────────►│ HalfOpen │
//! └───▲────┘               └────────┘             └────┬─────┘
//!     │                         ▲                      │
//!     │  success                │  failure             │
//!     └─────────────────────────┴──────────────────────┘
//! ```

use std::collections::HashMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Circuit state for one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Healthy; queries are dispatched.
    Closed,
    /// Skipped until the cooldown expires.
    Open,
    /// Cooldown elapsed; the next query is a probe.
    HalfOpen,
}

/// Health tracking for a single source.
#[derive(Debug, Clone)]
pub struct SourceHealth {
    /// Current circuit state.
    pub state: CircuitState,
    /// Consecutive failures since the last success.
    pub consecutive_failures: u32,
    /// When the last failure happened.
    pub last_failure_at: Option<Instant>,
    /// When the last success happened.
    pub last_success_at: Option<Instant>,
}

impl Default for SourceHealth {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure_at: None,
            last_success_at: None,
        }
    }
}

/// Circuit breaker tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit. `0` disables the breaker.
    pub failure_threshold: u32,
    /// Seconds an open circuit waits before allowing a probe.
    pub cooldown_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown_secs: 60,
        }
    }
}

/// Tracks health per source id and decides whether to dispatch.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    sources: HashMap<String, SourceHealth>,
}

impl CircuitBreaker {
    /// Create a breaker with the given tuning.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            sources: HashMap::new(),
        }
    }

    fn enabled(&self) -> bool {
        self.config.failure_threshold > 0
    }

    /// Record a successful query; closes the circuit.
    pub fn record_success(&mut self, source_id: &str) {
        if !self.enabled() {
            return;
        }
        let health = self.sources.entry(source_id.to_owned()).or_default();
        health.state = CircuitState::Closed;
        health.consecutive_failures = 0;
        health.last_success_at = Some(Instant::now());
    }

    /// Record a failed, timed-out, or interrupted query.
    pub fn record_failure(&mut self, source_id: &str) {
        if !self.enabled() {
            return;
        }
        let health = self.sources.entry(source_id.to_owned()).or_default();
        health.consecutive_failures += 1;
        health.last_failure_at = Some(Instant::now());

        if health.state == CircuitState::HalfOpen
            || health.consecutive_failures >= self.config.failure_threshold
        {
            if health.state != CircuitState::Open {
                tracing::warn!(
                    source = %source_id,
                    failures = health.consecutive_failures,
                    "opening circuit for source"
                );
            }
            health.state = CircuitState::Open;
        }
    }

    /// Whether a query should be sent to `source_id` now.
    ///
    /// An open circuit whose cooldown has elapsed moves to half-open and
    /// allows the attempt.
    pub fn should_attempt(&mut self, source_id: &str) -> bool {
        if !self.enabled() {
            return true;
        }
        let cooldown_secs = self.config.cooldown_secs;
        let Some(health) = self.sources.get_mut(source_id) else {
            return true;
        };

        match health.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let cooldown_elapsed = health
                    .last_failure_at
                    .is_none_or(|t| t.elapsed().as_secs() >= cooldown_secs);
                if cooldown_elapsed {
                    tracing::debug!(source = %source_id, "circuit half-open, probing source");
                    health.state = CircuitState::HalfOpen;
                }
                cooldown_elapsed
            }
        }
    }

    /// Current state of one source; unknown sources are closed.
    pub fn source_status(&self, source_id: &str) -> CircuitState {
        self.sources
            .get(source_id)
            .map_or(CircuitState::Closed, |h| h.state)
    }

    /// `(source, state, consecutive_failures)` for every tracked source, sorted by id.
    pub fn health_report(&self) -> Vec<(String, CircuitState, u32)> {
        let mut report: Vec<_> = self
            .sources
            .iter()
            .map(|(id, health)| (id.clone(), health.state, health.consecutive_failures))
            .collect();
        report.sort_by(|a, b| a.0.cmp(&b.0));
        report
    }

    /// Forget all tracked health.
    pub fn reset(&mut self) {
        self.sources.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_breaker(threshold: u32, cooldown_secs: u64) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            cooldown_secs,
        })
    }

    #[test]
    fn initial_state_is_closed() {
        let mut breaker = make_breaker(3, 60);
        assert_eq!(breaker.source_status("alpha"), CircuitState::Closed);
        assert!(breaker.should_attempt("alpha"));
    }

    #[test]
    fn stays_closed_below_threshold() {
        let mut breaker = make_breaker(3, 60);
        breaker.record_failure("alpha");
        breaker.record_failure("alpha");
        assert_eq!(breaker.source_status("alpha"), CircuitState::Closed);
    }

    #[test]
    fn trips_to_open_at_threshold() {
        let mut breaker = make_breaker(3, 60);
        for _ in 0..3 {
            breaker.record_failure("alpha");
        }
        assert_eq!(breaker.source_status("alpha"), CircuitState::Open);
        assert!(!breaker.should_attempt("alpha"));
    }

    #[test]
    fn success_resets_failure_count() {
        let mut breaker = make_breaker(3, 60);
        breaker.record_failure("alpha");
        breaker.record_failure("alpha");
        breaker.record_success("alpha");
        breaker.record_failure("alpha");
        assert_eq!(breaker.source_status("alpha"), CircuitState::Closed);
    }

    #[test]
    fn open_transitions_to_half_open_after_cooldown() {
        let mut breaker = make_breaker(3, 0);
        for _ in 0..3 {
            breaker.record_failure("beta");
        }
        assert_eq!(breaker.source_status("beta"), CircuitState::Open);
        assert!(breaker.should_attempt("beta"));
        assert_eq!(breaker.source_status("beta"), CircuitState::HalfOpen);
    }

    #[test]
    fn half_open_success_restores_closed() {
        let mut breaker = make_breaker(3, 0);
        for _ in 0..3 {
            breaker.record_failure("beta");
        }
        let _ = breaker.should_attempt("beta");
        breaker.record_success("beta");
        assert_eq!(breaker.source_status("beta"), CircuitState::Closed);
    }

    #[test]
    fn half_open_failure_retrips_immediately() {
        let mut breaker = make_breaker(3, 0);
        for _ in 0..3 {
            breaker.record_failure("beta");
        }
        breaker.record_success("beta");
        for _ in 0..3 {
            breaker.record_failure("beta");
        }
        let _ = breaker.should_attempt("beta");
        breaker.record_failure("beta");
        assert_eq!(breaker.source_status("beta"), CircuitState::Open);
    }

    #[test]
    fn sources_are_independent() {
        let mut breaker = make_breaker(1, 600);
        breaker.record_failure("alpha");
        assert!(!breaker.should_attempt("alpha"));
        assert!(breaker.should_attempt("gamma"));
    }

    #[test]
    fn zero_threshold_disables_breaker() {
        let mut breaker = make_breaker(0, 600);
        for _ in 0..10 {
            breaker.record_failure("alpha");
        }
        assert!(breaker.should_attempt("alpha"));
        assert!(breaker.health_report().is_empty());
    }

    #[test]
    fn health_report_is_sorted() {
        let mut breaker = make_breaker(3, 60);
        breaker.record_failure("zeta");
        breaker.record_success("alpha");
        let report = breaker.health_report();
        assert_eq!(report[0], ("alpha".to_string(), CircuitState::Closed, 0));
        assert_eq!(report[1], ("zeta".to_string(), CircuitState::Closed, 1));
    }

    #[test]
    fn reset_clears_state() {
        let mut breaker = make_breaker(1, 600);
        breaker.record_failure("alpha");
        breaker.reset();
        assert_eq!(breaker.source_status("alpha"), CircuitState::Closed);
    }
}
