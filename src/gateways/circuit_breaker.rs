//! Circuit breaker guarding flaky upstream gateways
//!
//! Keyed by upstream (e.g. the translation target language), so one failing
//! pair does not stop the others.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Circuit state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    /// Cool-down elapsed; one probe request is let through
    HalfOpen,
}

#[derive(Debug, Clone)]
struct Circuit {
    state: BreakerState,
    consecutive_failures: usize,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

impl Circuit {
    fn closed() -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            probe_in_flight: false,
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: usize,
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

pub struct CircuitBreaker {
    circuits: Mutex<HashMap<String, Circuit>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            circuits: Mutex::new(HashMap::new()),
            config,
        }
    }

    fn circuits(&self) -> MutexGuard<'_, HashMap<String, Circuit>> {
        self.circuits.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether a request for `key` may go upstream now
    pub fn allow(&self, key: &str) -> bool {
        let mut circuits = self.circuits();
        let circuit = circuits.entry(key.to_string()).or_insert_with(Circuit::closed);

        match circuit.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let cooled = circuit
                    .opened_at
                    .map(|at| at.elapsed() >= self.config.reset_timeout)
                    .unwrap_or(true);
                if cooled {
                    circuit.state = BreakerState::HalfOpen;
                    circuit.probe_in_flight = true;
                }
                cooled
            }
            BreakerState::HalfOpen => {
                if circuit.probe_in_flight {
                    false
                } else {
                    circuit.probe_in_flight = true;
                    true
                }
            }
        }
    }

    pub fn mark_success(&self, key: &str) {
        self.circuits().insert(key.to_string(), Circuit::closed());
    }

    pub fn mark_failure(&self, key: &str) {
        let mut circuits = self.circuits();
        let circuit = circuits.entry(key.to_string()).or_insert_with(Circuit::closed);

        circuit.consecutive_failures += 1;
        circuit.probe_in_flight = false;

        // A failed probe reopens immediately
        if circuit.state == BreakerState::HalfOpen
            || circuit.consecutive_failures >= self.config.failure_threshold
        {
            circuit.state = BreakerState::Open;
            circuit.opened_at = Some(Instant::now());
        }
    }

    pub fn state(&self, key: &str) -> BreakerState {
        self.circuits()
            .get(key)
            .map(|c| c.state)
            .unwrap_or(BreakerState::Closed)
    }

    pub fn failures(&self, key: &str) -> usize {
        self.circuits()
            .get(key)
            .map(|c| c.consecutive_failures)
            .unwrap_or(0)
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: usize, reset: Duration) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            reset_timeout: reset,
        })
    }

    #[test]
    fn test_closed_by_default() {
        let breaker = CircuitBreaker::default();
        assert!(breaker.allow("ru"));
        assert_eq!(breaker.state("ru"), BreakerState::Closed);
    }

    #[test]
    fn test_opens_after_threshold() {
        let breaker = breaker(3, Duration::from_secs(30));

        breaker.mark_failure("ru");
        breaker.mark_failure("ru");
        assert!(breaker.allow("ru"));

        breaker.mark_failure("ru");
        assert!(!breaker.allow("ru"));
        assert_eq!(breaker.state("ru"), BreakerState::Open);
        assert!(breaker.allow("de"));
    }

    #[test]
    fn test_success_resets() {
        let breaker = breaker(3, Duration::from_secs(30));
        breaker.mark_failure("ru");
        breaker.mark_failure("ru");
        breaker.mark_success("ru");

        assert_eq!(breaker.failures("ru"), 0);
        assert_eq!(breaker.state("ru"), BreakerState::Closed);
    }

    #[test]
    fn test_half_open_allows_single_probe() {
        let breaker = breaker(1, Duration::from_millis(50));
        breaker.mark_failure("ru");
        assert!(!breaker.allow("ru"));

        std::thread::sleep(Duration::from_millis(80));

        assert!(breaker.allow("ru"));
        assert_eq!(breaker.state("ru"), BreakerState::HalfOpen);
        assert!(!breaker.allow("ru"));

        breaker.mark_failure("ru");
        assert_eq!(breaker.state("ru"), BreakerState::Open);
    }
}
