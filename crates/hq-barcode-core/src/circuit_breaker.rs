//! Circuit Breaker: per-method failure counting with a three-state
//! machine and time-based recovery.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const FAILURE_THRESHOLD: u32 = 3;
const RECOVERY_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct MethodState {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
}

impl MethodState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure: None,
        }
    }
}

/// A single method's breaker, guarded by one lock.
pub struct CircuitBreaker {
    inner: Mutex<MethodState>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MethodState::new()),
        }
    }

    /// Queries the current state, performing the time-based open→half-open
    /// transition first. Returns `true` if the circuit is open (calls should
    /// be skipped).
    pub fn is_open(&self) -> bool {
        let mut st = self.inner.lock().expect("lock poisoned");
        if st.state == CircuitState::Open {
            if let Some(last) = st.last_failure {
                if last.elapsed() >= RECOVERY_TIMEOUT {
                    st.state = CircuitState::HalfOpen;
                }
            }
        }
        st.state == CircuitState::Open
    }

    pub fn state(&self) -> CircuitState {
        let st = self.inner.lock().expect("lock poisoned");
        st.state
    }

    /// Any state transitions to `closed` with the counter reset.
    pub fn record_success(&self) {
        let mut st = self.inner.lock().expect("lock poisoned");
        st.state = CircuitState::Closed;
        st.failure_count = 0;
        st.last_failure = None;
    }

    /// `closed` moves to `open` once `failure_count >= threshold`;
    /// `half_open` moves straight back to `open` and resets the recovery
    /// timer.
    pub fn record_failure(&self) {
        let mut st = self.inner.lock().expect("lock poisoned");
        st.failure_count += 1;
        st.last_failure = Some(Instant::now());
        match st.state {
            CircuitState::HalfOpen => st.state = CircuitState::Open,
            CircuitState::Closed if st.failure_count >= FAILURE_THRESHOLD => {
                st.state = CircuitState::Open;
            }
            _ => {}
        }
    }

    pub fn reset(&self) {
        let mut st = self.inner.lock().expect("lock poisoned");
        *st = MethodState::new();
    }
}

/// Per-method registry used by the Retrieval Orchestrator: one
/// breaker per retrieval method, reset at each batch boundary.
pub struct CircuitBreakerRegistry {
    breakers: Mutex<HashMap<String, std::sync::Arc<CircuitBreaker>>>,
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self {
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, method: &str) -> std::sync::Arc<CircuitBreaker> {
        let mut map = self.breakers.lock().expect("lock poisoned");
        map.entry(method.to_string())
            .or_insert_with(|| std::sync::Arc::new(CircuitBreaker::new()))
            .clone()
    }

    pub fn should_try(&self, method: &str) -> bool {
        !self.get(method).is_open()
    }

    /// Called by the Scheduler at the start of each batch.
    pub fn reset_all(&self) {
        let map = self.breakers.lock().expect("lock poisoned");
        for breaker in map.values() {
            breaker.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let cb = CircuitBreaker::new();
        assert!(!cb.is_open());
        cb.record_failure();
        cb.record_failure();
        assert!(!cb.is_open());
        cb.record_failure();
        assert!(cb.is_open());
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn success_resets_from_any_state() {
        let cb = CircuitBreaker::new();
        cb.record_failure();
        cb.record_failure();
        cb.record_failure();
        assert!(cb.is_open());
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(!cb.is_open());
    }

    #[test]
    fn half_open_failure_reopens_and_resets_timer() {
        let cb = CircuitBreaker::new();
        cb.record_failure();
        cb.record_failure();
        cb.record_failure();
        {
            let mut st = cb.inner.lock().unwrap();
            st.state = CircuitState::HalfOpen;
        }
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn registry_tracks_independent_breakers_per_method() {
        let reg = CircuitBreakerRegistry::new();
        for _ in 0..3 {
            reg.get("api").record_failure();
        }
        assert!(!reg.should_try("api"));
        assert!(reg.should_try("primary_web"));
        reg.reset_all();
        assert!(reg.should_try("api"));
    }
}
