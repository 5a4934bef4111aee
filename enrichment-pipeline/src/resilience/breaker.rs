use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use common::{error::AppError, metrics};
use dashmap::DashMap;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Per-downstream circuit breaker. Opens after a run of consecutive
/// failures, lets a single probe through after the recovery timeout, and
/// closes again on the first success.
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            failure_threshold,
            recovery_timeout,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        // A poisoned lock means a panic mid-transition; the breaker state is
        // still coherent enough to read.
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Gate before a downstream call. In OPEN the call is refused until the
    /// recovery timeout elapses, at which point one probe is admitted.
    pub fn check(&self) -> Result<(), AppError> {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => Ok(()),
            BreakerState::Open => {
                let elapsed = inner.opened_at.map_or(Duration::ZERO, |at| at.elapsed());
                if elapsed >= self.recovery_timeout {
                    inner.state = BreakerState::HalfOpen;
                    metrics::CIRCUIT_TRANSITIONS
                        .with_label_values(&[self.name.as_str(), "half_open"])
                        .inc();
                    info!(downstream = %self.name, "circuit half-open; admitting probe");
                    Ok(())
                } else {
                    Err(AppError::CircuitOpen(self.name.clone()))
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state != BreakerState::Closed {
            metrics::CIRCUIT_TRANSITIONS
                .with_label_values(&[self.name.as_str(), "closed"])
                .inc();
            info!(downstream = %self.name, "circuit closed");
        }
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        let should_open = match inner.state {
            BreakerState::HalfOpen => true,
            BreakerState::Closed => inner.consecutive_failures >= self.failure_threshold,
            BreakerState::Open => false,
        };
        if should_open {
            inner.state = BreakerState::Open;
            inner.opened_at = Some(Instant::now());
            metrics::CIRCUIT_TRANSITIONS
                .with_label_values(&[self.name.as_str(), "open"])
                .inc();
            warn!(
                downstream = %self.name,
                failures = inner.consecutive_failures,
                "circuit opened"
            );
        }
    }

    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    pub fn is_healthy(&self) -> bool {
        self.state() != BreakerState::Open
    }
}

/// Breakers for every downstream, created on first use with shared
/// thresholds from configuration.
#[derive(Clone)]
pub struct BreakerRegistry {
    breakers: Arc<DashMap<String, Arc<CircuitBreaker>>>,
    failure_threshold: u32,
    recovery_timeout: Duration,
}

impl BreakerRegistry {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            breakers: Arc::new(DashMap::new()),
            failure_threshold,
            recovery_timeout,
        }
    }

    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    name,
                    self.failure_threshold,
                    self.recovery_timeout,
                ))
            })
            .clone()
    }

    pub fn snapshot(&self) -> BTreeMap<String, bool> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().is_healthy()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let breaker = CircuitBreaker::new("intelligence", 5, Duration::from_secs(60));
        for _ in 0..4 {
            breaker.record_failure();
            assert_eq!(breaker.state(), BreakerState::Closed);
        }
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(matches!(
            breaker.check(),
            Err(AppError::CircuitOpen(name)) if name == "intelligence"
        ));
    }

    #[test]
    fn success_resets_the_failure_run() {
        let breaker = CircuitBreaker::new("graph", 3, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn recovers_through_half_open_probe() {
        let breaker = CircuitBreaker::new("vector", 1, Duration::from_millis(0));
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);

        // Recovery timeout elapsed; probe admitted.
        breaker.check().expect("probe admitted");
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn failed_probe_reopens() {
        let breaker = CircuitBreaker::new("embedding", 1, Duration::from_millis(0));
        breaker.record_failure();
        breaker.check().expect("probe admitted");
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn registry_shares_breakers_by_name() {
        let registry = BreakerRegistry::new(2, Duration::from_secs(60));
        let a = registry.get("intelligence");
        let b = registry.get("intelligence");
        a.record_failure();
        a.record_failure();
        assert_eq!(b.state(), BreakerState::Open);
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.get("intelligence"), Some(&false));
    }
}
