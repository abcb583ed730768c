//! Lifetime prediction budget.
//!
//! Every prediction attempt spends one unit, including attempts that later
//! fail validation. The budget never refills; a restart is the only reset.

use std::sync::atomic::{AtomicI64, Ordering};

use tracing::{debug, error, info};

use crate::config::ServerConfig;
use crate::error::ServerError;

/// Process-wide counter of remaining prediction calls
#[derive(Debug)]
pub struct PredictionBudget {
    remaining: AtomicI64,
    total: i64,
}

impl PredictionBudget {
    /// A negative `total` behaves like zero: every call is rejected.
    pub fn new(total: i64) -> Self {
        info!(total, "Prediction budget initialized");
        let remaining = total.max(0);
        crate::metrics::set_budget_remaining(remaining);
        Self {
            remaining: AtomicI64::new(remaining),
            total,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.prediction_budget())
    }

    /// Spends one unit of the budget.
    ///
    /// Returns the remaining count, or `RateExceeded` once the counter has
    /// gone negative. The decrement and the check observe the same value, so
    /// concurrent callers can never overshoot the total.
    pub fn consume(&self) -> Result<i64, ServerError> {
        let remaining = self.remaining.fetch_sub(1, Ordering::AcqRel).saturating_sub(1);
        debug!(remaining, "Number of remaining prediction requests");

        if remaining < 0 {
            error!(remaining, "Maximal number of prediction requests exceeded");
            crate::metrics::record_rate_limit_hit();
            return Err(ServerError::RateExceeded { remaining });
        }

        crate::metrics::set_budget_remaining(remaining);
        Ok(remaining)
    }

    /// Remaining calls, never below zero.
    pub fn remaining(&self) -> i64 {
        self.remaining.load(Ordering::Acquire).max(0)
    }

    pub const fn total(&self) -> i64 {
        self.total
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_budget_depletes() {
        let budget = PredictionBudget::new(3);

        assert_eq!(budget.consume().unwrap(), 2);
        assert_eq!(budget.consume().unwrap(), 1);
        assert_eq!(budget.consume().unwrap(), 0);
        assert!(budget.is_exhausted());

        // 4th should fail
        assert!(matches!(
            budget.consume(),
            Err(ServerError::RateExceeded { remaining: -1 })
        ));
    }

    #[test]
    fn test_budget_never_replenishes() {
        let budget = PredictionBudget::new(1);
        assert!(budget.consume().is_ok());

        for _ in 0..10 {
            assert!(budget.consume().is_err());
        }
        assert_eq!(budget.remaining(), 0);
        assert_eq!(budget.total(), 1);
    }

    #[test]
    fn test_zero_budget_rejects_first_call() {
        let budget = PredictionBudget::new(0);
        assert!(budget.consume().is_err());
    }

    #[test]
    fn test_negative_budget_rejects_every_call() {
        let budget = PredictionBudget::new(-3_000);
        for _ in 0..3 {
            assert!(matches!(
                budget.consume(),
                Err(ServerError::RateExceeded { .. })
            ));
        }
        assert!(budget.is_exhausted());
        assert_eq!(budget.total(), -3_000);

        let budget = PredictionBudget::new(i64::MIN);
        assert!(budget.consume().is_err());
        assert!(budget.consume().is_err());
    }

    #[test]
    fn test_concurrent_consumers_never_overshoot() {
        const TOTAL: i64 = 500;
        const THREADS: usize = 16;
        const ATTEMPTS_PER_THREAD: usize = 100;

        let budget = PredictionBudget::new(TOTAL);
        let successes = AtomicUsize::new(0);
        let failures = AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for _ in 0..THREADS {
                scope.spawn(|| {
                    for _ in 0..ATTEMPTS_PER_THREAD {
                        match budget.consume() {
                            Ok(_) => successes.fetch_add(1, Ordering::Relaxed),
                            Err(_) => failures.fetch_add(1, Ordering::Relaxed),
                        };
                    }
                });
            }
        });

        assert_eq!(successes.load(Ordering::Relaxed), TOTAL as usize);
        assert_eq!(
            failures.load(Ordering::Relaxed),
            THREADS * ATTEMPTS_PER_THREAD - TOTAL as usize
        );
        assert!(budget.is_exhausted());
    }
}
