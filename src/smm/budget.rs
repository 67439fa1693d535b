//! Iteration, wall-clock and cancellation limits for long-running loops

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::StopReason;

/// Shared flag an external caller sets to stop the optimizer or bootstrap.
///
/// The running loop finishes its current objective evaluation and returns
/// the best result so far tagged `NotConverged { Cancelled }`.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct Budget {
    pub max_iterations: usize,
    deadline: Option<Instant>,
    cancel: CancelToken,
}

impl Budget {
    pub fn new(max_iterations: usize, max_seconds: Option<f64>, cancel: CancelToken) -> Self {
        let deadline = max_seconds.map(|s| Instant::now() + Duration::from_secs_f64(s));
        Self { max_iterations, deadline, cancel }
    }

    /// Same deadline and token, different iteration cap
    pub fn with_max_iterations(&self, max_iterations: usize) -> Self {
        Self { max_iterations, ..self.clone() }
    }

    /// Stop reason if `iterations` already done exhaust the budget.
    /// Cancellation takes precedence over the clock, the clock over the iteration cap.
    pub fn check(&self, iterations: usize) -> Option<StopReason> {
        if self.cancel.is_cancelled() {
            Some(StopReason::Cancelled)
        } else if self.deadline.is_some_and(|d| Instant::now() >= d) {
            Some(StopReason::WallClock)
        } else if iterations >= self.max_iterations {
            Some(StopReason::MaxIterations)
        } else {
            None
        }
    }

    /// Cancelled or out of time, ignoring the iteration cap
    pub fn interrupted(&self) -> Option<StopReason> {
        self.check(0).filter(|r| *r != StopReason::MaxIterations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iteration_cap() {
        let budget = Budget::new(3, None, CancelToken::new());
        assert_eq!(budget.check(2), None);
        assert_eq!(budget.check(3), Some(StopReason::MaxIterations));
    }

    #[test]
    fn test_cancel_is_shared_between_clones() {
        let token = CancelToken::new();
        let budget = Budget::new(100, None, token.clone());
        assert_eq!(budget.interrupted(), None);
        token.cancel();
        assert_eq!(budget.check(0), Some(StopReason::Cancelled));
        assert_eq!(budget.with_max_iterations(5).interrupted(), Some(StopReason::Cancelled));
    }

    #[test]
    fn test_expired_deadline() {
        let budget = Budget::new(100, Some(0.0), CancelToken::new());
        assert_eq!(budget.check(0), Some(StopReason::WallClock));
    }
}
