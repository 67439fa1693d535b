//! Error and warning types for the structural model
//!
//! Fatal conditions (bad configuration, a reachable state with no feasible
//! control) are `ModelError`s and abort the run. Degraded outcomes (a moment
//! that cannot be computed, an optimizer that ran out of budget, restarts that
//! disagree) are values attached to results so calibration scripts can still
//! inspect partial output.

use serde::Serialize;
use thiserror::Error;

use crate::params::Sector;
use crate::targets::MomentId;

/// Result alias used across the crate
pub type ModelResult<T> = Result<T, ModelError>;

/// Fatal errors
#[derive(Debug, Error)]
pub enum ModelError {
    /// Invalid grid bounds, inconsistent borrowing limits, non-positive variances.
    /// Raised before any solve begins.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A reachable state has no feasible (sector, savings) choice
    #[error(
        "infeasible state at age {age}: assets={assets:.4}, log productivity={log_productivity:.4}, sector={sector:?}"
    )]
    InfeasibleState {
        age: usize,
        assets: f64,
        log_productivity: f64,
        sector: Sector,
    },

    /// Target moments or panel data violate the input schema
    #[error("schema error: {0}")]
    Schema(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ModelError {
    pub fn config(msg: impl Into<String>) -> Self {
        ModelError::Configuration(msg.into())
    }

    pub fn schema(msg: impl Into<String>) -> Self {
        ModelError::Schema(msg.into())
    }
}

/// A moment that could not be computed from a panel.
///
/// Stored in place of the moment value; the objective drops it for that
/// evaluation and counts the occurrence.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[error("moment {moment} missing: {reason}")]
pub struct MissingMomentError {
    pub moment: MomentId,
    pub reason: String,
}

impl MissingMomentError {
    pub fn new(moment: MomentId, reason: impl Into<String>) -> Self {
        Self { moment, reason: reason.into() }
    }
}

/// Outcome of an iterative procedure with an iteration or wall-clock budget
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ConvergenceStatus {
    Converged,
    /// Budget exhausted or cancelled; the attached result is the best found so far
    NotConverged { reason: StopReason },
}

impl ConvergenceStatus {
    pub fn is_converged(&self) -> bool {
        matches!(self, ConvergenceStatus::Converged)
    }
}

/// Why an iterative procedure stopped before meeting its tolerance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    MaxIterations,
    WallClock,
    Cancelled,
}

/// Non-fatal conditions surfaced alongside a result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ModelWarning {
    /// Optimizer restarts with near-best objective disagree on the parameters
    WeakIdentification {
        /// Largest normalized distance between near-best restart solutions
        spread: f64,
        tolerance: f64,
    },
    /// A moment was missing in one or more evaluations
    MissingMoments { moment: MomentId, occurrences: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infeasible_state_message() {
        let err = ModelError::InfeasibleState {
            age: 3,
            assets: -1.0,
            log_productivity: 0.0,
            sector: Sector::Informal,
        };
        let msg = err.to_string();
        assert!(msg.contains("age 3"));
        assert!(msg.contains("Informal"));
    }

    #[test]
    fn test_missing_moment_message() {
        let err = MissingMomentError::new(MomentId::WageRatio, "no informal observations");
        assert_eq!(err.to_string(), "moment wage_ratio missing: no informal observations");
    }

    #[test]
    fn test_convergence_status() {
        assert!(ConvergenceStatus::Converged.is_converged());
        let stopped = ConvergenceStatus::NotConverged { reason: StopReason::WallClock };
        assert!(!stopped.is_converged());
    }
}
