//! Informality Model - structural lifecycle model of formal/informal sector choice
//!
//! This library provides:
//! - State-space discretization (asset grid with kink nodes, Tauchen productivity chain)
//! - Sector income process and backward-induction Bellman solver
//! - Seeded forward simulation of a synthetic cohort
//! - Moment calculation shared by simulated and empirical panels
//! - Simulated method of moments with restarts, budgets and bootstrap standard errors
//! - Counterfactual experiments and welfare costs of consumption volatility

pub mod error;
pub mod params;
pub mod grid;
pub mod income;
pub mod solver;
pub mod panel;
pub mod simulator;
pub mod targets;
pub mod moments;
pub mod smm;
pub mod counterfactual;
pub mod report;

// Re-export commonly used types
pub use error::{ConvergenceStatus, MissingMomentError, ModelError, ModelResult, ModelWarning, StopReason};
pub use params::{Parameters, RunConfig, Sector, Theta};
pub use solver::{Model, Solution};
pub use simulator::{SimulatedPanel, Simulator};
pub use panel::Panel;
pub use targets::{MomentId, TargetSet};
pub use moments::{MomentCalculator, MomentVector};
pub use smm::{CancelToken, Estimate, SmmEstimator};
pub use counterfactual::{CounterfactualRunner, Experiment};
