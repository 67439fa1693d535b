//! Bootstrap standard errors for the SMM estimate
//!
//! Each replication resamples persons from the empirical panel, recomputes
//! the target moments with the same calculator, and re-runs the search from
//! the point estimate. Replications run one after another; each owns its
//! solve, simulation and objective state.

use log::{info, warn};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

use super::budget::Budget;
use super::{Estimate, SmmEstimator};
use crate::error::{ConvergenceStatus, ModelResult, StopReason};
use crate::moments::MomentCalculator;
use crate::panel::Panel;
use crate::params::Theta;
use crate::targets::TargetSet;

/// RNG stream for resampling; stream 0 draws restart points
const RESAMPLE_STREAM: u64 = 1;

#[derive(Debug, Clone)]
pub struct BootstrapResult {
    /// Theta estimated on each completed replication
    pub replications: Vec<Theta>,
    /// Sample standard deviation across replications; None with fewer than two
    pub std_errors: Option<Theta>,
    pub status: ConvergenceStatus,
    /// Empirical moments that could not be computed in some draw, summed over draws
    pub dropped_targets: usize,
}

impl<'a> SmmEstimator<'a> {
    /// Calculator for the empirical panel. Without observed credit flags, credit
    /// access uses the asset proxy at the estimated borrowing limits.
    pub fn empirical_calculator(&self, estimate: &Estimate) -> MomentCalculator {
        MomentCalculator::with_borrowing_limits(self.config.moments.clone(), &estimate.params)
    }

    /// Run `bootstrap_replications` replications around `estimate`
    pub fn bootstrap(
        &self,
        panel: &Panel,
        calculator: &MomentCalculator,
        targets: &TargetSet,
        estimate: &Estimate,
    ) -> ModelResult<BootstrapResult> {
        let est = &self.config.estimation;
        let replications_wanted = est.bootstrap_replications;
        let budget = Budget::new(replications_wanted, est.max_seconds, self.cancel.clone());
        let inner = budget.with_max_iterations(est.max_iterations);

        let mut rng = ChaCha20Rng::seed_from_u64(est.seed);
        rng.set_stream(RESAMPLE_STREAM);

        let mut replications = Vec::with_capacity(replications_wanted);
        let mut dropped_targets = 0;
        let mut status = ConvergenceStatus::Converged;

        for b in 0..replications_wanted {
            if let Some(reason) = budget.interrupted() {
                status = ConvergenceStatus::NotConverged { reason };
                break;
            }

            let draw = panel.resample(&mut rng);
            let moments = calculator.compute(&draw);
            for missing in moments.missing() {
                if targets.get(missing.moment).is_some() {
                    warn!("bootstrap draw {}: {}", b + 1, missing);
                    dropped_targets += 1;
                }
            }
            let draw_targets = targets.with_estimates(&moments.estimates());
            if draw_targets.is_empty() {
                warn!("bootstrap draw {}: no targets could be computed, skipping", b + 1);
                continue;
            }

            let outcome = self.search(&draw_targets, &[estimate.theta], &inner)?;
            let replicate = &outcome.restarts[outcome.best];
            if let ConvergenceStatus::NotConverged { reason } = outcome.status {
                if reason != StopReason::MaxIterations {
                    status = ConvergenceStatus::NotConverged { reason };
                    break;
                }
            }
            info!("bootstrap replication {}/{}: Q={:.6e}", b + 1, replications_wanted, replicate.q);
            replications.push(replicate.theta);
        }

        Ok(BootstrapResult {
            std_errors: std_errors(&replications),
            replications,
            status,
            dropped_targets,
        })
    }
}

fn std_errors(replications: &[Theta]) -> Option<Theta> {
    let n = replications.len();
    if n < 2 {
        return None;
    }
    let xs: Vec<[f64; Theta::DIM]> = replications.iter().map(Theta::to_array).collect();
    let sd: [f64; Theta::DIM] = std::array::from_fn(|i| {
        let mean = xs.iter().map(|x| x[i]).sum::<f64>() / n as f64;
        let ss = xs.iter().map(|x| (x[i] - mean).powi(2)).sum::<f64>();
        (ss / (n - 1) as f64).sqrt()
    });
    Some(Theta::from_array(&sd))
}
