//! Simulated method of moments
//!
//! The estimated block `Theta = (b_formal, b_informal, kappa, sigma_pref)` is
//! searched with Nelder-Mead from several starting points inside the bounds.
//! Standard errors come from a bootstrap over persons in the empirical panel.

mod bootstrap;
mod budget;
mod nelder_mead;
mod objective;

pub use bootstrap::BootstrapResult;
pub use budget::{Budget, CancelToken};
pub use nelder_mead::{minimize, NelderMeadOptions, NelderMeadResult};
pub use objective::{Evaluation, MomentFit, SmmObjective};

use log::{info, warn};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::error::{ConvergenceStatus, ModelError, ModelResult, ModelWarning, StopReason};
use crate::params::{Parameters, RunConfig, Theta};
use crate::targets::TargetSet;

/// Draws attempted for a random starting point before giving up
const MAX_START_DRAWS: usize = 1000;

/// Outcome of one simplex run
#[derive(Debug, Clone)]
pub struct RestartOutcome {
    pub start: Theta,
    pub theta: Theta,
    pub q: f64,
    pub iterations: usize,
    pub status: ConvergenceStatus,
}

/// Point estimate with diagnostics
#[derive(Debug, Clone)]
pub struct Estimate {
    /// Base calibration with the estimated block substituted
    pub params: Parameters,
    pub theta: Theta,
    pub q: f64,
    pub status: ConvergenceStatus,
    pub restarts: Vec<RestartOutcome>,
    pub warnings: Vec<ModelWarning>,
    /// Target vs simulated moments at the estimate
    pub fit: Vec<MomentFit>,
    pub evaluations: usize,
}

/// Restarts of one search, before the fit table is attached
struct SearchOutcome {
    restarts: Vec<RestartOutcome>,
    best: usize,
    status: ConvergenceStatus,
    warnings: Vec<ModelWarning>,
    evaluations: usize,
}

pub struct SmmEstimator<'a> {
    config: &'a RunConfig,
    cancel: CancelToken,
}

impl<'a> SmmEstimator<'a> {
    pub fn new(config: &'a RunConfig) -> Self {
        Self { config, cancel: CancelToken::new() }
    }

    /// Use a token the caller can trigger from another thread
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Estimate theta from the configured start plus random restarts
    pub fn estimate(&self, targets: &TargetSet) -> ModelResult<Estimate> {
        let est = &self.config.estimation;
        let mut rng = ChaCha20Rng::seed_from_u64(est.seed);
        let starts = self.starting_points(&mut rng)?;
        let budget = Budget::new(est.max_iterations, est.max_seconds, self.cancel.clone());

        let outcome = self.search(targets, &starts, &budget)?;
        let theta = outcome.restarts[outcome.best].theta;
        let q = outcome.restarts[outcome.best].q;

        let mut objective = self.objective(targets);
        let fit = objective.evaluate(&theta)?.fit;

        info!(
            "estimate: b_formal={:.4} b_informal={:.4} kappa={:.4} sigma_pref={:.4} Q={:.6e} ({:?})",
            theta.b_formal, theta.b_informal, theta.kappa, theta.sigma_pref, q, outcome.status
        );
        Ok(Estimate {
            params: self.config.parameters.with_theta(&theta),
            theta,
            q,
            status: outcome.status,
            restarts: outcome.restarts,
            warnings: outcome.warnings,
            fit,
            evaluations: outcome.evaluations + objective.evaluations(),
        })
    }

    fn objective<'t>(&'t self, targets: &'t TargetSet) -> SmmObjective<'t> {
        SmmObjective::new(
            &self.config.parameters,
            &self.config.grid,
            &self.config.simulation,
            &self.config.moments,
            &self.config.bounds,
            targets,
        )
    }

    /// Run one simplex search per starting point, sequentially
    fn search(&self, targets: &TargetSet, starts: &[Theta], budget: &Budget) -> ModelResult<SearchOutcome> {
        let est = &self.config.estimation;
        let bounds = &self.config.bounds;
        let width = bounds.width();
        let options = NelderMeadOptions {
            f_tolerance: est.f_tolerance,
            x_tolerance: width.map(|w| w * est.x_tolerance),
            initial_step: width.map(|w| w * est.initial_step),
        };

        let mut objective = self.objective(targets);
        let mut restarts: Vec<RestartOutcome> = Vec::with_capacity(starts.len());
        let mut interrupted = None;

        for (k, start) in starts.iter().enumerate() {
            if k > 0 {
                if let Some(reason) = budget.interrupted() {
                    interrupted = Some(reason);
                    break;
                }
            }
            let result = minimize(
                |x: &[f64; Theta::DIM]| objective.value(&Theta::from_array(x)),
                start.to_array(),
                bounds.lower.to_array(),
                bounds.upper.to_array(),
                &options,
                budget,
            )?;
            info!(
                "restart {}/{}: Q={:.6e} after {} iterations ({:?})",
                k + 1,
                starts.len(),
                result.f,
                result.iterations,
                result.status
            );
            if let ConvergenceStatus::NotConverged { reason } = &result.status {
                if *reason != StopReason::MaxIterations {
                    interrupted = Some(*reason);
                }
            }
            restarts.push(RestartOutcome {
                start: *start,
                theta: Theta::from_array(&result.x),
                q: result.f,
                iterations: result.iterations,
                status: result.status,
            });
            if interrupted.is_some() {
                break;
            }
        }

        let best = restarts
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.q.total_cmp(&b.1.q))
            .map(|(i, _)| i)
            .ok_or_else(|| ModelError::config("no optimizer restarts were run"))?;

        let status = match interrupted {
            Some(reason) => ConvergenceStatus::NotConverged { reason },
            None => restarts[best].status.clone(),
        };

        let mut warnings = Vec::new();
        let spread = identification_spread(&restarts, best, &width, est.near_best_gap, est.f_tolerance);
        if spread > est.identification_tolerance {
            warn!(
                "weak identification: near-best restarts differ by {:.4} (tolerance {:.4})",
                spread, est.identification_tolerance
            );
            warnings.push(ModelWarning::WeakIdentification { spread, tolerance: est.identification_tolerance });
        }
        for (&moment, &occurrences) in objective.missing_counts() {
            warn!("moment {} missing in {} of {} evaluations", moment, occurrences, objective.evaluations());
            warnings.push(ModelWarning::MissingMoments { moment, occurrences });
        }

        Ok(SearchOutcome { restarts, best, status, warnings, evaluations: objective.evaluations() })
    }

    /// Configured parameters first, then uniform draws inside the admissible region
    fn starting_points<R: Rng + ?Sized>(&self, rng: &mut R) -> ModelResult<Vec<Theta>> {
        let bounds = &self.config.bounds;
        let first = Theta::from_array(&bounds.clamp(&self.config.parameters.theta().to_array()));
        if !bounds.admits(&first) {
            return Err(ModelError::config(
                "starting parameters must satisfy b_informal < b_formal inside the bounds",
            ));
        }

        let lo = bounds.lower.to_array();
        let width = bounds.width();
        let mut starts = vec![first];
        while starts.len() < self.config.estimation.restarts {
            let drawn = (0..MAX_START_DRAWS)
                .map(|_| Theta::from_array(&std::array::from_fn(|i| lo[i] + rng.random::<f64>() * width[i])))
                .find(|theta| bounds.admits(theta))
                .ok_or_else(|| ModelError::config("could not draw an admissible starting point"))?;
            starts.push(drawn);
        }
        Ok(starts)
    }
}

/// Largest normalized distance from the best restart to any restart whose
/// objective is within the near-best gap
fn identification_spread(
    restarts: &[RestartOutcome],
    best: usize,
    width: &[f64; Theta::DIM],
    gap: f64,
    f_tolerance: f64,
) -> f64 {
    let best_q = restarts[best].q;
    let threshold = best_q + gap * best_q.abs() + f_tolerance;
    let best_x = restarts[best].theta.to_array();
    restarts
        .iter()
        .filter(|r| r.q <= threshold)
        .map(|r| {
            let x = r.theta.to_array();
            (0..Theta::DIM).map(|i| (x[i] - best_x[i]).abs() / width[i]).fold(0.0, f64::max)
        })
        .fold(0.0, f64::max)
}
