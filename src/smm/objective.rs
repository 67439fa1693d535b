//! Weighted squared moment distance Q(theta)
//!
//! Each evaluation rebuilds the model for the candidate parameters, solves
//! it, simulates with the fixed simulation seed and compares the simulated
//! moments with the targets. The fixed seed gives common random numbers
//! across evaluations, so Q is a deterministic function of theta.

use std::collections::BTreeMap;

use log::{debug, warn};
use serde::Serialize;

use crate::error::{MissingMomentError, ModelResult};
use crate::moments::{MomentCalculator, MomentOptions, MomentVector};
use crate::params::{GridConfig, ParameterBounds, Parameters, SimulationConfig, Theta};
use crate::simulator::Simulator;
use crate::solver::Model;
use crate::targets::{MomentId, TargetSet};

/// One row of the moment-fit table
#[derive(Debug, Clone, Serialize)]
pub struct MomentFit {
    pub moment: MomentId,
    pub target: f64,
    /// None when the moment was missing from the simulated panel
    pub simulated: Option<f64>,
    pub weight: f64,
    /// w * (target - simulated)^2
    pub contribution: Option<f64>,
}

/// Result of one objective evaluation
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub q: f64,
    pub moments: MomentVector,
    /// Targets dropped because the simulated moment was missing
    pub missing: Vec<MissingMomentError>,
    pub fit: Vec<MomentFit>,
}

pub struct SmmObjective<'a> {
    base: &'a Parameters,
    grid: &'a GridConfig,
    simulation: &'a SimulationConfig,
    moments: &'a MomentOptions,
    bounds: &'a ParameterBounds,
    targets: &'a TargetSet,
    evaluations: usize,
    missing_counts: BTreeMap<MomentId, usize>,
}

impl<'a> SmmObjective<'a> {
    pub fn new(
        base: &'a Parameters,
        grid: &'a GridConfig,
        simulation: &'a SimulationConfig,
        moments: &'a MomentOptions,
        bounds: &'a ParameterBounds,
        targets: &'a TargetSet,
    ) -> Self {
        Self {
            base,
            grid,
            simulation,
            moments,
            bounds,
            targets,
            evaluations: 0,
            missing_counts: BTreeMap::new(),
        }
    }

    /// Solve and simulate at theta, returning the simulated moments
    pub fn simulate_moments(&self, theta: &Theta) -> ModelResult<MomentVector> {
        let params = self.base.with_theta(theta);
        let model = Model::build(params, self.grid)?;
        let solution = model.solve()?;
        let sim = Simulator::new(&model, &solution, self.simulation).simulate()?;
        let calculator = MomentCalculator::with_borrowing_limits(self.moments.clone(), &model.params);
        Ok(calculator.compute(&sim.panel))
    }

    /// Full evaluation at an admissible theta
    pub fn evaluate(&mut self, theta: &Theta) -> ModelResult<Evaluation> {
        let moments = self.simulate_moments(theta)?;
        let mut q = 0.0;
        let mut missing = Vec::new();
        let mut fit = Vec::with_capacity(self.targets.len());

        for target in self.targets.iter() {
            let weight = target.weight();
            let (simulated, contribution) = match moments.get(target.moment) {
                Some(Ok(m)) => {
                    let c = weight * (target.estimate - m).powi(2);
                    q += c;
                    (Some(*m), Some(c))
                }
                Some(Err(e)) => {
                    missing.push(e.clone());
                    (None, None)
                }
                None => (None, None),
            };
            fit.push(MomentFit { moment: target.moment, target: target.estimate, simulated, weight, contribution });
        }

        self.evaluations += 1;
        for e in &missing {
            *self.missing_counts.entry(e.moment).or_insert(0) += 1;
            warn!("dropping target for this evaluation: {}", e);
        }
        debug!(
            "Q({:.4}, {:.4}, {:.4}, {:.4}) = {:.6e}",
            theta.b_formal, theta.b_informal, theta.kappa, theta.sigma_pref, q
        );
        Ok(Evaluation { q, moments, missing, fit })
    }

    /// Q(theta), or +inf outside the admissible region without solving
    pub fn value(&mut self, theta: &Theta) -> ModelResult<f64> {
        if !self.bounds.admits(theta) {
            return Ok(f64::INFINITY);
        }
        Ok(self.evaluate(theta)?.q)
    }

    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    /// How often each moment was missing across all evaluations so far
    pub fn missing_counts(&self) -> &BTreeMap<MomentId, usize> {
        &self.missing_counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::SectorSet;

    fn grid() -> GridConfig {
        GridConfig {
            n_assets: 10,
            a_max: 4.0,
            curvature: 1.5,
            n_productivity: 3,
            n_std: 2.0,
            periods: 4,
            sectors: SectorSet::Both,
        }
    }

    fn simulation() -> SimulationConfig {
        SimulationConfig { n_agents: 300, seed: 5, ..SimulationConfig::default() }
    }

    /// Informal work common enough that every sector moment is computed
    fn base() -> Parameters {
        let mut params = Parameters { sigma_pref: 0.3, ..Parameters::default() };
        params.informal.wage = 0.9;
        params
    }

    fn flat_targets(value: f64) -> TargetSet {
        let estimates: BTreeMap<MomentId, f64> = MomentId::ALL.into_iter().map(|id| (id, value)).collect();
        TargetSet::from_estimates(&estimates).unwrap()
    }

    #[test]
    fn test_zero_at_data_generating_theta() {
        let params = base();
        let (grid, simulation, options, bounds) =
            (grid(), simulation(), MomentOptions::default(), ParameterBounds::default());
        let placeholder = flat_targets(0.0);

        let truth = params.theta();
        let generated = SmmObjective::new(&params, &grid, &simulation, &options, &bounds, &placeholder)
            .simulate_moments(&truth)
            .unwrap();
        let targets = TargetSet::from_estimates(&generated.estimates()).unwrap();

        let mut objective = SmmObjective::new(&params, &grid, &simulation, &options, &bounds, &targets);
        let eval = objective.evaluate(&truth).unwrap();
        assert_eq!(eval.q, 0.0);
        assert!(eval.missing.is_empty());
        assert_eq!(eval.fit.len(), targets.len());

        let moved = Theta { kappa: truth.kappa + 0.2, ..truth };
        assert!(objective.value(&moved).unwrap() > 0.0);
        assert_eq!(objective.evaluations(), 2);
    }

    #[test]
    fn test_inadmissible_theta_is_infinite_without_solving() {
        let params = base();
        let (grid, simulation, options, bounds) =
            (grid(), simulation(), MomentOptions::default(), ParameterBounds::default());
        let targets = flat_targets(0.0);
        let mut objective = SmmObjective::new(&params, &grid, &simulation, &options, &bounds, &targets);
        let tied = Theta { b_formal: 0.2, b_informal: 0.2, kappa: 0.1, sigma_pref: 0.1 };
        assert_eq!(objective.value(&tied).unwrap(), f64::INFINITY);
        assert_eq!(objective.evaluations(), 0);
    }

    #[test]
    fn test_missing_moments_are_counted() {
        // Few agents and a high threshold leave sector moments missing
        let params = base();
        let grid = grid();
        let simulation = SimulationConfig { n_agents: 5, ..simulation() };
        let options = MomentOptions { min_observations: 15, ..MomentOptions::default() };
        let bounds = ParameterBounds::default();
        let targets = flat_targets(0.1);
        let mut objective = SmmObjective::new(&params, &grid, &simulation, &options, &bounds, &targets);
        let eval = objective.evaluate(&params.theta()).unwrap();
        assert!(!eval.missing.is_empty());
        let counted: usize = objective.missing_counts().values().sum();
        assert_eq!(counted, eval.missing.len());
        assert!(eval.fit.iter().any(|row| row.simulated.is_none() && row.contribution.is_none()));
    }
}
