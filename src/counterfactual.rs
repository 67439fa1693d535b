//! Counterfactual experiments on a solved baseline
//!
//! Each experiment changes only the parameters it targets, re-solves and
//! re-simulates on the baseline grid and income objects with the baseline
//! simulation seed, then compares consumption-growth variance and the CRRA
//! welfare cost `0.5 * gamma * Var(dln C)`.

use std::sync::Arc;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};
use crate::grid::StateGrid;
use crate::moments::consumption_growth_variance;
use crate::panel::Panel;
use crate::params::{Sector, SimulationConfig};
use crate::simulator::Simulator;
use crate::solver::Model;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Experiment {
    /// b_informal := b_formal
    EqualBorrowingLimits,
    /// Informal permanent and transitory variances := formal ones
    EqualIncomeRisk,
    /// kappa := 0
    NoSwitchingCost,
    /// All of the above at once
    Combined,
}

impl Experiment {
    pub const ALL: [Experiment; 4] = [
        Experiment::EqualBorrowingLimits,
        Experiment::EqualIncomeRisk,
        Experiment::NoSwitchingCost,
        Experiment::Combined,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Experiment::EqualBorrowingLimits => "equal_borrowing_limits",
            Experiment::EqualIncomeRisk => "equal_income_risk",
            Experiment::NoSwitchingCost => "no_switching_cost",
            Experiment::Combined => "combined",
        }
    }

    fn equalizes_limits(self) -> bool {
        matches!(self, Experiment::EqualBorrowingLimits | Experiment::Combined)
    }

    fn equalizes_risk(self) -> bool {
        matches!(self, Experiment::EqualIncomeRisk | Experiment::Combined)
    }

    fn removes_switching_cost(self) -> bool {
        matches!(self, Experiment::NoSwitchingCost | Experiment::Combined)
    }
}

/// Map from the response ratio `R = |beta_neg| / |beta_pos|` to loss aversion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossAversionForm {
    /// lambda = R^(1/eta)
    PowerRoot,
    /// lambda = R
    Linear,
}

impl LossAversionForm {
    pub fn lambda(self, response_ratio: f64, eta: f64) -> f64 {
        match self {
            LossAversionForm::PowerRoot => response_ratio.powf(1.0 / eta),
            LossAversionForm::Linear => response_ratio,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LossAversionConfig {
    pub form: LossAversionForm,
    /// Empirical asymmetry of consumption responses; no table when absent
    pub response_ratio: Option<f64>,
    pub etas: Vec<f64>,
}

impl Default for LossAversionConfig {
    fn default() -> Self {
        Self { form: LossAversionForm::PowerRoot, response_ratio: None, etas: vec![0.5, 1.0, 2.0] }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CounterfactualConfig {
    pub experiments: Vec<Experiment>,
    /// Risk-aversion menu for the welfare cost
    pub gammas: Vec<f64>,
    pub loss_aversion: LossAversionConfig,
}

impl Default for CounterfactualConfig {
    fn default() -> Self {
        Self {
            experiments: Experiment::ALL.to_vec(),
            gammas: vec![1.0, 2.0, 3.0, 5.0],
            loss_aversion: LossAversionConfig::default(),
        }
    }
}

impl CounterfactualConfig {
    pub fn validate(&self) -> ModelResult<()> {
        if self.gammas.iter().any(|g| !(*g > 0.0 && g.is_finite())) {
            return Err(ModelError::config("counterfactual gammas must be positive"));
        }
        let la = &self.loss_aversion;
        if la.etas.iter().any(|e| !(*e > 0.0 && e.is_finite())) {
            return Err(ModelError::config("loss-aversion etas must be positive"));
        }
        if let Some(r) = la.response_ratio {
            if !(r > 0.0 && r.is_finite()) {
                return Err(ModelError::config(format!("response ratio must be positive, got {}", r)));
            }
        }
        Ok(())
    }
}

/// One row of a counterfactual table, long format
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CounterfactualRow {
    pub experiment: Experiment,
    /// "formal", "informal" or "pooled"
    pub sector: &'static str,
    pub gamma: f64,
    pub baseline_variance: Option<f64>,
    pub counterfactual_variance: Option<f64>,
    /// 100 * (baseline - counterfactual) / baseline
    pub variance_reduction_pct: Option<f64>,
    pub baseline_welfare_cost: Option<f64>,
    pub counterfactual_welfare_cost: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct CounterfactualTable {
    pub experiment: Experiment,
    pub rows: Vec<CounterfactualRow>,
    pub floor_hits: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LossAversionRow {
    pub eta: f64,
    pub response_ratio: f64,
    pub lambda: f64,
}

pub fn loss_aversion_table(config: &LossAversionConfig) -> Vec<LossAversionRow> {
    let Some(r) = config.response_ratio else {
        return Vec::new();
    };
    config
        .etas
        .iter()
        .map(|&eta| LossAversionRow { eta, response_ratio: r, lambda: config.form.lambda(r, eta) })
        .collect()
}

/// Runs experiments against one solved baseline
pub struct CounterfactualRunner<'a> {
    baseline: &'a Model,
    simulation: &'a SimulationConfig,
    config: &'a CounterfactualConfig,
}

impl<'a> CounterfactualRunner<'a> {
    pub fn new(baseline: &'a Model, simulation: &'a SimulationConfig, config: &'a CounterfactualConfig) -> Self {
        Self { baseline, simulation, config }
    }

    /// Baseline model with the experiment's parameters changed, sharing the
    /// baseline asset grid, productivity nodes and income process
    pub fn variant(&self, experiment: Experiment) -> ModelResult<Model> {
        let base = self.baseline;
        let mut params = base.params.clone();
        let mut grid = Arc::clone(&base.grid);
        let mut income = Arc::clone(&base.income);

        if experiment.equalizes_limits() {
            params.b_informal = params.b_formal;
        }
        if experiment.removes_switching_cost() {
            params.kappa = 0.0;
        }
        if experiment.equalizes_risk() {
            params.informal.var_permanent = params.formal.var_permanent;
            params.informal.var_transitory = params.formal.var_transitory;
            income = Arc::new(base.income.with_equal_risk());
            if base.params.informal.var_permanent != base.params.formal.var_permanent {
                let productivity = base
                    .grid
                    .productivity
                    .with_sector_sigma(Sector::Informal, params.formal.sigma_permanent())?;
                grid = Arc::new(StateGrid::from_parts(
                    base.grid.assets.clone(),
                    productivity,
                    base.grid.sectors,
                    base.grid.periods,
                ));
            }
        }

        Model::from_parts(params, grid, income)
    }

    /// Solve and simulate the baseline once
    pub fn baseline_panel(&self) -> ModelResult<Panel> {
        let solution = self.baseline.solve()?;
        let sim = Simulator::new(self.baseline, &solution, self.simulation).simulate()?;
        if sim.floor_hits > 0 {
            warn!("baseline simulation hit the consumption floor {} times", sim.floor_hits);
        }
        Ok(sim.panel)
    }

    pub fn run(&self, experiment: Experiment, baseline: &Panel) -> ModelResult<CounterfactualTable> {
        let model = self.variant(experiment)?;
        let solution = model.solve()?;
        let sim = Simulator::new(&model, &solution, self.simulation).simulate()?;
        if sim.floor_hits > 0 {
            warn!("{}: consumption floor hit {} times", experiment.name(), sim.floor_hits);
        }

        let mut rows = Vec::new();
        let sectors = [(Some(Sector::Formal), "formal"), (Some(Sector::Informal), "informal"), (None, "pooled")];
        for (sector, label) in sectors {
            let before = consumption_growth_variance(baseline, sector);
            let after = consumption_growth_variance(&sim.panel, sector);
            let reduction = match (before, after) {
                (Some(b), Some(a)) if b > 0.0 => Some(100.0 * (b - a) / b),
                (Some(b), Some(a)) if b == a => Some(0.0),
                _ => None,
            };
            if sector.is_none() {
                info!(
                    "{}: pooled Var(dln C) {:?} -> {:?} (reduction {:?}%)",
                    experiment.name(),
                    before,
                    after,
                    reduction
                );
            }
            for &gamma in &self.config.gammas {
                rows.push(CounterfactualRow {
                    experiment,
                    sector: label,
                    gamma,
                    baseline_variance: before,
                    counterfactual_variance: after,
                    variance_reduction_pct: reduction,
                    baseline_welfare_cost: before.map(|v| welfare_cost(gamma, v)),
                    counterfactual_welfare_cost: after.map(|v| welfare_cost(gamma, v)),
                });
            }
        }

        Ok(CounterfactualTable { experiment, rows, floor_hits: sim.floor_hits })
    }

    /// Every configured experiment against one baseline simulation
    pub fn run_all(&self) -> ModelResult<Vec<CounterfactualTable>> {
        let baseline = self.baseline_panel()?;
        self.config.experiments.iter().map(|&e| self.run(e, &baseline)).collect()
    }
}

/// CRRA welfare cost of consumption volatility, 0.5 * gamma * Var(dln C)
pub fn welfare_cost(gamma: f64, variance: f64) -> f64 {
    0.5 * gamma * variance
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{GridConfig, Parameters, SectorSet};
    use approx::assert_relative_eq;

    fn model(params: Parameters) -> Model {
        let grid = GridConfig {
            n_assets: 8,
            a_max: 4.0,
            curvature: 1.5,
            n_productivity: 3,
            n_std: 2.0,
            periods: 4,
            sectors: SectorSet::Both,
        };
        Model::build(params, &grid).unwrap()
    }

    fn simulation() -> SimulationConfig {
        SimulationConfig { n_agents: 200, seed: 3, ..SimulationConfig::default() }
    }

    #[test]
    fn test_welfare_cost_and_lambda() {
        assert_relative_eq!(welfare_cost(2.0, 0.03), 0.03);
        assert_relative_eq!(LossAversionForm::PowerRoot.lambda(4.0, 2.0), 2.0);
        assert_relative_eq!(LossAversionForm::Linear.lambda(4.0, 2.0), 4.0);

        let config = LossAversionConfig { response_ratio: Some(2.25), ..LossAversionConfig::default() };
        let table = loss_aversion_table(&config);
        assert_eq!(table.len(), 3);
        assert_relative_eq!(table[1].lambda, 2.25);
        assert!(loss_aversion_table(&LossAversionConfig::default()).is_empty());
    }

    #[test]
    fn test_variants_share_baseline_grid() {
        let base = model(Parameters::default());
        let (sim, config) = (simulation(), CounterfactualConfig::default());
        let runner = CounterfactualRunner::new(&base, &sim, &config);

        let limits = runner.variant(Experiment::EqualBorrowingLimits).unwrap();
        assert!(Arc::ptr_eq(&limits.grid, &base.grid));
        assert!(Arc::ptr_eq(&limits.income, &base.income));
        assert_eq!(limits.params.b_informal, base.params.b_formal);
        assert_eq!(limits.params.kappa, base.params.kappa);

        let free = runner.variant(Experiment::NoSwitchingCost).unwrap();
        assert!(Arc::ptr_eq(&free.grid, &base.grid));
        assert_eq!(free.params.kappa, 0.0);

        let risk = runner.variant(Experiment::EqualIncomeRisk).unwrap();
        assert_eq!(risk.grid.assets, base.grid.assets);
        assert_eq!(risk.grid.productivity.nodes(), base.grid.productivity.nodes());
        assert_eq!(
            risk.grid.productivity.transition(Sector::Informal),
            base.grid.productivity.transition(Sector::Formal)
        );
        assert_eq!(risk.income.sector(Sector::Informal).var_transitory, base.params.formal.var_transitory);
        assert_eq!(risk.params.b_informal, base.params.b_informal);

        let combined = runner.variant(Experiment::Combined).unwrap();
        assert_eq!(combined.params.b_informal, combined.params.b_formal);
        assert_eq!(combined.params.kappa, 0.0);
        assert_eq!(combined.params.informal.var_permanent, combined.params.formal.var_permanent);
    }

    #[test]
    fn test_equal_limits_already_equal_is_zero_reduction() {
        // Taste shocks and a closer wage keep both sectors populated
        let mut params = Parameters { sigma_pref: 0.3, ..Parameters::default() };
        params.informal.wage = 0.9;
        params.b_informal = params.b_formal;
        let base = model(params);
        let (sim, config) = (simulation(), CounterfactualConfig::default());
        let runner = CounterfactualRunner::new(&base, &sim, &config);

        let baseline = runner.baseline_panel().unwrap();
        let table = runner.run(Experiment::EqualBorrowingLimits, &baseline).unwrap();
        assert_eq!(table.rows.len(), 3 * config.gammas.len());
        for row in &table.rows {
            assert_eq!(row.baseline_variance, row.counterfactual_variance);
            assert_eq!(row.variance_reduction_pct, Some(0.0));
            assert_eq!(row.baseline_welfare_cost, row.counterfactual_welfare_cost);
        }
    }

    #[test]
    fn test_run_all_covers_configured_experiments() {
        let base = model(Parameters::default());
        let sim = simulation();
        let config = CounterfactualConfig {
            experiments: vec![Experiment::NoSwitchingCost, Experiment::Combined],
            gammas: vec![2.0],
            ..CounterfactualConfig::default()
        };
        let tables = CounterfactualRunner::new(&base, &sim, &config).run_all().unwrap();
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[1].experiment, Experiment::Combined);
        let pooled = tables[1].rows.iter().find(|r| r.sector == "pooled").unwrap();
        let before = pooled.baseline_variance.unwrap();
        assert_relative_eq!(pooled.baseline_welfare_cost.unwrap(), before);
    }

    #[test]
    fn test_validate_rejects_bad_menus() {
        let bad_gamma = CounterfactualConfig { gammas: vec![2.0, 0.0], ..CounterfactualConfig::default() };
        assert!(bad_gamma.validate().is_err());
        let mut bad_ratio = CounterfactualConfig::default();
        bad_ratio.loss_aversion.response_ratio = Some(-1.0);
        assert!(bad_ratio.validate().is_err());
        assert!(CounterfactualConfig::default().validate().is_ok());
    }
}
