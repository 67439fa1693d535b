//! Run configuration loaded from JSON
//!
//! Every field carries a default, so `{}` is a valid configuration file.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{Parameters, Sector, Theta};
use crate::counterfactual::CounterfactualConfig;
use crate::error::{ModelError, ModelResult};
use crate::moments::MomentOptions;

/// Which sectors agents may choose between
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SectorSet {
    /// Formal and informal
    Both,
    /// Single-sector benchmark
    FormalOnly,
}

impl SectorSet {
    pub fn sectors(self) -> &'static [Sector] {
        match self {
            SectorSet::Both => &Sector::ALL,
            SectorSet::FormalOnly => &Sector::ALL[..1],
        }
    }

    pub fn len(self) -> usize {
        self.sectors().len()
    }

    pub fn contains(self, sector: Sector) -> bool {
        self.sectors().contains(&sector)
    }
}

/// State-space discretization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Number of asset nodes before kink nodes are inserted
    pub n_assets: usize,
    /// Upper end of the asset grid
    pub a_max: f64,
    /// Grid spacing exponent; 1.0 is uniform, larger values cluster nodes near a_min
    pub curvature: f64,
    /// Number of productivity nodes
    pub n_productivity: usize,
    /// Half-width of the productivity grid in standard deviations
    pub n_std: f64,
    /// Working-life horizon T
    pub periods: usize,
    pub sectors: SectorSet,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            n_assets: 40,
            a_max: 20.0,
            curvature: 2.0,
            n_productivity: 7,
            n_std: 2.0,
            periods: 20,
            sectors: SectorSet::Both,
        }
    }
}

/// Forward simulation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Number of simulated agents N_sim
    pub n_agents: usize,
    pub seed: u64,
    /// Stationary probability of starting in the informal sector
    pub initial_informal_share: f64,
    /// Standard deviation of initial log productivity
    pub sigma_z0: f64,
    /// Assets at entry; need not be a grid node
    pub initial_assets: f64,
    /// Consumption recorded when a transitory shock leaves no positive consumption
    pub consumption_floor: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            n_agents: 2000,
            seed: 42,
            initial_informal_share: 0.5,
            sigma_z0: 0.3,
            initial_assets: 0.0,
            consumption_floor: 1e-6,
        }
    }
}

/// Box constraints on the estimated block
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterBounds {
    pub lower: Theta,
    pub upper: Theta,
}

impl Default for ParameterBounds {
    fn default() -> Self {
        Self {
            lower: Theta { b_formal: 0.0, b_informal: 0.0, kappa: 0.0, sigma_pref: 0.0 },
            upper: Theta { b_formal: 0.5, b_informal: 0.4, kappa: 0.5, sigma_pref: 0.5 },
        }
    }
}

impl ParameterBounds {
    pub fn width(&self) -> [f64; Theta::DIM] {
        let lo = self.lower.to_array();
        let hi = self.upper.to_array();
        std::array::from_fn(|i| hi[i] - lo[i])
    }

    /// Project a point onto the box
    pub fn clamp(&self, x: &[f64; Theta::DIM]) -> [f64; Theta::DIM] {
        let lo = self.lower.to_array();
        let hi = self.upper.to_array();
        std::array::from_fn(|i| x[i].clamp(lo[i], hi[i]))
    }

    /// Inside the box and b_informal strictly below b_formal
    pub fn admits(&self, theta: &Theta) -> bool {
        let x = theta.to_array();
        let lo = self.lower.to_array();
        let hi = self.upper.to_array();
        let in_box = (0..Theta::DIM).all(|i| x[i] >= lo[i] && x[i] <= hi[i]);
        in_box && theta.b_informal < theta.b_formal
    }

    pub fn validate(&self) -> ModelResult<()> {
        let lo = self.lower.to_array();
        let hi = self.upper.to_array();
        for i in 0..Theta::DIM {
            if !(lo[i].is_finite() && hi[i].is_finite() && lo[i] < hi[i]) {
                return Err(ModelError::config(format!(
                    "bounds for {} must satisfy lower < upper",
                    Theta::NAMES[i]
                )));
            }
        }
        if self.lower.b_formal < 0.0
            || self.lower.b_informal < 0.0
            || self.lower.kappa < 0.0
            || self.lower.sigma_pref < 0.0
        {
            return Err(ModelError::config("lower bounds must be non-negative"));
        }
        if self.lower.b_informal >= self.upper.b_formal {
            return Err(ModelError::config(
                "bounds leave no room for b_informal < b_formal",
            ));
        }
        Ok(())
    }
}

/// Optimizer and bootstrap budget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimationConfig {
    /// Number of simplex restarts (the first starts from the configured parameters)
    pub restarts: usize,
    /// Maximum simplex iterations per restart
    pub max_iterations: usize,
    /// Convergence tolerance on the spread of objective values across the simplex
    pub f_tolerance: f64,
    /// Convergence tolerance on the simplex diameter, as a fraction of the bounds width
    pub x_tolerance: f64,
    /// Initial simplex edge, as a fraction of the bounds width
    pub initial_step: f64,
    /// Normalized parameter distance above which near-best restarts signal weak identification
    pub identification_tolerance: f64,
    /// Restarts within this relative objective gap of the best are compared
    pub near_best_gap: f64,
    /// Bootstrap replications B
    pub bootstrap_replications: usize,
    /// Optional wall-clock budget in seconds for each optimizer or bootstrap run
    pub max_seconds: Option<f64>,
    /// Seed for restart starting points and bootstrap resampling
    pub seed: u64,
}

impl Default for EstimationConfig {
    fn default() -> Self {
        Self {
            restarts: 4,
            max_iterations: 200,
            f_tolerance: 1e-6,
            x_tolerance: 1e-3,
            initial_step: 0.1,
            identification_tolerance: 0.05,
            near_best_gap: 0.10,
            bootstrap_replications: 0,
            max_seconds: None,
            seed: 7,
        }
    }
}

/// Complete configuration for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RunConfig {
    pub parameters: Parameters,
    pub grid: GridConfig,
    pub simulation: SimulationConfig,
    pub moments: MomentOptions,
    pub estimation: EstimationConfig,
    pub bounds: ParameterBounds,
    pub counterfactual: CounterfactualConfig,
}

impl RunConfig {
    pub fn from_json_path<P: AsRef<Path>>(path: P) -> ModelResult<Self> {
        let file = File::open(path)?;
        let config: RunConfig = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(s: &str) -> ModelResult<Self> {
        let config: RunConfig = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate everything once, before any solve
    pub fn validate(&self) -> ModelResult<()> {
        self.parameters.validate()?;
        self.bounds.validate()?;

        let g = &self.grid;
        if g.n_assets < 2 {
            return Err(ModelError::config(format!("n_assets must be at least 2, got {}", g.n_assets)));
        }
        if g.n_productivity < 1 {
            return Err(ModelError::config("n_productivity must be at least 1"));
        }
        if g.periods < 1 {
            return Err(ModelError::config("periods must be at least 1"));
        }
        if !(g.curvature >= 1.0 && g.curvature.is_finite()) {
            return Err(ModelError::config(format!("curvature must be >= 1, got {}", g.curvature)));
        }
        if !(g.n_std > 0.0 && g.n_std.is_finite()) {
            return Err(ModelError::config("n_std must be positive"));
        }
        if g.a_max <= self.parameters.natural_asset_min() {
            return Err(ModelError::config(format!(
                "a_max {} must exceed a_min {}",
                g.a_max,
                self.parameters.natural_asset_min()
            )));
        }

        let s = &self.simulation;
        if s.n_agents == 0 {
            return Err(ModelError::config("n_agents must be positive"));
        }
        if !(0.0..=1.0).contains(&s.initial_informal_share) {
            return Err(ModelError::config("initial_informal_share must lie in [0, 1]"));
        }
        if !(s.sigma_z0 >= 0.0 && s.sigma_z0.is_finite()) {
            return Err(ModelError::config("sigma_z0 must be non-negative"));
        }
        if !(s.initial_assets >= self.parameters.natural_asset_min() && s.initial_assets <= g.a_max) {
            return Err(ModelError::config(format!(
                "initial_assets {} outside the asset grid",
                s.initial_assets
            )));
        }
        // Agents start in a sector below whose limit they would already be
        let informal_start = g.sectors.contains(Sector::Informal) && s.initial_informal_share > 0.0;
        let formal_start = !g.sectors.contains(Sector::Informal) || s.initial_informal_share < 1.0;
        for (sector, possible) in [(Sector::Formal, formal_start), (Sector::Informal, informal_start)] {
            if possible && s.initial_assets < self.parameters.asset_floor(sector) {
                return Err(ModelError::config(format!(
                    "initial_assets {} below the {} borrowing limit {}",
                    s.initial_assets,
                    sector.name(),
                    self.parameters.asset_floor(sector)
                )));
            }
        }
        if !(s.consumption_floor > 0.0) {
            return Err(ModelError::config("consumption_floor must be positive"));
        }

        let e = &self.estimation;
        if e.restarts == 0 || e.max_iterations == 0 {
            return Err(ModelError::config("restarts and max_iterations must be positive"));
        }
        if !(e.initial_step > 0.0 && e.initial_step <= 1.0) {
            return Err(ModelError::config("initial_step must lie in (0, 1]"));
        }
        if let Some(secs) = e.max_seconds {
            if !(secs > 0.0) {
                return Err(ModelError::config("max_seconds must be positive"));
            }
        }

        self.moments.validate()?;
        self.counterfactual.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_json_uses_defaults() {
        let config = RunConfig::from_json_str("{}").unwrap();
        assert_eq!(config, RunConfig::default());
        assert_eq!(config.grid.sectors, SectorSet::Both);
    }

    #[test]
    fn test_partial_json_overrides() {
        let config = RunConfig::from_json_str(
            r#"{ "grid": { "n_assets": 12, "periods": 5 }, "simulation": { "seed": 9 } }"#,
        )
        .unwrap();
        assert_eq!(config.grid.n_assets, 12);
        assert_eq!(config.grid.periods, 5);
        assert_eq!(config.grid.n_productivity, GridConfig::default().n_productivity);
        assert_eq!(config.simulation.seed, 9);
    }

    #[test]
    fn test_rejects_single_asset_node() {
        let err = RunConfig::from_json_str(r#"{ "grid": { "n_assets": 1 } }"#).unwrap_err();
        assert!(matches!(err, ModelError::Configuration(_)));
    }

    #[test]
    fn test_rejects_a_max_below_a_min() {
        let mut config = RunConfig::default();
        config.grid.a_max = -5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_initial_assets_below_informal_limit() {
        let mut config = RunConfig::default();
        config.simulation.initial_assets = -0.2;
        assert!(config.validate().is_err());

        config.simulation.initial_informal_share = 0.0;
        assert!(config.validate().is_ok());

        config.simulation.initial_informal_share = 0.5;
        config.grid.sectors = SectorSet::FormalOnly;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sector_set() {
        assert_eq!(SectorSet::Both.len(), 2);
        assert_eq!(SectorSet::FormalOnly.sectors(), &[Sector::Formal]);
        assert!(!SectorSet::FormalOnly.contains(Sector::Informal));
    }

    #[test]
    fn test_bounds_admit_requires_ordering() {
        let bounds = ParameterBounds::default();
        let ok = Theta { b_formal: 0.4, b_informal: 0.2, kappa: 0.1, sigma_pref: 0.1 };
        let tied = Theta { b_informal: 0.4, ..ok };
        let outside = Theta { kappa: 5.0, ..ok };
        assert!(bounds.admits(&ok));
        assert!(!bounds.admits(&tied));
        assert!(!bounds.admits(&outside));
    }

    #[test]
    fn test_bounds_clamp() {
        let bounds = ParameterBounds::default();
        let x = bounds.clamp(&[-1.0, 10.0, 0.5, 0.1]);
        assert_eq!(x, [0.0, 0.4, 0.5, 0.1]);
    }
}
